use std::sync::Arc;

use anyhow::Context;
use tonic::transport::Server;

use parliament_scraper::config::ServiceConfig;
use parliament_scraper::jobs::JobController;
use parliament_scraper::logging;
use parliament_scraper::service::ScraperService;
use parliament_scraper::store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("info");

    let config = ServiceConfig::from_env()?;
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("could not open database {}", config.database_url))?;
    let jobs = JobController::new(Arc::new(store), &config);

    let reaped = jobs.reap_orphans().await?;
    tracing::info!("Startup complete {{ orphaned_jobs: {reaped} }}");

    let addr = config.listen_addr;
    println!("Scraper service listening on {}", addr);
    Server::builder()
        .add_service(ScraperService::new(jobs).into_server())
        .serve_with_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

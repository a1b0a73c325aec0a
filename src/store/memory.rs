use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobUpdate, Store};
use crate::error::StoreResult;
use crate::models::{Job, JobStatus, Record};

/// Ephemeral store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<IndexMap<Uuid, Job>>,
    records: RwLock<IndexMap<(Uuid, String), Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn insert_records(&self, job_id: Uuid, records: &[Record]) -> StoreResult<()> {
        let mut stored = self.records.write().await;
        for record in records {
            stored.insert((job_id, record.url.clone()), record.clone());
        }
        Ok(())
    }

    async fn update_job(&self, id: Uuid, update: &JobUpdate) -> StoreResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if update.permits(job.status) => {
                update.apply(job);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn select_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn select_jobs_by_status(&self, statuses: &[JobStatus]) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn select_records(&self, job_id: Uuid) -> StoreResult<Vec<Record>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|((owner, _), _)| *owner == job_id)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

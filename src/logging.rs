//! Subscriber setup shared by the service and the client.

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when it is set and parses, `default` otherwise.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs a formatting subscriber on stderr. Later calls are ignored.
pub fn init(default: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(error) = installed {
        tracing::debug!("Subscriber already installed {{ error: {error} }}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_installs_a_global_subscriber_once() {
        init("warn");
        init("debug");
        assert!(tracing::dispatcher::has_been_set());
    }
}

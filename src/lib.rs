//! Job-driven scraper for the Althingi website.
//!
//! A job is created in the `pending` state, handed to the [`jobs::JobController`]
//! which drives the breadth-first [`crawly::Crawler`] over the site, and records
//! extracted pages in batches through the [`store::Store`] gateway. Clients
//! follow progress with the [`monitor::ProgressMonitor`].

pub mod config;
pub mod content_type;
pub mod crawly;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod normalize;
pub mod robots;
pub mod service;
pub mod store;

pub mod proto {
    tonic::include_proto!("scraper");
}

pub use content_type::ContentType;
pub use models::{Job, JobStatus, Record};

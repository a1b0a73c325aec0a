//! Client-side progress polling.
//!
//! [`MonitorState`] holds everything one job's poller knows between ticks and
//! turns each observation into [`MonitorEvent`]s; [`ProgressMonitor`] drives it
//! on a timer against a [`JobSource`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::JobController;
use crate::models::{Job, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Minimum time between two reads of the job.
    pub min_fetch_spacing: Duration,
    /// Idle time after which a single advisory is raised.
    pub stagnation_threshold: Duration,
    /// Time since polling began after which the job is stopped, progressing or not.
    pub absolute_ceiling: Duration,
    /// Completions with fewer items than this are double-checked.
    pub suspicious_item_floor: u64,
    pub completion_grace: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            min_fetch_spacing: Duration::from_secs(2),
            stagnation_threshold: Duration::from_secs(60),
            absolute_ceiling: Duration::from_secs(600),
            suspicious_item_floor: 3,
            completion_grace: Duration::from_secs(5),
        }
    }
}

/// The fields of a job the monitor reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub items_scraped: u64,
    pub error_message: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            items_scraped: job.items_scraped,
            error_message: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Progress { items_scraped: u64 },
    /// No new items for the stagnation threshold. Raised once per job.
    Stagnant { idle: Duration },
    /// Polling outlived the absolute ceiling; a stop has been requested.
    TimedOut { elapsed: Duration },
    Finished {
        status: JobStatus,
        items_scraped: u64,
        error_message: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct MonitorState {
    settings: MonitorSettings,
    started_at: Instant,
    last_fetch_at: Option<Instant>,
    last_count: u64,
    last_increase_at: Instant,
    stagnation_reported: bool,
    stop_requested: bool,
    suspicious_since: Option<Instant>,
    finished: bool,
}

impl MonitorState {
    pub fn new(settings: MonitorSettings, now: Instant) -> Self {
        Self {
            settings,
            started_at: now,
            last_fetch_at: None,
            last_count: 0,
            last_increase_at: now,
            stagnation_reported: false,
            stop_requested: false,
            suspicious_since: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn should_fetch(&self, now: Instant) -> bool {
        !self.finished
            && self.last_fetch_at.map_or(true, |last| {
                now.saturating_duration_since(last) >= self.settings.min_fetch_spacing
            })
    }

    pub fn observe(&mut self, snapshot: &JobSnapshot, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.last_fetch_at = Some(now);

        if snapshot.items_scraped > self.last_count {
            self.last_count = snapshot.items_scraped;
            self.last_increase_at = now;
            self.suspicious_since = None;
            events.push(MonitorEvent::Progress {
                items_scraped: snapshot.items_scraped,
            });
        }

        if snapshot.status.is_terminal() {
            if self.defer_completion(snapshot, now) {
                return events;
            }
            self.finished = true;
            events.push(MonitorEvent::Finished {
                status: snapshot.status,
                items_scraped: snapshot.items_scraped,
                error_message: snapshot.error_message.clone(),
            });
            return events;
        }

        let elapsed = self.elapsed(now);
        let idle = now.saturating_duration_since(self.last_increase_at);
        if !self.stop_requested && elapsed >= self.settings.absolute_ceiling {
            self.stop_requested = true;
            events.push(MonitorEvent::TimedOut { elapsed });
        } else if !self.stop_requested
            && !self.stagnation_reported
            && idle >= self.settings.stagnation_threshold
        {
            self.stagnation_reported = true;
            events.push(MonitorEvent::Stagnant { idle });
        }
        events
    }

    /// A completion with very few items is held back for the grace window in
    /// case a later read shows more.
    fn defer_completion(&mut self, snapshot: &JobSnapshot, now: Instant) -> bool {
        if snapshot.status != JobStatus::Completed
            || snapshot.items_scraped >= self.settings.suspicious_item_floor
        {
            return false;
        }
        match self.suspicious_since {
            None => {
                tracing::debug!(
                    "Completed with few items, waiting for late updates {{ items: {} }}",
                    snapshot.items_scraped
                );
                self.suspicious_since = Some(now);
                true
            }
            Some(since) => now.saturating_duration_since(since) < self.settings.completion_grace,
        }
    }
}

/// Where the monitor reads job state from and sends stop requests to.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn snapshot(&self, id: Uuid) -> anyhow::Result<JobSnapshot>;

    /// Returns whether the job was stopped by this request.
    async fn request_stop(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[async_trait]
impl JobSource for JobController {
    async fn snapshot(&self, id: Uuid) -> anyhow::Result<JobSnapshot> {
        Ok(JobSnapshot::from(&self.get(id).await?))
    }

    async fn request_stop(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.stop(id).await?)
    }
}

/// A running poller; dropping `events` or cancelling ends it.
pub struct MonitorHandle {
    pub events: mpsc::Receiver<MonitorEvent>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Option<JobSnapshot>>,
}

pub struct ProgressMonitor<S> {
    source: Arc<S>,
    settings: MonitorSettings,
}

impl<S: JobSource + 'static> ProgressMonitor<S> {
    pub fn new(source: Arc<S>, settings: MonitorSettings) -> Self {
        Self { source, settings }
    }

    /// Polls job `id` on its own task.
    pub fn spawn(&self, id: Uuid) -> MonitorHandle {
        let (sender, events) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let monitor = ProgressMonitor {
            source: Arc::clone(&self.source),
            settings: self.settings,
        };
        let token = cancel.clone();
        let task = tokio::spawn(async move { monitor.watch(id, sender, token).await });
        MonitorHandle { events, cancel, task }
    }

    /// Polls until the job is terminal, `cancel` fires or nobody listens.
    /// Returns the final snapshot when the job finished.
    #[tracing::instrument(skip(self, events, cancel))]
    pub async fn watch(
        &self,
        id: Uuid,
        events: mpsc::Sender<MonitorEvent>,
        cancel: CancellationToken,
    ) -> Option<JobSnapshot> {
        let mut state = MonitorState::new(self.settings, Instant::now());
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = ticker.tick() => {}
            }
            let now = Instant::now();
            if !state.should_fetch(now) {
                continue;
            }

            let snapshot = match self.source.snapshot(id).await {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    tracing::warn!("Could not read job {{ id: {id}, error: {error} }}");
                    continue;
                }
            };

            for event in state.observe(&snapshot, now) {
                if let MonitorEvent::TimedOut { elapsed } = &event {
                    tracing::warn!(
                        "Job outlived the ceiling, requesting stop {{ id: {id}, elapsed: {elapsed:?} }}"
                    );
                    if let Err(error) = self.source.request_stop(id).await {
                        tracing::warn!("Stop request failed {{ id: {id}, error: {error} }}");
                    }
                }
                if events.send(event).await.is_err() {
                    return None;
                }
            }

            if state.is_finished() {
                return Some(snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(1),
            min_fetch_spacing: Duration::from_millis(500),
            stagnation_threshold: Duration::from_secs(10),
            absolute_ceiling: Duration::from_secs(60),
            suspicious_item_floor: 3,
            completion_grace: Duration::from_secs(5),
        }
    }

    fn running(items_scraped: u64) -> JobSnapshot {
        JobSnapshot {
            status: JobStatus::Running,
            items_scraped,
            error_message: None,
        }
    }

    fn completed(items_scraped: u64) -> JobSnapshot {
        JobSnapshot {
            status: JobStatus::Completed,
            ..running(items_scraped)
        }
    }

    #[test]
    fn stagnation_is_reported_once() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        let mut stagnant = 0;
        for second in 0..40 {
            let events = state.observe(&running(2), start + Duration::from_secs(second));
            stagnant += events
                .iter()
                .filter(|event| matches!(event, MonitorEvent::Stagnant { .. }))
                .count();
        }
        assert_eq!(stagnant, 1);
    }

    #[test]
    fn progress_resets_the_idle_clock() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        assert_eq!(
            state.observe(&running(1), start + Duration::from_secs(9)),
            vec![MonitorEvent::Progress { items_scraped: 1 }]
        );
        assert!(state.observe(&running(1), start + Duration::from_secs(18)).is_empty());
        assert!(matches!(
            state.observe(&running(1), start + Duration::from_secs(19)).as_slice(),
            [MonitorEvent::Stagnant { .. }]
        ));
    }

    #[test]
    fn absolute_ceiling_requests_a_stop_once() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        let events = state.observe(&running(0), start + Duration::from_secs(61));
        assert!(matches!(events.as_slice(), [MonitorEvent::TimedOut { .. }]));
        assert!(state.observe(&running(0), start + Duration::from_secs(70)).is_empty());
    }

    #[test]
    fn steady_progress_still_hits_the_ceiling() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        for second in 1..60 {
            let events = state.observe(&running(second), start + Duration::from_secs(second));
            assert_eq!(events, vec![MonitorEvent::Progress { items_scraped: second }]);
        }
        let events = state.observe(&running(60), start + Duration::from_secs(60));
        assert_eq!(
            events,
            vec![
                MonitorEvent::Progress { items_scraped: 60 },
                MonitorEvent::TimedOut {
                    elapsed: Duration::from_secs(60)
                },
            ]
        );
    }

    #[test]
    fn suspicious_completion_waits_for_grace() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        assert!(state.observe(&completed(1), start).is_empty());
        assert!(state.observe(&completed(1), start + Duration::from_secs(3)).is_empty());
        assert!(!state.is_finished());
        let events = state.observe(&completed(1), start + Duration::from_secs(6));
        assert!(matches!(events.as_slice(), [MonitorEvent::Finished { items_scraped: 1, .. }]));
        assert!(state.is_finished());
        assert!(!state.should_fetch(start + Duration::from_secs(60)));
    }

    #[test]
    fn late_items_supersede_a_suspicious_completion() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        assert!(state.observe(&completed(0), start).is_empty());
        let events = state.observe(&completed(12), start + Duration::from_secs(1));
        assert_eq!(
            events,
            vec![
                MonitorEvent::Progress { items_scraped: 12 },
                MonitorEvent::Finished {
                    status: JobStatus::Completed,
                    items_scraped: 12,
                    error_message: None,
                },
            ]
        );
    }

    #[test]
    fn failures_finish_immediately() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        let failed = JobSnapshot {
            status: JobStatus::Failed,
            items_scraped: 0,
            error_message: Some("boom".into()),
        };
        let events = state.observe(&failed, start);
        assert!(matches!(
            events.as_slice(),
            [MonitorEvent::Finished { status: JobStatus::Failed, .. }]
        ));
    }

    #[test]
    fn reads_are_spaced() {
        let start = Instant::now();
        let mut state = MonitorState::new(settings(), start);
        assert!(state.should_fetch(start));
        state.observe(&running(0), start);
        assert!(!state.should_fetch(start + Duration::from_millis(100)));
        assert!(state.should_fetch(start + Duration::from_millis(500)));
    }
}

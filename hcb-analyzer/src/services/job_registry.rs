//! Active job registry
//!
//! Holds only jobs that have not reached a terminal state; finished jobs
//! are dropped immediately, no history is kept.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::JobError;
use crate::models::{AnalysisJob, JobState};

struct ActiveJob {
    job: AnalysisJob,
    cancel: CancellationToken,
}

/// Shared map of in-flight jobs
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, ActiveJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new job; a job id may only be active once
    pub fn register(&self, job: AnalysisJob, cancel: CancellationToken) -> Result<(), JobError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.job_id) {
            return Err(JobError::BadRequest(format!(
                "job {} is already active",
                job.job_id
            )));
        }
        jobs.insert(job.job_id, ActiveJob { job, cancel });
        Ok(())
    }

    pub fn update_state(&self, job_id: Uuid, state: JobState) {
        if let Some(active) = self.write().get_mut(&job_id) {
            active.job.state = state;
        }
    }

    pub fn remove(&self, job_id: Uuid) {
        self.write().remove(&job_id);
    }

    /// Signal cancellation; returns false when the job is not active
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.read().get(&job_id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<AnalysisJob> {
        self.read().get(&job_id).map(|active| active.job.clone())
    }

    /// Active jobs, oldest first
    pub fn snapshot(&self) -> Vec<AnalysisJob> {
        let mut jobs: Vec<AnalysisJob> =
            self.read().values().map(|active| active.job.clone()).collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Lock poisoning only follows a panic while holding the lock; the map
    // itself stays consistent, so keep serving it.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, ActiveJob>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, ActiveJob>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisKind;

    #[test]
    fn test_register_cancel_remove() {
        let registry = JobRegistry::new();
        let token = CancellationToken::new();
        let job = AnalysisJob::new(Uuid::new_v4(), AnalysisKind::BeatGrid, "x");
        let job_id = job.job_id;

        registry.register(job, token.clone()).unwrap();
        registry.update_state(job_id, JobState::Analyzing);
        assert_eq!(registry.get(job_id).unwrap().state, JobState::Analyzing);

        assert!(registry.cancel(job_id));
        assert!(token.is_cancelled());

        registry.remove(job_id);
        assert!(registry.is_empty());
        assert!(!registry.cancel(job_id));
    }

    #[test]
    fn test_duplicate_job_id_rejected() {
        let registry = JobRegistry::new();
        let job = AnalysisJob::new(Uuid::new_v4(), AnalysisKind::BeatGrid, "x");

        registry.register(job.clone(), CancellationToken::new()).unwrap();
        assert!(matches!(
            registry.register(job, CancellationToken::new()),
            Err(JobError::BadRequest(_))
        ));
    }
}

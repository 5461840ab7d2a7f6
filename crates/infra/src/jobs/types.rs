//! Job record, lifecycle states, and partial updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docflow_core::{AnalysisId, DocumentId, DomainError, Entity, JobId, Owned, UserId};

/// Progress checkpoints written by the worker.
pub mod progress {
    pub const QUEUED: u8 = 0;
    pub const STARTED: u8 = 10;
    pub const ANALYZED: u8 = 70;
    pub const DONE: u8 = 100;
}

/// Job execution status.
///
/// Transitions are forward-only: `queued -> processing -> {completed, failed}`,
/// plus `queued -> failed` for jobs whose document disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Status writes always change the status; re-entering `processing` is
    /// rejected so only one claim of a queued job can succeed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Queued, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// A unit of analysis work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub document_id: DocumentId,
    pub query: String,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<AnalysisId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly queued job.
    pub fn queued(document_id: DocumentId, user_id: UserId, query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            progress: progress::QUEUED,
            document_id,
            query: query.into(),
            user_id,
            result_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate `update` against this job's current state without applying it.
    pub fn check(&self, update: &JobUpdate) -> Result<(), DomainError> {
        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(DomainError::invariant(format!(
                    "job {} cannot move from {} to {}",
                    self.id, self.status, next
                )));
            }
        }
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!("job {} is already {}", self.id, self.status)));
        }
        if let Some(p) = update.progress {
            if p < self.progress || p > progress::DONE {
                return Err(DomainError::invariant(format!(
                    "job {} progress cannot go from {} to {}",
                    self.id, self.progress, p
                )));
            }
        }
        let next_status = update.status.unwrap_or(self.status);
        if update.result_ref.is_some() && next_status != JobStatus::Completed {
            return Err(DomainError::invariant("result reference requires completed status"));
        }
        if update.error.is_some() && next_status != JobStatus::Failed {
            return Err(DomainError::invariant("error detail requires failed status"));
        }
        Ok(())
    }

    /// Merge the supplied fields into this job (after [`Job::check`]).
    pub fn apply(&mut self, update: &JobUpdate, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.check(update)?;
        if let Some(s) = update.status {
            self.status = s;
        }
        if let Some(p) = update.progress {
            self.progress = p;
        }
        if let Some(r) = update.result_ref {
            self.result_ref = Some(r);
        }
        if let Some(e) = &update.error {
            self.error = Some(e.clone());
        }
        self.updated_at = at;
        Ok(())
    }
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> JobId {
        self.id
    }
}

impl Owned for Job {
    fn owner(&self) -> UserId {
        self.user_id
    }
}

/// Field-level partial update; `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub result_ref: Option<AnalysisId>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn started() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(progress::STARTED),
            ..Self::default()
        }
    }

    pub fn progress(p: u8) -> Self {
        Self {
            progress: Some(p),
            ..Self::default()
        }
    }

    pub fn completed(result: AnalysisId) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(progress::DONE),
            result_ref: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::queued(DocumentId::new(), UserId::new(), "q")
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut j = job();
        let now = Utc::now();
        j.apply(&JobUpdate::started(), now).unwrap();
        j.apply(&JobUpdate::progress(progress::ANALYZED), now).unwrap();
        let analysis = AnalysisId::new();
        j.apply(&JobUpdate::completed(analysis), now).unwrap();

        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.progress, 100);
        assert_eq!(j.result_ref, Some(analysis));
        assert_eq!(j.error, None);
    }

    #[test]
    fn queued_may_fail_directly() {
        let mut j = job();
        j.apply(&JobUpdate::failed("document missing"), Utc::now()).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.progress, 0);
    }

    #[test]
    fn terminal_jobs_reject_further_updates() {
        let mut j = job();
        j.apply(&JobUpdate::failed("x"), Utc::now()).unwrap();
        assert!(j.apply(&JobUpdate::started(), Utc::now()).is_err());
        assert!(j.apply(&JobUpdate::failed("again"), Utc::now()).is_err());
    }

    #[test]
    fn processing_job_cannot_be_claimed_again() {
        let mut j = job();
        j.apply(&JobUpdate::started(), Utc::now()).unwrap();
        assert!(j.check(&JobUpdate::started()).is_err());
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn queued_cannot_complete_without_processing() {
        let mut j = job();
        assert!(j.apply(&JobUpdate::completed(AnalysisId::new()), Utc::now()).is_err());
        assert_eq!(j.status, JobStatus::Queued);
    }

    #[test]
    fn progress_never_decreases() {
        let mut j = job();
        j.apply(&JobUpdate::started(), Utc::now()).unwrap();
        j.apply(&JobUpdate::progress(70), Utc::now()).unwrap();
        assert!(j.apply(&JobUpdate::progress(10), Utc::now()).is_err());
        assert_eq!(j.progress, 70);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [JobStatus::Queued, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
    }

    #[test]
    fn serializes_camel_case_without_empty_terminals() {
        let v = serde_json::to_value(job()).unwrap();
        assert_eq!(v["status"], "queued");
        assert!(v.get("documentId").is_some());
        assert!(v.get("resultRef").is_none());
        assert!(v.get("error").is_none());
    }
}

//! Redis-backed job store.
//!
//! ## Layout
//!
//! - **Job record**: hash `job:pdf:{id}` with a retention TTL
//! - **Dispatch queue**: list `queue:pdf_analysis` (RPUSH / BLPOP)
//! - **In-flight index**: sorted set `jobs:inflight`, scored by the millisecond
//!   timestamp at which the job entered `processing`
//!
//! Enqueue writes the hash and pushes the id inside one `MULTI`/`EXEC`. Updates
//! are validated in Rust and applied by a Lua compare-and-set on the stored
//! status, so a job that became terminal in the meantime is never overwritten.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use docflow_core::JobId;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus, JobUpdate};
use crate::redis_conn::RedisHandle;

pub const JOB_KEY_PREFIX: &str = "job:pdf:";
pub const QUEUE_KEY: &str = "queue:pdf_analysis";
pub const IN_FLIGHT_KEY: &str = "jobs:inflight";

const CAS_ATTEMPTS: usize = 3;

/// KEYS[1] job hash, KEYS[2] in-flight zset.
/// ARGV[1] expected status, ARGV[2] job id, ARGV[3] now (ms), ARGV[4..] field/value pairs.
/// Returns 1 applied, 0 missing, -1 status changed underneath us.
const CAS_UPDATE: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then return 0 end
if current ~= ARGV[1] then return -1 end
local fields = {}
for i = 4, #ARGV do fields[#fields + 1] = ARGV[i] end
if #fields > 0 then redis.call('HSET', KEYS[1], unpack(fields)) end
local status = redis.call('HGET', KEYS[1], 'status')
if status == 'processing' and current ~= 'processing' then
  redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
elseif status == 'completed' or status == 'failed' then
  redis.call('ZREM', KEYS[2], ARGV[2])
end
return 1
"#;

pub struct RedisJobStore {
    redis: RedisHandle,
    pop_conn: Mutex<Option<MultiplexedConnection>>,
    retention: Duration,
    cas: redis::Script,
}

impl RedisJobStore {
    pub fn new(redis: RedisHandle, retention: Duration) -> Self {
        Self {
            redis,
            pop_conn: Mutex::new(None),
            retention,
            cas: redis::Script::new(CAS_UPDATE),
        }
    }

    fn key(id: JobId) -> String {
        format!("{JOB_KEY_PREFIX}{id}")
    }

    fn write_pipe(&self, job: &Job, queue: bool) -> redis::Pipeline {
        let key = Self::key(job.id);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(&key, &to_fields(job))
            .ignore()
            .expire(&key, self.retention.as_secs() as i64)
            .ignore();
        if queue {
            pipe.rpush(QUEUE_KEY, job.id.to_string()).ignore();
        }
        pipe
    }

    async fn write(&self, job: Job, queue: bool) -> Result<(), JobStoreError> {
        let mut conn = self.redis.conn();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::key(job.id))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        if exists {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        self.write_pipe(&job, queue)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        self.write(job, false).await
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn enqueue(&self, job: Job) -> Result<(), JobStoreError> {
        self.write(job, true).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let mut conn = self.redis.conn();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        if raw.is_empty() {
            return Ok(None);
        }
        from_fields(&raw).map(Some)
    }

    #[instrument(skip(self, update), fields(job_id = %id))]
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, JobStoreError> {
        let mut conn = self.redis.conn();
        for _ in 0..CAS_ATTEMPTS {
            let mut job = self.get(id).await?.ok_or(JobStoreError::NotFound(id))?;
            let expected = job.status;
            let now = Utc::now();
            job.apply(&update, now)?;

            let mut inv = self.cas.prepare_invoke();
            inv.key(Self::key(id))
                .key(IN_FLIGHT_KEY)
                .arg(expected.as_str())
                .arg(id.to_string())
                .arg(now.timestamp_millis());
            for (field, value) in update_fields(&update, now) {
                inv.arg(field).arg(value);
            }

            match inv.invoke_async::<_, i64>(&mut conn).await.map_err(unavailable)? {
                1 => return Ok(job),
                0 => return Err(JobStoreError::NotFound(id)),
                _ => continue,
            }
        }
        Err(JobStoreError::Conflict(id))
    }

    async fn push(&self, id: JobId) -> Result<(), JobStoreError> {
        let mut conn = self.redis.conn();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        if !exists {
            return Err(JobStoreError::NotFound(id));
        }
        redis::cmd("RPUSH")
            .arg(QUEUE_KEY)
            .arg(id.to_string())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, JobStoreError> {
        let mut slot = self.pop_conn.lock().await;
        let mut conn = match slot.take() {
            Some(c) => c,
            None => self.redis.dedicated().await.map_err(unavailable)?,
        };

        // BLPOP treats 0 as "forever"; keep the loop responsive instead.
        let secs = timeout.as_secs_f64().max(0.01);
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(QUEUE_KEY)
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        // Only a healthy connection goes back in the slot.
        *slot = Some(conn);

        match popped {
            None => Ok(None),
            Some((_, raw)) => raw
                .parse::<JobId>()
                .map(Some)
                .map_err(|e| JobStoreError::Corrupt(format!("queue entry {raw:?}: {e}"))),
        }
    }

    async fn stalled(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let mut conn = self.redis.conn();
        let raw: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(IN_FLIGHT_KEY)
            .arg("-inf")
            .arg(cutoff.timestamp_millis())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(raw
            .into_iter()
            .filter_map(|s| match s.parse::<JobId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(entry = %s, error = %e, "skipping malformed in-flight entry");
                    None
                }
            })
            .collect())
    }

    async fn release(&self, id: JobId) -> Result<(), JobStoreError> {
        let mut conn = self.redis.conn();
        redis::cmd("ZREM")
            .arg(IN_FLIGHT_KEY)
            .arg(id.to_string())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }
}

fn unavailable(e: redis::RedisError) -> JobStoreError {
    JobStoreError::Unavailable(e.to_string())
}

fn to_fields(job: &Job) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("status", job.status.as_str().to_string()),
        ("progress", job.progress.to_string()),
        ("document_id", job.document_id.to_string()),
        ("query", job.query.clone()),
        ("user_id", job.user_id.to_string()),
        ("created_at", job.created_at.to_rfc3339()),
        ("updated_at", job.updated_at.to_rfc3339()),
    ];
    if let Some(r) = job.result_ref {
        fields.push(("result_ref", r.to_string()));
    }
    if let Some(e) = &job.error {
        fields.push(("error", e.clone()));
    }
    fields
}

fn update_fields(update: &JobUpdate, at: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let mut fields = vec![("updated_at", at.to_rfc3339())];
    if let Some(s) = update.status {
        fields.push(("status", s.as_str().to_string()));
    }
    if let Some(p) = update.progress {
        fields.push(("progress", p.to_string()));
    }
    if let Some(r) = update.result_ref {
        fields.push(("result_ref", r.to_string()));
    }
    if let Some(e) = &update.error {
        fields.push(("error", e.clone()));
    }
    fields
}

fn from_fields(raw: &HashMap<String, String>) -> Result<Job, JobStoreError> {
    fn field<'a>(raw: &'a HashMap<String, String>, name: &str) -> Result<&'a str, JobStoreError> {
        raw.get(name)
            .map(String::as_str)
            .ok_or_else(|| JobStoreError::Corrupt(format!("missing field {name}")))
    }
    fn parse<T: std::str::FromStr>(raw: &HashMap<String, String>, name: &str) -> Result<T, JobStoreError>
    where
        T::Err: std::fmt::Display,
    {
        let v = field(raw, name)?;
        v.parse::<T>()
            .map_err(|e| JobStoreError::Corrupt(format!("field {name}={v:?}: {e}")))
    }
    fn optional<T: std::str::FromStr>(raw: &HashMap<String, String>, name: &str) -> Result<Option<T>, JobStoreError>
    where
        T::Err: std::fmt::Display,
    {
        match raw.get(name).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(_) => parse(raw, name).map(Some),
        }
    }

    Ok(Job {
        id: parse(raw, "id")?,
        status: parse::<JobStatus>(raw, "status")?,
        progress: parse(raw, "progress")?,
        document_id: parse(raw, "document_id")?,
        query: field(raw, "query")?.to_string(),
        user_id: parse(raw, "user_id")?,
        result_ref: optional(raw, "result_ref")?,
        error: raw.get("error").filter(|e| !e.is_empty()).cloned(),
        created_at: parse(raw, "created_at")?,
        updated_at: parse(raw, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::{AnalysisId, DocumentId, UserId};

    fn as_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn hash_encoding_round_trips() {
        let mut job = Job::queued(DocumentId::new(), UserId::new(), "what is the margin?");
        job.apply(&JobUpdate::started(), Utc::now()).unwrap();
        job.apply(&JobUpdate::completed(AnalysisId::new()), Utc::now()).unwrap();

        let decoded = from_fields(&as_map(to_fields(&job))).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.status, JobStatus::Completed);
        assert_eq!(decoded.result_ref, job.result_ref);
        assert_eq!(decoded.created_at, job.created_at);
    }

    #[test]
    fn missing_fields_are_corrupt() {
        let mut raw = as_map(to_fields(&Job::queued(DocumentId::new(), UserId::new(), "q")));
        raw.remove("status");
        assert!(matches!(from_fields(&raw), Err(JobStoreError::Corrupt(_))));
    }

    #[test]
    fn update_fields_only_carry_supplied_values() {
        let fields = update_fields(&JobUpdate::progress(70), Utc::now());
        let names: Vec<_> = fields.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["updated_at", "progress"]);
    }
}

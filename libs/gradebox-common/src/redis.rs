use crate::types::{Job, JobVerdict};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics shared by the worker and the CLI.
/// Keys are deterministic so producers and consumers never drift.

pub const QUEUE_KEY: &str = "gradebox:queue";
pub const VERDICT_PREFIX: &str = "gradebox:verdict";

/// Generate verdict key for a job
pub fn verdict_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", VERDICT_PREFIX, job_id)
}

fn serde_error(what: &'static str, e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, what, e.to_string()))
}

/// Push a job to the queue (RPUSH, FIFO with BLPOP)
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &Job,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(|e| serde_error("serialization error", e))?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a job, blocking for at most `timeout_seconds` so callers can observe shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<Job>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: Job = serde_json::from_str(&payload)
                .map_err(|e| serde_error("deserialization error", e))?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Store a verdict with a TTL
pub async fn store_verdict(
    conn: &mut redis::aio::ConnectionManager,
    verdict: &JobVerdict,
    ttl_seconds: u64,
) -> RedisResult<()> {
    let key = verdict_key(&verdict.job_id);
    let payload = serde_json::to_string(verdict).map_err(|e| serde_error("serialization error", e))?;
    conn.set_ex(&key, payload, ttl_seconds as _).await
}

/// Retrieve a verdict, `None` while the job is queued or running
pub async fn get_verdict(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobVerdict>> {
    let payload: Option<String> = conn.get(verdict_key(job_id)).await?;

    match payload {
        Some(data) => {
            let verdict: JobVerdict = serde_json::from_str(&data)
                .map_err(|e| serde_error("deserialization error", e))?;
            Ok(Some(verdict))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_verdict_key_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(verdict_key(&id), verdict_key(&id));
        assert!(verdict_key(&id).starts_with("gradebox:verdict:"));
        assert!(verdict_key(&id).ends_with(&id.to_string()));
    }
}

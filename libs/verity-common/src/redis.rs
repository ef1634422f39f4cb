use crate::types::{JobRecord, JobRequest, JobStatus};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics - defines only keys and encoding, not worker logic.
/// The CLI and the worker share these so queue and result keys never drift.

pub const QUEUE_KEY: &str = "verity:queue";
pub const RESULT_PREFIX: &str = "verity:result";
pub const STATUS_PREFIX: &str = "verity:status";

/// Generate result key for a job
pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

/// Generate status key for a job
pub fn status_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

fn encode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn decode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push a job to the submission queue (RPUSH, FIFO with BLPOP)
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &JobRequest,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(encode_error)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a job, blocking at most `timeout_seconds` so callers can observe shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<JobRequest>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: JobRequest = serde_json::from_str(&payload).map_err(decode_error)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Record a job's lifecycle status with a TTL
pub async fn set_status(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
    status: JobStatus,
    ttl_seconds: u64,
) -> RedisResult<()> {
    let payload = serde_json::to_string(&status).map_err(encode_error)?;
    conn.set_ex(status_key(job_id), payload, ttl_seconds).await
}

/// Current status; `None` when the job is unknown or its status expired
pub async fn get_status(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobStatus>> {
    let payload: Option<String> = conn.get(status_key(job_id)).await?;
    payload
        .map(|data| serde_json::from_str(&data).map_err(decode_error))
        .transpose()
}

/// Store a finished job record and its status with a TTL
pub async fn store_record(
    conn: &mut redis::aio::ConnectionManager,
    record: &JobRecord,
    ttl_seconds: u64,
) -> RedisResult<()> {
    let payload = serde_json::to_string(record).map_err(encode_error)?;
    let _: () = conn.set_ex(result_key(&record.job_id), payload, ttl_seconds).await?;

    set_status(conn, &record.job_id, record.status, ttl_seconds).await
}

/// Retrieve a job record; `None` while the job is queued or running
pub async fn get_record(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobRecord>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let record: JobRecord = serde_json::from_str(&data).map_err(decode_error)?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = result_key(&id);
        let key2 = result_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("verity:result:"));
    }

    #[test]
    fn test_status_key_format() {
        let id = Uuid::new_v4();
        let key = status_key(&id);
        assert!(key.starts_with("verity:status:"));
        assert!(key.contains(&id.to_string()));
    }
}

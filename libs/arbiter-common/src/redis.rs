use crate::types::{JobOutcome, JobRequest};
use redis::{AsyncCommands, RedisResult};

// Redis queue semantics shared by the API and the worker.
// Only key layout and (de)serialization live here.

pub const QUEUE_KEY: &str = "arbiter:queue";
pub const RESULT_PREFIX: &str = "arbiter:result";
pub const STATUS_PREFIX: &str = "arbiter:status";
pub const CANCEL_PREFIX: &str = "arbiter:cancel";

/// Outcomes are a hand-off to the caller, not a history store
pub const OUTCOME_TTL_SECONDS: u64 = 3600;

pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

pub fn status_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

pub fn cancel_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, job_id)
}

fn encode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn decode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push a job onto the queue (RPUSH, FIFO with `pop_job`)
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &JobRequest,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(encode_error)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop the next job (BLPOP). The timeout lets the worker notice shutdown.
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

/// Store a finished job's outcome plus its status for quick lookup
pub async fn store_outcome(
    conn: &mut redis::aio::ConnectionManager,
    outcome: &JobOutcome,
) -> RedisResult<()> {
    let payload = serde_json::to_string(outcome).map_err(encode_error)?;
    let _: () = conn
        .set_ex(result_key(&outcome.job_id), payload, OUTCOME_TTL_SECONDS as _)
        .await?;

    let status = serde_json::to_string(&outcome.status).map_err(encode_error)?;
    let _: () = conn
        .set_ex(status_key(&outcome.job_id), status, OUTCOME_TTL_SECONDS as _)
        .await?;

    Ok(())
}

pub async fn get_outcome(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobOutcome>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let outcome: JobOutcome = serde_json::from_str(&data).map_err(decode_error)?;
            Ok(Some(outcome))
        }
        None => Ok(None),
    }
}

/// Flag a job as cancelled. The worker polls this while the job runs.
pub async fn request_cancel(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<()> {
    conn.set_ex(cancel_key(job_id), "1", OUTCOME_TTL_SECONDS as _).await
}

pub async fn is_cancelled(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<bool> {
    conn.exists(cancel_key(job_id)).await
}

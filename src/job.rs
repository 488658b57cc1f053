use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// Job id used when the inbound message could not be decoded at all
pub const UNKNOWN_JOB_ID: &str = "unknown";

/// Output recorded for an execution that hit the time limit
pub const TIME_LIMIT_MARKER: &str = "Time limit exceeded";

/// A job description decoded from an inbound queue message
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_id: String,
    #[serde(alias = "artifactRef")]
    pub s3_key: String,
    pub language: String,
}

impl JobMessage {
    /// Decodes a message body, ignoring unknown fields
    pub fn decode(body: &str) -> Result<Self, WorkerError> {
        let job: JobMessage =
            serde_json::from_str(body).map_err(|e| WorkerError::Decode(e.to_string()))?;

        if job.job_id.trim().is_empty() {
            return Err(WorkerError::Decode("jobId must not be empty".to_string()));
        }

        Ok(job)
    }
}

/// What the sandbox produced for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Combined stdout/stderr of the container, possibly empty
    pub raw_output: String,
    /// Wall-clock time between spawn and completion (or forced kill)
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn completed(raw_output: String, elapsed: Duration) -> Self {
        Self {
            raw_output,
            duration_ms: elapsed.as_millis() as u64,
            timed_out: false,
        }
    }

    pub fn timed_out(elapsed: Duration) -> Self {
        Self {
            raw_output: TIME_LIMIT_MARKER.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            timed_out: true,
        }
    }
}

/// Structured result of a job, exactly one shape per job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPayload {
    /// Text following the `RESULT:` prefix, passed through untouched
    Success(String),
    /// Failure summary, rendered as `{"status":"error","message":...}`
    Error { message: String },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    message: &'a str,
}

impl ResultPayload {
    /// Renders the payload as the JSON text embedded in the envelope
    pub fn to_json(&self) -> String {
        match self {
            Self::Success(raw) => raw.clone(),
            Self::Error { message } => {
                let body = ErrorBody {
                    status: "error",
                    message,
                };
                // A struct of two strings always serializes
                serde_json::to_string(&body).unwrap_or_else(|_| {
                    r#"{"status":"error","message":"Unknown error"}"#.to_string()
                })
            }
        }
    }
}

/// The outcome of a completed job, as published on the response channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEnvelope {
    pub job_id: String,
    pub execution_time_ms: u64,
    pub payload: ResultPayload,
}

impl ResultEnvelope {
    pub fn new(job: &JobMessage, outcome: &ExecutionOutcome, payload: ResultPayload) -> Self {
        Self {
            job_id: job.job_id.clone(),
            execution_time_ms: outcome.duration_ms,
            payload,
        }
    }

    /// Renders `{"jobId":...,"executionTimeMs":...,"result":<payload>}`.
    ///
    /// The payload is spliced in verbatim: a success payload is whatever the
    /// sandboxed program printed and is not re-parsed here.
    pub fn render(&self) -> String {
        let job_id = serde_json::Value::String(self.job_id.clone());
        format!(
            "{{\"jobId\":{},\"executionTimeMs\":{},\"result\":{}}}",
            job_id,
            self.execution_time_ms,
            self.payload.to_json()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_job_message() {
        let job = JobMessage::decode(
            r#"{"jobId":"job-123", "language":"java", "s3Key":"path/file.java", "extra":1}"#,
        )
        .unwrap();
        assert_eq!(job.job_id, "job-123");
        assert_eq!(job.s3_key, "path/file.java");
        assert_eq!(job.language, "java");

        let job =
            JobMessage::decode(r#"{"jobId":"a","artifactRef":"x/y.py","language":"python"}"#)
                .unwrap();
        assert_eq!(job.s3_key, "x/y.py");
    }

    #[test]
    fn test_decode_rejects_malformed_messages() {
        assert!(matches!(
            JobMessage::decode("invalid-json"),
            Err(WorkerError::Decode(_))
        ));
        assert!(matches!(
            JobMessage::decode(r#"{"jobId":"a","language":"java"}"#),
            Err(WorkerError::Decode(_))
        ));
        assert!(matches!(
            JobMessage::decode(r#"{"jobId":" ","s3Key":"a.py","language":"python"}"#),
            Err(WorkerError::Decode(_))
        ));
    }

    #[test]
    fn test_render_envelope() {
        let job = JobMessage {
            job_id: "job-123".to_string(),
            s3_key: "path/file.java".to_string(),
            language: "java".to_string(),
        };
        let outcome = ExecutionOutcome::completed(String::new(), Duration::from_millis(120));
        let envelope = ResultEnvelope::new(
            &job,
            &outcome,
            ResultPayload::Success(r#"{"success":true}"#.to_string()),
        );
        assert_eq!(
            envelope.render(),
            r#"{"jobId":"job-123","executionTimeMs":120,"result":{"success":true}}"#
        );
    }

    #[test]
    fn test_error_payload_is_valid_json() {
        let payload = ResultPayload::Error {
            message: r"C:\temp 'x'".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&payload.to_json()).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], r"C:\temp 'x'");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One literal test case as authored next to a problem.
///
/// `input` is an assignment list (`nums = [1,2], target = 3`) or a short
/// script; `output` is a literal, or empty for execution-only cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(default)]
    pub output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Input contract of the harness: `run(code, testCases)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub code: String,
    #[serde(rename = "testCases", alias = "test_cases")]
    pub test_cases: Vec<TestCase>,
}

/// Per-case entry of a verdict, always carrying display strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// 1-based position of the case in the request.
    #[serde(rename = "case")]
    pub index: usize,
    pub passed: bool,
    pub input: String,
    pub expected: String,
    pub actual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output contract of the harness.
///
/// `success == false` means the submission could not be run at all
/// (timeout, crash, unreadable runner output). `passed` is only meaningful
/// when `success` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub passed: bool,
    pub results: Vec<CaseResult>,
    pub logs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl RunOutcome {
    /// Harness-level failure: no case results are salvaged.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            passed: false,
            results: Vec::new(),
            logs: String::new(),
            error: Some(error.into()),
            stderr: None,
        }
    }
}

/// A queued submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: RunRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub submitted_at: DateTime<Utc>,
}

impl JobRequest {
    pub fn new(request: RunRequest, timeout_ms: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            timeout_ms,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed when the harness ran the submission, regardless of verdict.
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        if outcome.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    /// A record exists only for terminal statuses.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// What the worker persists for a finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_both_spellings() {
        let camel: RunRequest =
            serde_json::from_str(r#"{"code":"x","testCases":[{"input":"a = 1","output":"1"}]}"#)
                .unwrap();
        let snake: RunRequest =
            serde_json::from_str(r#"{"code":"x","test_cases":[{"input":"a = 1"}]}"#).unwrap();

        assert_eq!(camel.test_cases[0].output, "1");
        assert!(snake.test_cases[0].output.is_empty());
    }

    #[test]
    fn test_case_result_wire_shape() {
        let result = CaseResult {
            index: 2,
            passed: false,
            input: "n = 3".to_string(),
            expected: "6".to_string(),
            actual: "5".to_string(),
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["case"], 2);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_outcome_has_no_results() {
        let outcome = RunOutcome::failure("Timeout");
        assert!(!outcome.success);
        assert!(outcome.results.is_empty());
        assert_eq!(JobStatus::from_outcome(&outcome), JobStatus::Failed);
    }

    #[test]
    fn test_status_wire_form_matches_display() {
        for status in [JobStatus::Pending, JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{}\"", status.as_str()));
            assert_eq!(serde_json::from_str::<JobStatus>(&wire).unwrap(), status);
        }
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_request_flattens_run_request() {
        let job = JobRequest::new(
            RunRequest {
                code: "def f(): pass".to_string(),
                test_cases: vec![TestCase::new("", "")],
            },
            Some(2000),
        );
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["code"], "def f(): pass");
        assert_eq!(json["timeout_ms"], 2000);

        let back: JobRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, job.id);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on submitted source size (50 KB)
pub const MAX_CODE_BYTES: usize = 50 * 1024;
/// Upper bound on test cases per request
pub const MAX_TEST_CASES: usize = 100;
/// Upper bound on a single test case input or expected output (1 MB)
pub const MAX_CASE_TEXT_BYTES: usize = 1024 * 1024;

pub const MIN_TIME_LIMIT_MS: u64 = 100;
pub const MAX_TIME_LIMIT_MS: u64 = 30_000;
pub const MIN_MEMORY_LIMIT_MB: u64 = 16;
pub const MAX_MEMORY_LIMIT_MB: u64 = 1024;

/// Closed set of languages the judge knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::Cpp,
    ];

    /// Parse a language identifier, accepting the common aliases.
    /// Returns `None` for anything outside the closed set.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            "cpp" | "c++" | "cxx" => Some(Language::Cpp),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// One submission to judge. Immutable once built by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub language: Language,
    pub code: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("source code is empty")]
    EmptyCode,
    #[error("source code is {0} bytes, limit is 50 KB")]
    CodeTooLarge(usize),
    #[error("at least one test case is required")]
    NoTestCases,
    #[error("{0} test cases submitted, limit is 100")]
    TooManyTestCases(usize),
    #[error("test case {0} exceeds 1 MB")]
    TestCaseTooLarge(usize),
    #[error("time limit {0}ms is outside 100..=30000ms")]
    TimeLimitOutOfRange(u64),
    #[error("memory limit {0}MB is outside 16..=1024MB")]
    MemoryLimitOutOfRange(u64),
}

impl ExecutionRequest {
    /// Check the request against the size and limit bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.code.trim().is_empty() {
            return Err(ValidationError::EmptyCode);
        }
        if self.code.len() > MAX_CODE_BYTES {
            return Err(ValidationError::CodeTooLarge(self.code.len()));
        }
        if self.test_cases.is_empty() {
            return Err(ValidationError::NoTestCases);
        }
        if self.test_cases.len() > MAX_TEST_CASES {
            return Err(ValidationError::TooManyTestCases(self.test_cases.len()));
        }
        for (idx, tc) in self.test_cases.iter().enumerate() {
            if tc.input.len() > MAX_CASE_TEXT_BYTES || tc.expected_output.len() > MAX_CASE_TEXT_BYTES {
                return Err(ValidationError::TestCaseTooLarge(idx + 1));
            }
        }
        if let Some(ms) = self.time_limit_ms {
            if !(MIN_TIME_LIMIT_MS..=MAX_TIME_LIMIT_MS).contains(&ms) {
                return Err(ValidationError::TimeLimitOutOfRange(ms));
            }
        }
        if let Some(mb) = self.memory_limit_mb {
            if !(MIN_MEMORY_LIMIT_MB..=MAX_MEMORY_LIMIT_MB).contains(&mb) {
                return Err(ValidationError::MemoryLimitOutOfRange(mb));
            }
        }
        Ok(())
    }
}

/// Why a test case did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    CompileFailure,
    Timeout,
    RuntimeFailure,
    WrongAnswer,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::CompileFailure => "compile_failure",
            FailureKind::Timeout => "timeout",
            FailureKind::RuntimeFailure => "runtime_failure",
            FailureKind::WrongAnswer => "wrong_answer",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub passed: bool,
    pub input: String,
    pub expected: String,
    pub actual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub execution_time_ms: u64,
    pub memory_used_mb: f64,
}

/// Coarse complexity bucket. Inferred from timing growth, so approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComplexityClass {
    #[serde(rename = "O(1)")]
    Constant,
    #[serde(rename = "O(n)")]
    Linear,
    #[serde(rename = "O(n log n)")]
    Linearithmic,
    #[serde(rename = "O(n^2)")]
    Quadratic,
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComplexityClass::Constant => "O(1)",
            ComplexityClass::Linear => "O(n)",
            ComplexityClass::Linearithmic => "O(n log n)",
            ComplexityClass::Quadratic => "O(n^2)",
        };
        f.write_str(label)
    }
}

/// The only externally visible output of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub success: bool,
    pub all_passed: bool,
    pub results: Vec<TestResult>,
    pub total_time_ms: u64,
    pub avg_memory_mb: f64,
    pub time_complexity: ComplexityClass,
    pub space_complexity: ComplexityClass,
}

impl ExecutionSummary {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

/// Queue envelope for a request travelling from the API to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub id: Uuid,
    pub request: ExecutionRequest,
    pub submitted_at: DateTime<Utc>,
}

impl JobRequest {
    pub fn new(request: ExecutionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecutionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn completed(job_id: Uuid, summary: ExecutionSummary) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            summary: Some(summary),
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(job_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            summary: None,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }

    pub fn cancelled(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Cancelled,
            summary: None,
            error: None,
            finished_at: Utc::now(),
        }
    }
}

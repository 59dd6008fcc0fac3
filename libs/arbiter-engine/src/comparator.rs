/// Comparator - language-agnostic verdicts for a single test case
///
/// **Critical Properties:**
/// - Knows nothing about containers or language runtimes
/// - Pure function: (case, step outcome) → TestResult
///
/// **Normalization Rules (applied to all languages):**
/// - Trim leading and trailing whitespace: YES
/// - Ignore newline differences (\n vs \r\n) at the ends: YES (via trim)
/// - Case sensitivity: YES (exact match required)
/// - Floating-point tolerance: NO
///
/// **Verdict priority:**
/// 1. Compile failure (no run happened)
/// 2. Timeout
/// 3. Non-zero exit
/// 4. Output comparison

use crate::sandbox::{StepError, StepOutput};
use arbiter_common::types::{FailureKind, TestCase, TestResult};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Strip surrounding whitespace, preserving everything inside
pub fn normalize(output: &str) -> &str {
    output.trim()
}

pub fn compare(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}

/// What happened to one case before judging
#[derive(Debug, Clone)]
pub enum CaseOutcome {
    /// The compile step failed; carries the compiler diagnostics
    CompileFailed(String),
    /// The run step finished, one way or another
    Ran(Result<StepOutput, StepError>),
}

pub fn evaluate(case: &TestCase, outcome: CaseOutcome) -> TestResult {
    let expected = normalize(&case.expected_output).to_string();

    let result = |passed, actual: &str, error: Option<String>, failure, time_ms, memory_bytes: u64| TestResult {
        passed,
        input: case.input.clone(),
        expected: expected.clone(),
        actual: normalize(actual).to_string(),
        error,
        failure,
        execution_time_ms: time_ms,
        memory_used_mb: memory_bytes as f64 / BYTES_PER_MB,
    };

    match outcome {
        CaseOutcome::CompileFailed(diagnostics) => result(
            false,
            "",
            Some(diagnostics),
            Some(FailureKind::CompileFailure),
            0,
            0,
        ),
        CaseOutcome::Ran(Err(StepError::Timeout { limit_ms, elapsed_ms })) => result(
            false,
            "",
            Some(format!("Time limit exceeded ({}ms)", limit_ms)),
            Some(FailureKind::Timeout),
            elapsed_ms,
            0,
        ),
        CaseOutcome::Ran(Err(StepError::NonZeroExit {
            exit_code,
            stderr,
            elapsed_ms,
            peak_memory_bytes,
        })) => {
            let message = match normalize(&stderr) {
                "" => format!("Process exited with status {}", exit_code),
                text => text.to_string(),
            };
            result(
                false,
                "",
                Some(message),
                Some(FailureKind::RuntimeFailure),
                elapsed_ms,
                peak_memory_bytes,
            )
        }
        // normally consumed by the sandbox runner's retry loop
        CaseOutcome::Ran(Err(StepError::RuntimeUnavailable(message))) => result(
            false,
            "",
            Some(message),
            Some(FailureKind::RuntimeFailure),
            0,
            0,
        ),
        CaseOutcome::Ran(Ok(output)) => {
            if compare(&output.stdout, &case.expected_output) {
                result(
                    true,
                    &output.stdout,
                    None,
                    None,
                    output.elapsed_ms,
                    output.peak_memory_bytes,
                )
            } else {
                result(
                    false,
                    &output.stdout,
                    Some("Wrong answer".to_string()),
                    Some(FailureKind::WrongAnswer),
                    output.elapsed_ms,
                    output.peak_memory_bytes,
                )
            }
        }
    }
}

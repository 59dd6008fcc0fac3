/// Test Case Orchestrator - the engine's single entry point
///
/// **Flow for one request:**
/// 1. Resolve the runtime profile (nothing is allocated for unknown languages)
/// 2. Validate the request
/// 3. Acquire a workspace
/// 4. Prepare every case's source with the driver harness
/// 5. Stage one `shared` slot when all prepared sources are identical
///    (compile once), otherwise one `case-<n>` slot per case
/// 6. Per case: Prepared → Compiled → Run → Compared → Resolved
/// 7. Release the workspace, aggregate, estimate complexity
///
/// Cases run through a bounded pool (`max_parallel_cases`); results are
/// always reported in input order. Dropping the `execute` future cancels
/// every in-flight sandbox and removes the workspace.

use crate::comparator::{self, CaseOutcome};
use crate::complexity;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::harness;
use crate::registry::{LanguageRegistry, RuntimeProfile};
use crate::sandbox::{ContainerRuntime, SandboxRunner, Step, StepError};
use crate::workspace::{Slot, Workspace, WorkspaceManager};
use arbiter_common::types::{
    ExecutionRequest, ExecutionSummary, FailureKind, TestCase, TestResult,
};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SHARED_SLOT: &str = "shared";

/// Where a case stands with respect to compilation when it starts running
#[derive(Debug, Clone)]
enum CompileState {
    /// Nothing to compile, or the shared build already succeeded
    Ready,
    /// The shared build failed; carries the diagnostics
    Failed(String),
    /// The case owns its slot and must compile it first
    Pending,
}

/// Read-only context shared by every case of one request
struct CaseContext<'a> {
    profile: &'a RuntimeProfile,
    execution_id: Uuid,
    code: &'a str,
    time_limit_ms: u64,
    memory_limit_mb: u64,
}

pub struct Executor {
    registry: Arc<LanguageRegistry>,
    workspaces: WorkspaceManager,
    sandbox: SandboxRunner,
}

impl Executor {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        config: EngineConfig,
    ) -> Self {
        let config = config.normalized();
        Self {
            registry,
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            sandbox: SandboxRunner::new(runtime, config),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        self.sandbox.config()
    }

    /// Judge `request` against every test case
    #[tracing::instrument(
        skip(self, request),
        fields(language = %request.language, cases = request.test_cases.len())
    )]
    pub async fn execute(&self, request: &ExecutionRequest) -> EngineResult<ExecutionSummary> {
        let profile = self.registry.profile_for(request.language)?;
        request.validate()?;

        let config = self.config();
        let time_limit_ms = request.time_limit_ms.unwrap_or(config.default_time_limit_ms);
        // the configured default acts as a floor under each language's own default
        let memory_limit_mb = request
            .memory_limit_mb
            .unwrap_or_else(|| profile.memory_limit_mb.max(config.default_memory_limit_mb));

        let workspace = self.workspaces.acquire()?;
        let ctx = CaseContext {
            profile,
            execution_id: workspace.id(),
            code: &request.code,
            time_limit_ms,
            memory_limit_mb,
        };

        info!(
            execution_id = %ctx.execution_id,
            time_limit_ms,
            memory_limit_mb,
            "Starting execution"
        );

        let outcome = self.run_cases(&ctx, &workspace, &request.test_cases).await;
        workspace.release().await;

        let results = outcome?;
        let summary = summarize(results);

        info!(
            execution_id = %ctx.execution_id,
            passed = summary.passed_count(),
            total = summary.results.len(),
            total_time_ms = summary.total_time_ms,
            "Execution finished"
        );

        Ok(summary)
    }

    async fn run_cases(
        &self,
        ctx: &CaseContext<'_>,
        workspace: &Workspace,
        cases: &[TestCase],
    ) -> EngineResult<Vec<TestResult>> {
        let prepared: Vec<String> = cases
            .iter()
            .map(|case| harness::prepare(ctx.code, &case.input, ctx.profile))
            .collect();

        let shared = prepared.windows(2).all(|pair| pair[0] == pair[1]);

        let (slots, compile_states) = if shared {
            let slot = workspace.stage(SHARED_SLOT, &ctx.profile.source_file, &prepared[0])?;
            let state = if ctx.profile.needs_compile() {
                match self.compile(ctx, &slot).await? {
                    Ok(()) => CompileState::Ready,
                    Err(diagnostics) => CompileState::Failed(diagnostics),
                }
            } else {
                CompileState::Ready
            };
            (vec![slot; cases.len()], vec![state; cases.len()])
        } else {
            debug!(execution_id = %ctx.execution_id, "Prepared sources differ, staging per-case slots");
            let mut slots = Vec::with_capacity(cases.len());
            for (index, source) in prepared.iter().enumerate() {
                let name = format!("case-{}", index + 1);
                slots.push(workspace.stage(&name, &ctx.profile.source_file, source)?);
            }
            let state = if ctx.profile.needs_compile() {
                CompileState::Pending
            } else {
                CompileState::Ready
            };
            (slots, vec![state; cases.len()])
        };

        let parallelism = self.config().max_parallel_cases;

        let jobs: Vec<_> = cases
            .iter()
            .zip(prepared.iter())
            .zip(slots.iter().zip(compile_states))
            .enumerate()
            .map(|(index, ((case, source), (slot, state)))| {
                self.run_case(ctx, index, case, source, slot, state)
            })
            .collect();

        // `buffered` keeps input order; the first engine error drops the rest
        stream::iter(jobs)
            .buffered(parallelism)
            .try_collect()
            .await
    }

    async fn compile(&self, ctx: &CaseContext<'_>, slot: &Slot) -> EngineResult<Result<(), String>> {
        // compilers get at least the language's own budget, whatever the user asked for
        let memory_limit_mb = ctx.memory_limit_mb.max(ctx.profile.memory_limit_mb);

        let step = self
            .sandbox
            .run_step(
                ctx.profile,
                Step::Compile,
                ctx.execution_id,
                slot,
                "",
                ctx.time_limit_ms,
                memory_limit_mb,
            )
            .await?;

        match step {
            Ok(_) => {
                debug!(execution_id = %ctx.execution_id, slot = %slot.name, "Compilation succeeded");
                Ok(Ok(()))
            }
            Err(StepError::NonZeroExit { stderr, exit_code, .. }) => {
                warn!(execution_id = %ctx.execution_id, slot = %slot.name, exit_code, "Compilation failed");
                let diagnostics = match comparator::normalize(&stderr) {
                    "" => format!("Compiler exited with status {}", exit_code),
                    text => text.to_string(),
                };
                Ok(Err(diagnostics))
            }
            Err(StepError::Timeout { limit_ms, .. }) => {
                warn!(execution_id = %ctx.execution_id, slot = %slot.name, limit_ms, "Compilation timed out");
                Ok(Err(format!("Compilation timed out after {}ms", limit_ms)))
            }
            Err(StepError::RuntimeUnavailable(message)) => Err(EngineError::RuntimeUnavailable {
                attempts: 1,
                message,
            }),
        }
    }

    async fn run_case(
        &self,
        ctx: &CaseContext<'_>,
        index: usize,
        case: &TestCase,
        prepared: &str,
        slot: &Slot,
        state: CompileState,
    ) -> EngineResult<TestResult> {
        let compile_failure = match state {
            CompileState::Ready => None,
            CompileState::Failed(diagnostics) => Some(diagnostics),
            CompileState::Pending => self.compile(ctx, slot).await?.err(),
        };

        let outcome = match compile_failure {
            Some(diagnostics) => CaseOutcome::CompileFailed(diagnostics),
            None => {
                let stdin = harness::stdin_for(prepared, ctx.code, &case.input);
                let step = self
                    .sandbox
                    .run_step(
                        ctx.profile,
                        Step::Run,
                        ctx.execution_id,
                        slot,
                        &stdin,
                        ctx.time_limit_ms,
                        ctx.memory_limit_mb,
                    )
                    .await?;
                CaseOutcome::Ran(step)
            }
        };

        let result = comparator::evaluate(case, outcome);
        info!(
            execution_id = %ctx.execution_id,
            case = index + 1,
            passed = result.passed,
            failure = ?result.failure,
            time_ms = result.execution_time_ms,
            "Test case resolved"
        );
        Ok(result)
    }
}

fn summarize(results: Vec<TestResult>) -> ExecutionSummary {
    let all_passed = results.iter().all(|r| r.passed);
    // every case reached the run step
    let success = !results
        .iter()
        .any(|r| r.failure == Some(FailureKind::CompileFailure));
    let total_time_ms = results.iter().map(|r| r.execution_time_ms).sum();

    let measured: Vec<f64> = results
        .iter()
        .map(|r| r.memory_used_mb)
        .filter(|mb| *mb > 0.0)
        .collect();
    let avg_memory_mb = if measured.is_empty() {
        0.0
    } else {
        measured.iter().sum::<f64>() / measured.len() as f64
    };

    let (time_complexity, space_complexity) = complexity::estimate(&complexity::samples_from(&results));

    ExecutionSummary {
        success,
        all_passed,
        results,
        total_time_ms,
        avg_memory_mb,
        time_complexity,
        space_complexity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ContainerSpec, StepOutput};
    use arbiter_common::types::Language;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    type Script = Box<dyn Fn(&str, &str) -> Result<StepOutput, StepError> + Send + Sync>;

    #[derive(Debug, Clone)]
    struct Call {
        step: String,
        stdin: String,
        src_mount: String,
        execution: String,
        container: String,
    }

    /// Answers each step from a script keyed on (step, stdin)
    struct ScriptedRuntime {
        script: Script,
        delay: Box<dyn Fn(&str) -> Duration + Send + Sync>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedRuntime {
        fn new(script: impl Fn(&str, &str) -> Result<StepOutput, StepError> + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                delay: Box::new(|_| Duration::ZERO),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
            self.delay = Box::new(delay);
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, step: &str) -> usize {
            self.calls().iter().filter(|c| c.step == step).count()
        }
    }

    #[async_trait]
    impl ContainerRuntime for ScriptedRuntime {
        async fn start(&self, spec: &ContainerSpec, stdin: &str, _timeout: Duration) -> Result<StepOutput, StepError> {
            let step = spec.labels.get("arbiter.step").cloned().unwrap_or_default();
            self.calls.lock().unwrap().push(Call {
                step: step.clone(),
                stdin: stdin.to_string(),
                src_mount: spec.mounts[0].host_path.display().to_string(),
                execution: spec.labels.get("arbiter.execution").cloned().unwrap_or_default(),
                container: spec.name.clone(),
            });

            let delay = (self.delay)(stdin);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            (self.script)(&step, stdin)
        }
    }

    fn echo(stdin: &str) -> Result<StepOutput, StepError> {
        Ok(StepOutput {
            stdout: format!("{}\n", stdin),
            stderr: String::new(),
            elapsed_ms: 10,
            peak_memory_bytes: 4 * 1024 * 1024,
        })
    }

    fn executor(root: &Path, runtime: Arc<ScriptedRuntime>, parallel: usize) -> Executor {
        let config = EngineConfig {
            workspace_root: root.to_path_buf(),
            max_parallel_cases: parallel,
            runtime_retries: 0,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        Executor::new(Arc::new(LanguageRegistry::builtin()), runtime, config)
    }

    fn request(language: Language, code: &str, cases: &[(&str, &str)]) -> ExecutionRequest {
        ExecutionRequest {
            language,
            code: code.to_string(),
            test_cases: cases
                .iter()
                .map(|(input, expected)| TestCase {
                    input: input.to_string(),
                    expected_output: expected.to_string(),
                })
                .collect(),
            time_limit_ms: None,
            memory_limit_mb: None,
        }
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    const ECHO_PY: &str = "print(input())\n";

    #[tokio::test]
    async fn test_all_pass_and_workspace_removed() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, stdin| echo(stdin)));
        let exec = executor(root.path(), runtime.clone(), 1);

        let summary = exec
            .execute(&request(Language::Python, ECHO_PY, &[("1", "1"), ("2", "2")]))
            .await
            .unwrap();

        assert!(summary.success);
        assert!(summary.all_passed);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.total_time_ms, 20);
        assert_eq!(summary.avg_memory_mb, 4.0);
        assert_eq!(runtime.count("run"), 2);
        assert_eq!(runtime.count("compile"), 0);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_repeated_request_gives_same_verdicts() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, stdin| match stdin {
            "boom" => Err(StepError::NonZeroExit {
                exit_code: 1,
                stderr: "ZeroDivisionError: division by zero".into(),
                elapsed_ms: 5,
                peak_memory_bytes: 0,
            }),
            _ => echo(stdin),
        }));
        let exec = executor(root.path(), runtime.clone(), 2);
        let req = request(Language::Python, ECHO_PY, &[("1", "1"), ("2", "3"), ("boom", "0")]);

        let verdicts = |summary: &ExecutionSummary| -> Vec<(bool, Option<FailureKind>, String)> {
            summary
                .results
                .iter()
                .map(|r| (r.passed, r.failure, r.actual.clone()))
                .collect()
        };

        let first = exec.execute(&req).await.unwrap();
        let second = exec.execute(&req).await.unwrap();

        assert_eq!(verdicts(&first), verdicts(&second));
        assert_eq!(
            verdicts(&first).iter().map(|v| v.1).collect::<Vec<_>>(),
            vec![None, Some(FailureKind::WrongAnswer), Some(FailureKind::RuntimeFailure)]
        );
        assert_eq!(first.all_passed, second.all_passed);

        // nothing from the first run is visible to the second
        let calls = runtime.calls();
        let (a, b) = calls.split_at(3);
        assert!(a.iter().all(|c| b.iter().all(|d| c.src_mount != d.src_mount)));
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_nothing() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(
            ScriptedRuntime::new(|step, stdin| match step {
                "compile" => Ok(StepOutput::default()),
                _ => echo(stdin),
            })
            .with_delay(|_| Duration::from_millis(20)),
        );
        let exec = executor(root.path(), runtime.clone(), 2);

        let code = "#include <iostream>\nint main() { std::string s; std::cin >> s; std::cout << s; }\n";
        let first = request(Language::Cpp, code, &[("1", "1"), ("2", "2")]);
        let second = request(Language::Cpp, code, &[("3", "3"), ("4", "4")]);

        let (a, b) = tokio::join!(exec.execute(&first), exec.execute(&second));
        assert!(a.unwrap().all_passed);
        assert!(b.unwrap().all_passed);

        let calls = runtime.calls();
        assert_eq!(calls.len(), 6);

        let mut executions: Vec<&str> = calls.iter().map(|c| c.execution.as_str()).collect();
        executions.sort();
        executions.dedup();
        assert_eq!(executions.len(), 2);

        let workspace_of = |call: &Call| {
            Path::new(&call.src_mount)
                .ancestors()
                .nth(2)
                .map(Path::to_path_buf)
                .unwrap()
        };
        for call in &calls {
            for other in calls.iter().filter(|o| o.execution != call.execution) {
                assert_ne!(workspace_of(call), workspace_of(other));
            }
        }

        let mut containers: Vec<&str> = calls.iter().map(|c| c.container.as_str()).collect();
        containers.sort();
        containers.dedup();
        assert_eq!(containers.len(), calls.len());

        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_parallel_results_keep_input_order() {
        let root = tempfile::tempdir().unwrap();
        // later cases finish first
        let runtime = Arc::new(
            ScriptedRuntime::new(|_, stdin| echo(stdin))
                .with_delay(|stdin| Duration::from_millis(80 - 10 * stdin.parse::<u64>().unwrap_or(0))),
        );
        let exec = executor(root.path(), runtime.clone(), 4);

        let cases: Vec<(String, String)> = (1..=6).map(|i| (i.to_string(), i.to_string())).collect();
        let cases: Vec<(&str, &str)> = cases.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let summary = exec.execute(&request(Language::Python, ECHO_PY, &cases)).await.unwrap();

        let inputs: Vec<&str> = summary.results.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["1", "2", "3", "4", "5", "6"]);
        assert!(summary.all_passed);
    }

    #[tokio::test]
    async fn test_wrong_answer_is_not_all_passed() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, stdin| echo(stdin)));
        let exec = executor(root.path(), runtime, 1);

        let summary = exec
            .execute(&request(Language::Python, ECHO_PY, &[("1", "1"), ("2", "3")]))
            .await
            .unwrap();

        assert!(summary.success);
        assert!(!summary.all_passed);
        assert_eq!(summary.passed_count(), 1);
        assert_eq!(summary.results[1].failure, Some(FailureKind::WrongAnswer));
        assert_eq!(summary.results[1].actual, "2");
    }

    #[tokio::test]
    async fn test_function_submission_gets_per_case_slots_and_no_stdin() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, _| echo("[0,1]")));
        let exec = executor(root.path(), runtime.clone(), 1);

        let code = "def twoSum(nums, target):\n    return [0, 1]\n";
        let summary = exec
            .execute(&request(
                Language::Python,
                code,
                &[("[2,7,11,15], 9", "[0,1]"), ("[3,3], 6", "[0,1]")],
            ))
            .await
            .unwrap();

        assert!(summary.all_passed);
        let calls = runtime.calls();
        assert!(calls.iter().all(|c| c.stdin.is_empty()));
        assert!(calls[0].src_mount.contains("case-1"));
        assert!(calls[1].src_mount.contains("case-2"));
    }

    #[tokio::test]
    async fn test_identical_sources_compile_once() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|step, stdin| match step {
            "compile" => Ok(StepOutput::default()),
            _ => echo(stdin),
        }));
        let exec = executor(root.path(), runtime.clone(), 2);

        let code = "#include <iostream>\nint main() { int x; std::cin >> x; std::cout << x; }";
        let summary = exec
            .execute(&request(Language::Cpp, code, &[("1", "1"), ("2", "2"), ("3", "3")]))
            .await
            .unwrap();

        assert!(summary.all_passed);
        assert_eq!(runtime.count("compile"), 1);
        assert_eq!(runtime.count("run"), 3);
        assert!(runtime.calls().iter().all(|c| c.src_mount.contains("shared")));
    }

    #[tokio::test]
    async fn test_compile_failure_short_circuits_every_case() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|step, stdin| match step {
            "compile" => Err(StepError::NonZeroExit {
                exit_code: 1,
                stderr: "main.cpp:1:12: error: expected ';' before '}' token".to_string(),
                elapsed_ms: 300,
                peak_memory_bytes: 0,
            }),
            _ => echo(stdin),
        }));
        let exec = executor(root.path(), runtime.clone(), 1);

        let summary = exec
            .execute(&request(Language::Cpp, "int main() { return 0 }", &[("", "0"), ("", "0")]))
            .await
            .unwrap();

        assert!(!summary.success);
        assert!(!summary.all_passed);
        for result in &summary.results {
            assert_eq!(result.failure, Some(FailureKind::CompileFailure));
            assert!(result.error.as_deref().unwrap().contains("expected ';'"));
        }
        assert_eq!(runtime.count("run"), 0);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_timeout_reports_kind_and_capped_time() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, _| {
            Err(StepError::Timeout {
                limit_ms: 2000,
                elapsed_ms: 9000,
            })
        }));
        let exec = executor(root.path(), runtime, 1);

        let mut req = request(Language::Python, "while True:\n    pass\n", &[("", "1")]);
        req.time_limit_ms = Some(2000);
        let summary = exec.execute(&req).await.unwrap();

        let result = &summary.results[0];
        assert!(!result.passed);
        assert_eq!(result.failure, Some(FailureKind::Timeout));
        assert!(result.execution_time_ms <= 2000 + exec.config().timeout_grace_ms);
    }

    #[tokio::test]
    async fn test_runtime_failure_carries_stderr() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, _| {
            Err(StepError::NonZeroExit {
                exit_code: 1,
                stderr: "ZeroDivisionError: division by zero".to_string(),
                elapsed_ms: 15,
                peak_memory_bytes: 0,
            })
        }));
        let exec = executor(root.path(), runtime, 1);

        let summary = exec
            .execute(&request(Language::Python, "print(1 / 0)\n", &[("", "1")]))
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.results[0].failure, Some(FailureKind::RuntimeFailure));
        assert!(summary.results[0].error.as_deref().unwrap().contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_unsupported_language_allocates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, stdin| echo(stdin)));
        let registry = LanguageRegistry::from_profiles(
            LanguageRegistry::builtin()
                .profiles()
                .filter(|p| p.language == Language::Python)
                .cloned()
                .collect::<Vec<_>>(),
        );
        let config = EngineConfig {
            workspace_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let exec = Executor::new(Arc::new(registry), runtime.clone(), config);

        let err = exec
            .execute(&request(Language::Cpp, "int main() {}", &[("", "")]))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::UnsupportedLanguage(_)));
        assert!(runtime.calls().is_empty());
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, stdin| echo(stdin)));
        let exec = executor(root.path(), runtime.clone(), 1);

        let err = exec.execute(&request(Language::Python, "print(1)", &[])).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_unavailable_aborts_request() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_, _| {
            Err(StepError::RuntimeUnavailable("no such image: python:3.12-slim".to_string()))
        }));
        let exec = executor(root.path(), runtime, 1);

        let err = exec
            .execute(&request(Language::Python, ECHO_PY, &[("1", "1"), ("2", "2")]))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::RuntimeUnavailable { attempts: 1, .. }));
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_cancelled_execution_leaves_no_workspace() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(
            ScriptedRuntime::new(|_, stdin| echo(stdin)).with_delay(|_| Duration::from_secs(60)),
        );
        let exec = executor(root.path(), runtime.clone(), 1);
        let req = request(Language::Python, ECHO_PY, &[("1", "1")]);

        let outcome = tokio::time::timeout(Duration::from_millis(100), exec.execute(&req)).await;

        assert!(outcome.is_err());
        assert_eq!(runtime.count("run"), 1);
        assert!(is_empty_dir(root.path()));
    }
}

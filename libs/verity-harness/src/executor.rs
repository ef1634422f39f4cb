/// Submission Executor - High-Level Orchestration
///
/// **Responsibility:**
/// `run(code, testCases) -> verdict`: everything between a request and its
/// `RunOutcome`.
///
/// **Architecture:**
/// 1. Parse every case and discover the entry point (host only)
/// 2. Select a strategy and bind arguments into a `GuestPlan`
/// 3. Run the plan in a sandbox (engine.rs / docker.rs)
/// 4. Evaluate the driver's report (evaluator.rs)
///
/// Case-level problems are recorded on the case and never abort the run;
/// only discovery, load and sandbox-level failures are submission-wide.

use crate::config::HarnessConfig;
use crate::discovery::{discover, InvocableKind};
use crate::engine::{Payload, Sandbox};
use crate::evaluator::{self, EvaluatedCase, PreparedCase, Preparation};
use crate::parser::{parse_expected, parse_input, ParsedInput};
use crate::protocol::{split_report, EntryKind, GuestCase, GuestPlan, ScopeSource};
use crate::strategy::{select, Selection};
use std::time::Duration;
use tracing::{debug, info, warn};
use verity_common::types::{RunOutcome, RunRequest};

/// Callables whose tree-node result is reported as the node's value.
const NODE_AS_VALUE_CALLEES: &[&str] = &["lowestCommonAncestor"];

pub const TIMEOUT_ERROR: &str = "Timeout";

pub const OUTPUT_LIMIT_ERROR: &str = "Output limit exceeded";

/// Run a submission against its test cases
///
/// Never fails: infrastructure problems come back as `success = false`.
#[tracing::instrument(skip_all, fields(cases = request.test_cases.len(), backend = sandbox.name()))]
pub async fn run<S: Sandbox>(request: &RunRequest, sandbox: &S, config: &HarnessConfig) -> RunOutcome {
    let payload_limit = sandbox.payload_limit();
    let max_source_bytes = payload_limit.map_or(config.max_source_bytes, |l| l.min(config.max_source_bytes));
    if request.code.len() > max_source_bytes {
        return RunOutcome::failure(format!(
            "Source code exceeds maximum size of {} bytes",
            max_source_bytes
        ));
    }

    info!("→ Starting submission run");

    let mut prepared = Vec::with_capacity(request.test_cases.len());
    let mut parsed = Vec::with_capacity(request.test_cases.len());
    for (index, case) in request.test_cases.iter().enumerate() {
        let expected = parse_expected(&case.output);
        let input = if case.input.len() > config.max_case_input_bytes {
            Err(format!(
                "Test input exceeds maximum size of {} bytes",
                config.max_case_input_bytes
            ))
        } else {
            parse_input(&case.input).map_err(|e| format!("Could not parse test input: {}", e))
        };

        let state = match &input {
            Ok(_) => Preparation::Dispatched,
            Err(e) => Preparation::Failed(e.clone()),
        };
        prepared.push(PreparedCase {
            index,
            input: case.input.clone(),
            expected,
            callee: None,
            state,
        });
        parsed.push(input.ok());
    }

    let invocable = match discover(&request.code) {
        Ok(invocable) => invocable,
        Err(e) => {
            warn!(error = %e, "Discovery failed");
            return finish(&prepared, evaluator::fail_all(&prepared, &e.to_string()), String::new(), Some(e.to_string()), None);
        }
    };
    debug!(entry = %invocable.name, kind = ?invocable.kind, "Entry point discovered");

    let mut plan = GuestPlan {
        entry: invocable.name.clone(),
        kind: match invocable.kind {
            InvocableKind::Function => EntryKind::Function,
            InvocableKind::Class => EntryKind::Class,
        },
        cases: Vec::new(),
    };
    let mut plan_budget = PlanBudget::new(&plan, payload_limit);

    for (case, input) in prepared.iter_mut().zip(&parsed) {
        let Some(input) = input else { continue };
        match select(&invocable, input) {
            Ok(Selection::Tail(value)) => case.state = Preparation::Resolved(value),
            Ok(Selection::Call { call, callee }) => {
                let node_as_value = callee
                    .as_deref()
                    .map_or(false, |c| NODE_AS_VALUE_CALLEES.iter().any(|n| c.contains(n)));
                let guest_case = GuestCase {
                    index: case.index,
                    scope: scope_source(input),
                    call,
                    node_as_value,
                };
                if let Err(e) = plan_budget.admit(&guest_case) {
                    case.state = Preparation::Failed(e);
                    continue;
                }
                plan.cases.push(guest_case);
                case.callee = callee;
            }
            Err(e) => case.state = Preparation::Failed(e.to_string()),
        }
    }

    // The submission is loaded even when no case needs the guest, so a
    // broken module still fails the run.
    let plan = match serde_json::to_string(&plan) {
        Ok(plan) => plan,
        Err(e) => return RunOutcome::failure(format!("Failed to encode case plan: {}", e)),
    };
    let payload = Payload {
        source: request.code.clone(),
        plan,
    };

    let timeout = Duration::from_millis(config.timeout_ms);
    let output = match sandbox.run(&payload, timeout).await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Sandbox failed");
            return RunOutcome::failure(format!("Sandbox error: {:#}", e));
        }
    };

    if output.timed_out {
        warn!(elapsed_ms = output.elapsed_ms, "Submission timed out");
        return RunOutcome::failure(TIMEOUT_ERROR);
    }

    let stderr = (!output.stderr.trim().is_empty()).then(|| output.stderr.clone());

    if output.output_exceeded {
        warn!(cap = config.max_output_bytes, "Submission output passed the cap");
        return RunOutcome {
            logs: output.stdout,
            stderr,
            ..RunOutcome::failure(format!(
                "{}: more than {} bytes written",
                OUTPUT_LIMIT_ERROR, config.max_output_bytes
            ))
        };
    }

    if !output.exited_cleanly() {
        let code = output.exit_code.map_or("unknown".to_string(), |c| c.to_string());
        warn!(exit_code = %code, "Runner exited abnormally");
        return RunOutcome {
            logs: output.stdout,
            stderr,
            ..RunOutcome::failure(format!("Runner exited with code {}", code))
        };
    }

    let (logs, report) = match split_report(&output.stdout) {
        Ok(split) => split,
        Err(e) => {
            warn!(error = %e, "Unreadable runner output");
            return RunOutcome {
                logs: output.stdout,
                stderr,
                ..RunOutcome::failure(e.to_string())
            };
        }
    };

    if let Some(error) = report.error {
        warn!(error = %error, "Submission failed to load");
        return finish(&prepared, evaluator::fail_all(&prepared, &error), logs, Some(error), stderr);
    }
    let outcomes = report.results;

    let evaluated = prepared
        .iter()
        .map(|case| {
            let outcome = outcomes.iter().find(|o| o.index == case.index);
            let eval = evaluator::evaluate_case(case, outcome);
            debug!(case = case.index + 1, passed = eval.result.passed, "Case evaluated");
            eval
        })
        .collect();

    finish(&prepared, evaluated, logs, None, stderr)
}

/// Running size of the serialized plan against the sandbox's payload limit.
struct PlanBudget {
    used: usize,
    limit: Option<usize>,
}

impl PlanBudget {
    fn new(empty: &GuestPlan, limit: Option<usize>) -> Self {
        let used = serde_json::to_string(empty).map_or(0, |s| s.len());
        Self { used, limit }
    }

    /// Reserve room for one case, or explain why it does not fit.
    fn admit(&mut self, case: &GuestCase) -> Result<(), String> {
        let Some(limit) = self.limit else { return Ok(()) };
        let size = serde_json::to_string(case)
            .map_err(|e| format!("Failed to encode test case: {}", e))?
            .len()
            + 1;
        if self.used + size > limit {
            return Err(format!(
                "Test input exceeds the sandbox payload limit of {} bytes",
                limit
            ));
        }
        self.used += size;
        Ok(())
    }
}

fn scope_source(input: &ParsedInput) -> ScopeSource {
    match input {
        ParsedInput::Literal { scope, .. } => ScopeSource::Literal(scope.clone()),
        ParsedInput::Script { source, fallback, .. } => ScopeSource::Script {
            source: source.clone(),
            fallback: fallback.clone(),
        },
    }
}

fn finish(
    prepared: &[PreparedCase],
    evaluated: Vec<EvaluatedCase>,
    mut logs: String,
    error: Option<String>,
    stderr: Option<String>,
) -> RunOutcome {
    let passed = error.is_none() && evaluator::aggregate(prepared, &evaluated);
    let passed_count = evaluated.iter().filter(|e| e.result.passed).count();
    info!(passed, passed_count, total = evaluated.len(), "→ Submission evaluated");

    let mut results = Vec::with_capacity(evaluated.len());
    for eval in evaluated {
        logs.push_str(&eval.log);
        results.push(eval.result);
    }

    RunOutcome {
        success: true,
        passed,
        results,
        logs,
        error,
        stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SandboxOutput;
    use anyhow::Result;
    use std::sync::Mutex;
    use verity_common::types::TestCase;

    /// Replays a canned driver output and records the plan it was given.
    struct ScriptedSandbox {
        output: SandboxOutput,
        limit: Option<usize>,
        seen_plan: Mutex<Option<String>>,
    }

    impl ScriptedSandbox {
        fn new(stdout: &str) -> Self {
            Self {
                output: SandboxOutput {
                    exit_code: Some(0),
                    stdout: stdout.to_string(),
                    ..Default::default()
                },
                limit: None,
                seen_plan: Mutex::new(None),
            }
        }

        fn plan(&self) -> serde_json::Value {
            let plan = self.seen_plan.lock().unwrap().clone().expect("sandbox was not called");
            serde_json::from_str(&plan).unwrap()
        }
    }

    impl Sandbox for ScriptedSandbox {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn payload_limit(&self) -> Option<usize> {
            self.limit
        }

        async fn run(&self, payload: &Payload, _timeout: Duration) -> Result<SandboxOutput> {
            *self.seen_plan.lock().unwrap() = Some(payload.plan.clone());
            Ok(self.output.clone())
        }
    }

    fn request(code: &str, cases: &[(&str, &str)]) -> RunRequest {
        RunRequest {
            code: code.to_string(),
            test_cases: cases.iter().map(|(i, o)| TestCase::new(*i, *o)).collect(),
        }
    }

    const TWO_SUM: &str = "def twoSum(nums, target):\n    return [0, 1]\n";

    #[tokio::test]
    async fn test_passing_run() {
        let sandbox = ScriptedSandbox::new(
            "loaded\n{\"results\":[{\"index\":0,\"ok\":true,\"value\":[0,1],\"stdout\":\"hi\\n\"},{\"index\":1,\"ok\":true,\"value\":[0,1]}]}\n",
        );
        let req = request(TWO_SUM, &[("nums = [2,7,11,15], target = 9", "[0,1]"), ("nums = [3,3], target = 6", "")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;

        assert!(outcome.success);
        assert!(outcome.passed);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].index, 1);
        assert_eq!(outcome.results[1].expected, "(custom - no expected)");
        assert!(outcome.logs.starts_with("loaded"));
        assert!(outcome.logs.contains("TEST CASE 2"));
        assert!(outcome.logs.contains("hi\nActual: [0,1]"));

        let plan = sandbox.plan();
        assert_eq!(plan["entry"], "twoSum");
        assert_eq!(plan["cases"][0]["call"]["function"]["args"][1]["name"], "target");
    }

    #[tokio::test]
    async fn test_failed_comparison_is_not_an_error() {
        let sandbox = ScriptedSandbox::new("{\"results\":[{\"index\":0,\"ok\":true,\"value\":[1,0]}]}");
        let req = request(TWO_SUM, &[("nums = [2,7], target = 9", "[0,1]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.success);
        assert!(!outcome.passed);
        assert_eq!(outcome.results[0].actual, "[1,0]");
        assert!(outcome.results[0].error.is_none());
    }

    #[tokio::test]
    async fn test_discovery_failure_fails_every_case() {
        let sandbox = ScriptedSandbox::new("");
        let req = request("x = 1\n", &[("a = 1", "1"), ("a = 2", "2")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.success);
        assert!(!outcome.passed);
        assert_eq!(
            outcome.error.as_deref(),
            Some("No function/class found. Please define a function or class.")
        );
        assert!(outcome.results.iter().all(|r| !r.passed && r.error.is_some()));
        assert!(sandbox.seen_plan.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_parse_error_is_case_local() {
        let sandbox = ScriptedSandbox::new("{\"results\":[{\"index\":1,\"ok\":true,\"value\":[0,1]}]}");
        let req = request(TWO_SUM, &[("nums = [1, 2", "[0,1]"), ("nums = [1,2], target = 3", "[0,1]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.success);
        assert!(!outcome.passed);
        assert!(outcome.results[0].error.as_deref().unwrap().contains("Could not parse"));
        assert!(outcome.results[1].passed);
        assert_eq!(sandbox.plan()["cases"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_reports_no_cases() {
        let mut sandbox = ScriptedSandbox::new("");
        sandbox.output.timed_out = true;
        sandbox.output.exit_code = None;
        let req = request(TWO_SUM, &[("nums = [1], target = 1", "[0,1]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Timeout"));
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_final_line_is_harness_failure() {
        let sandbox = ScriptedSandbox::new("print from user\nnot json at all\n");
        let req = request(TWO_SUM, &[("nums = [1], target = 1", "[0,1]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("malformed runner output"));
        assert!(outcome.logs.contains("print from user"));
    }

    #[tokio::test]
    async fn test_load_error_fails_every_case() {
        let sandbox = ScriptedSandbox::new("{\"results\":[],\"error\":\"SyntaxError: invalid syntax (line 3)\"}");
        let req = request(TWO_SUM, &[("nums = [1], target = 1", "[0,1]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.success);
        assert!(!outcome.passed);
        assert!(outcome.results[0].error.as_deref().unwrap().starts_with("SyntaxError"));
    }

    #[tokio::test]
    async fn test_literal_tail_still_loads_submission() {
        let sandbox = ScriptedSandbox::new("{\"results\":[]}");
        let code = "class Solution:\n    def solve(self):\n        return 1\n";
        let req = request(code, &[("[1, 2]", "[1,2]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.passed);
        assert!(sandbox.plan()["cases"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unloadable_submission_fails_host_resolved_cases() {
        let sandbox = ScriptedSandbox::new(
            "{\"results\":[],\"error\":\"SyntaxError: '(' was never closed (line 3)\"}",
        );
        let code = "class Solution:\n    def f(self):\n        return (\n";
        let req = request(code, &[("x = 1\n[1, 2]", "[1,2]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.success);
        assert!(!outcome.passed);
        assert!(outcome.error.as_deref().unwrap().starts_with("SyntaxError"));
        assert!(!outcome.results[0].passed);
        assert!(sandbox.seen_plan.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_output_cap_is_harness_failure() {
        let mut sandbox = ScriptedSandbox::new("aaaa");
        sandbox.output.output_exceeded = true;
        sandbox.output.exit_code = None;
        let req = request(TWO_SUM, &[("nums = [1], target = 1", "[0,1]")]);
        let config = HarnessConfig {
            max_output_bytes: 4,
            ..HarnessConfig::default()
        };

        let outcome = run(&req, &sandbox, &config).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with(OUTPUT_LIMIT_ERROR));
        assert_eq!(outcome.logs, "aaaa");
    }

    #[tokio::test]
    async fn test_payload_limit_fails_only_oversized_case() {
        let mut sandbox = ScriptedSandbox::new("{\"results\":[{\"index\":1,\"ok\":true,\"value\":[0,1]}]}");
        sandbox.limit = Some(1000);
        let big = format!("nums = [{}], target = 3", vec!["1"; 2000].join(","));
        let req = request(TWO_SUM, &[(big.as_str(), "[0,1]"), ("nums = [1,2], target = 3", "[0,1]")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.success);
        assert!(outcome.results[0].error.as_deref().unwrap().contains("payload limit of 1000 bytes"));
        assert!(outcome.results[1].passed);
        let plan = sandbox.plan();
        assert_eq!(plan["cases"].as_array().unwrap().len(), 1);
        assert_eq!(plan["cases"][0]["index"], 1);
    }

    #[tokio::test]
    async fn test_payload_limit_caps_source() {
        let mut sandbox = ScriptedSandbox::new("");
        sandbox.limit = Some(8);
        let outcome = run(&request(TWO_SUM, &[]), &sandbox, &HarnessConfig::default()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("maximum size of 8 bytes"));
    }

    #[tokio::test]
    async fn test_oversized_source_rejected() {
        let sandbox = ScriptedSandbox::new("");
        let config = HarnessConfig {
            max_source_bytes: 8,
            ..HarnessConfig::default()
        };
        let outcome = run(&request(TWO_SUM, &[]), &sandbox, &config).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("maximum size"));
    }

    #[tokio::test]
    async fn test_lca_plan_reports_node_values() {
        let sandbox = ScriptedSandbox::new("{\"results\":[{\"index\":0,\"ok\":true,\"value\":6}]}");
        let code = "class Solution:\n    def lowestCommonAncestor(self, root, p, q):\n        return root\n";
        let req = request(code, &[("root = [6,2,8,0,4,7,9,null,null,3,5], p = 2, q = 8", "6")]);

        let outcome = run(&req, &sandbox, &HarnessConfig::default()).await;
        assert!(outcome.passed);
        let plan = sandbox.plan();
        assert_eq!(plan["kind"], "class");
        assert_eq!(plan["cases"][0]["node_as_value"], true);
        assert_eq!(
            plan["cases"][0]["call"]["method"]["args"][1]["conversion"]["tree_arg"],
            0
        );
    }
}

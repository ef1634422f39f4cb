/// Verdict Evaluator - Per-Case Scoring and Aggregation
///
/// **Core Responsibility:**
/// Turn what the driver reported for each case into a `CaseResult`, and the
/// case results into the overall `passed` flag.
///
/// **Critical Properties:**
/// - Knows nothing about processes or containers
/// - Knows nothing about Redis
/// - Pure function: (prepared cases, driver outcomes) → case results
///
/// **Post-processing (before comparison):**
/// - In-place callables returning `None` take their first post-call argument
/// - A `None` result against a list expected value reads as `[]`
/// - `groupAnagrams` results are sorted inner-then-outer
/// - When the result was a list, tree or graph, the expected literal goes
///   through the same codec round trip the driver applied
///
/// **Aggregation Rules:**
/// - Any errored case fails the submission
/// - Otherwise the AND over cases that have an expected value

use crate::codec::{self, StructureKind};
use crate::comparator::{compare, sorted_nested};
use crate::parser::Expected;
use crate::protocol::GuestOutcome;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use verity_common::types::CaseResult;

/// Callables that mutate their first argument and return nothing.
pub const IN_PLACE_CALLEES: &[&str] = &[
    "sortColors",
    "rotate",
    "setZeroes",
    "moveZeroes",
    "reverseString",
    "wallsAndGates",
    "gameOfLife",
];

const GROUPING_CALLEE: &str = "groupAnagrams";

/// Everything the host decided about a case before anything ran.
#[derive(Debug, Clone)]
pub struct PreparedCase {
    /// 0-based position in the request.
    pub index: usize,
    pub input: String,
    pub expected: Expected,
    pub callee: Option<String>,
    pub state: Preparation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Preparation {
    /// Sent to the sandbox; the outcome comes back in the report.
    Dispatched,
    /// Answered on the host from the input's trailing expression.
    Resolved(Value),
    /// Failed before dispatch (unparseable input, bad structure literal).
    Failed(String),
}

/// Result of evaluating one case, with its log block.
#[derive(Debug, Clone)]
pub struct EvaluatedCase {
    pub result: CaseResult,
    pub errored: bool,
    pub log: String,
}

/// Apply result post-processing to a driver outcome.
pub fn settle_actual(outcome: &GuestOutcome, callee: Option<&str>, expected: &Expected) -> Value {
    let mut actual = outcome.value.clone();

    if outcome.returned_none && callee.map_or(false, |c| IN_PLACE_CALLEES.contains(&c)) {
        if let Some(first @ Value::List(_)) = outcome.args_after.first() {
            actual = first.clone();
        }
    }

    if actual.is_null() && matches!(expected, Expected::Value(Value::List(_))) {
        actual = Value::List(Vec::new());
    }

    if callee == Some(GROUPING_CALLEE) {
        if let Some(sorted) = sorted_nested(&actual) {
            actual = sorted;
        }
    }

    actual
}

/// Expected structure literal in the form the driver reports `kind` in.
/// `None` when there is nothing to rewrite or the literal does not decode.
fn canonical_expected(expected: &Expected, kind: StructureKind) -> Option<Expected> {
    let Expected::Value(literal) = expected else {
        return None;
    };
    codec::canonicalize(kind, literal).ok().map(Expected::Value)
}

/// Evaluate a single case
///
/// Priority:
/// 1. Host-side failure (parse/bind) or a driver error → failed, error text kept
/// 2. Missing driver outcome → failed
/// 3. Comparison of the settled actual value
pub fn evaluate_case(case: &PreparedCase, outcome: Option<&GuestOutcome>) -> EvaluatedCase {
    let expected_display = case.expected.display();
    let empty_scope = BTreeMap::new();

    let (verdict, stdout) = match (&case.state, outcome) {
        (Preparation::Failed(error), _) => (Err(error.clone()), ""),
        (Preparation::Resolved(value), _) => (Ok((value.clone(), &empty_scope, None)), ""),
        (Preparation::Dispatched, None) => (Err("no result reported for this case".to_string()), ""),
        (Preparation::Dispatched, Some(out)) if !out.ok => (
            Err(out.error.clone().unwrap_or_else(|| "case failed without an error message".to_string())),
            out.stdout.as_str(),
        ),
        (Preparation::Dispatched, Some(out)) => (
            Ok((
                settle_actual(out, case.callee.as_deref(), &case.expected),
                &out.scope_after,
                out.structure,
            )),
            out.stdout.as_str(),
        ),
    };

    let mut log = case_header(case);
    log.push_str(stdout);
    if !stdout.is_empty() && !stdout.ends_with('\n') {
        log.push('\n');
    }

    match verdict {
        Ok((actual, scope_after, structure)) => {
            let canonical = structure.and_then(|kind| canonical_expected(&case.expected, kind));
            let expected = canonical.as_ref().unwrap_or(&case.expected);
            let passed = compare(&actual, expected, case.callee.as_deref(), scope_after);
            let actual_display = actual.to_string();
            let _ = writeln!(log, "Actual: {}", actual_display);
            let _ = writeln!(log, "Expected: {}", expected_display);
            let _ = writeln!(log, "Result: {}\n", if passed { "PASSED" } else { "FAILED" });

            EvaluatedCase {
                result: CaseResult {
                    index: case.index + 1,
                    passed,
                    input: case.input.clone(),
                    expected: expected_display,
                    actual: actual_display,
                    error: None,
                },
                errored: false,
                log,
            }
        }
        Err(error) => {
            let _ = writeln!(log, "Error: {}", error);
            EvaluatedCase {
                result: CaseResult {
                    index: case.index + 1,
                    passed: false,
                    input: case.input.clone(),
                    expected: expected_display,
                    actual: String::new(),
                    error: Some(error),
                },
                errored: true,
                log,
            }
        }
    }
}

/// Every case failed with the same message (discovery or load failure).
pub fn fail_all(cases: &[PreparedCase], error: &str) -> Vec<EvaluatedCase> {
    cases
        .iter()
        .map(|case| {
            let failed = PreparedCase {
                state: Preparation::Failed(error.to_string()),
                ..case.clone()
            };
            evaluate_case(&failed, None)
        })
        .collect()
}

/// Overall `passed` flag over evaluated cases.
pub fn aggregate(cases: &[PreparedCase], evaluated: &[EvaluatedCase]) -> bool {
    cases.iter().zip(evaluated).all(|(case, eval)| {
        !eval.errored && (case.expected == Expected::Nothing || eval.result.passed)
    })
}

fn case_header(case: &PreparedCase) -> String {
    let rule = "=".repeat(40);
    format!(
        "\n{rule}\n TEST CASE {}\n{rule}\nInput: {}\n",
        case.index + 1,
        case.input,
        rule = rule
    )
}

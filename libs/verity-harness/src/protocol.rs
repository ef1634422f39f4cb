//! Host/driver wire format.
//!
//! The host sends one [`GuestPlan`] per submission; the driver answers with
//! free-form output followed by exactly one JSON line decoding to a
//! [`GuestReport`].

use crate::codec::StructureKind;
use crate::parser::LocalScope;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct GuestPlan {
    pub entry: String,
    pub kind: EntryKind,
    pub cases: Vec<GuestCase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Function,
    Class,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuestCase {
    /// Position in the request, 0-based.
    pub index: usize,
    pub scope: ScopeSource,
    pub call: CallPlan,
    /// Reduce a returned tree node to its value instead of serializing it.
    pub node_as_value: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSource {
    Literal(LocalScope),
    Script {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPlan {
    /// Construct with the first argument list, then replay the commands.
    Design { commands: String, arguments: String },
    /// Use the script's trailing expression value if it is not `None`,
    /// otherwise run `otherwise`.
    ScriptTail {
        #[serde(skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<CallPlan>>,
    },
    /// Instantiate with no arguments and call one method.
    Method { name: String, args: Vec<ArgSpec> },
    Function { args: Vec<ArgSpec> },
}

impl CallPlan {
    /// Arguments of the call that produces the actual value, if any.
    pub fn args(&self) -> &[ArgSpec] {
        match self {
            CallPlan::Method { args, .. } | CallPlan::Function { args } => args,
            CallPlan::ScriptTail {
                otherwise: Some(plan),
            } => plan.args(),
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgSpec {
    /// Parameter being filled.
    pub param: String,
    /// Scope variable supplying the value.
    pub name: String,
    pub conversion: Conversion,
}

/// Applied by the driver only when the scope value has the matching shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Conversion {
    None,
    /// Honours the scope's `pos` variable for cycles.
    LinkedList,
    Tree,
    Graph,
    /// List ⇒ tree; integer ⇒ node with that value inside the tree bound at
    /// argument position `tree_arg`.
    TreeOrNode {
        #[serde(skip_serializing_if = "Option::is_none")]
        tree_arg: Option<usize>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestReport {
    #[serde(default)]
    pub results: Vec<GuestOutcome>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestOutcome {
    pub index: usize,
    pub ok: bool,
    /// Canonical form of the call result.
    #[serde(default = "null_value")]
    pub value: Value,
    /// True when the call itself returned `None` (before any reduction).
    #[serde(default)]
    pub returned_none: bool,
    /// Set when `value` is an encoded list, tree or graph.
    #[serde(default)]
    pub structure: Option<StructureKind>,
    /// Canonical form of each positional argument after the call.
    #[serde(default)]
    pub args_after: Vec<Value>,
    /// Plain scope variables after the call, for the slice rule.
    #[serde(default)]
    pub scope_after: BTreeMap<String, Value>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub error: Option<String>,
}

fn null_value() -> Value {
    Value::Null
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("runner produced no output")]
    Empty,
    #[error("malformed runner output: {0}")]
    Malformed(String),
}

/// Splits driver stdout into the log prefix and the decoded final line.
pub fn split_report(stdout: &str) -> Result<(String, GuestReport), ProtocolError> {
    let trimmed = stdout.trim_end();
    if trimmed.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    let (logs, last) = match trimmed.rfind('\n') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    };
    let report = serde_json::from_str::<GuestReport>(last.trim())
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    Ok((logs.to_string(), report))
}

//! Invocation strategy selection.
//!
//! Rules, first match wins:
//! 1. design-class replay (command/argument sequences in scope, class entry);
//! 2. script tail (class entry and the input ends in a non-null expression);
//! 3. bound single-method class;
//! 4. plain function.

use crate::binder::{bind, BindError, ScopeView};
use crate::discovery::Invocable;
use crate::parser::ParsedInput;
use crate::protocol::CallPlan;
use crate::value::Value;
use thiserror::Error;

const COMMAND_MARKERS: &[&str] = &["command", "method", "op"];
const ARGUMENT_MARKERS: &[&str] = &["arg", "input", "val"];

#[derive(Debug, Error, PartialEq)]
pub enum SelectError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("`{commands}` has {command_count} entries but `{arguments}` has {argument_count}")]
    DesignLength {
        commands: String,
        arguments: String,
        command_count: usize,
        argument_count: usize,
    },
    #[error("No public methods found in class {0}")]
    NoPublicMethod(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Answered from the input's trailing expression; nothing to run.
    Tail(Value),
    Call {
        call: CallPlan,
        /// Callable whose return value is the actual result, if a single one.
        callee: Option<String>,
    },
}

pub fn select(invocable: &Invocable, parsed: &ParsedInput) -> Result<Selection, SelectError> {
    let names = parsed.names();

    if invocable.is_class() {
        if let Some(call) = design_plan(&names, parsed)? {
            return Ok(Selection::Call { call, callee: None });
        }

        match parsed {
            ParsedInput::Literal {
                last_expr: Some(value),
                ..
            } if !value.is_null() => return Ok(Selection::Tail(value.clone())),
            ParsedInput::Script { .. } => {
                let (method, callee) = method_plan(invocable, parsed)?;
                return Ok(Selection::Call {
                    call: CallPlan::ScriptTail {
                        otherwise: Some(Box::new(method)),
                    },
                    callee: Some(callee),
                });
            }
            _ => {}
        }

        let (call, callee) = method_plan(invocable, parsed)?;
        return Ok(Selection::Call {
            call,
            callee: Some(callee),
        });
    }

    let args = bind(&invocable.params, scope_view(parsed))?;
    Ok(Selection::Call {
        call: CallPlan::Function { args },
        callee: Some(invocable.name.clone()),
    })
}

fn scope_view(parsed: &ParsedInput) -> ScopeView<'_> {
    match parsed {
        ParsedInput::Literal { scope, .. } => ScopeView::Literal(scope),
        ParsedInput::Script { assigned, .. } => ScopeView::Script(assigned),
    }
}

fn method_plan(invocable: &Invocable, parsed: &ParsedInput) -> Result<(CallPlan, String), SelectError> {
    let method = invocable
        .entry_method()
        .ok_or_else(|| SelectError::NoPublicMethod(invocable.name.clone()))?;
    let args = bind(&method.params, scope_view(parsed))?;
    Ok((
        CallPlan::Method {
            name: method.name.clone(),
            args,
        },
        method.name.clone(),
    ))
}

/// The command variable is the first scope name containing a command
/// marker; the argument variable is the first other name containing an
/// argument marker.
fn design_plan(names: &[&str], parsed: &ParsedInput) -> Result<Option<CallPlan>, SelectError> {
    let Some(commands) = names
        .iter()
        .find(|n| COMMAND_MARKERS.iter().any(|m| n.contains(m)))
    else {
        return Ok(None);
    };
    let Some(arguments) = names
        .iter()
        .filter(|n| *n != commands)
        .find(|n| ARGUMENT_MARKERS.iter().any(|m| n.contains(m)))
    else {
        return Ok(None);
    };

    if let ParsedInput::Literal { scope, .. } = parsed {
        let (Some(cmds), Some(args)) = (
            scope.get(commands).and_then(Value::as_list),
            scope.get(arguments).and_then(Value::as_list),
        ) else {
            return Ok(None);
        };
        if cmds.len() != args.len() {
            return Err(SelectError::DesignLength {
                commands: commands.to_string(),
                arguments: arguments.to_string(),
                command_count: cmds.len(),
                argument_count: args.len(),
            });
        }
    }

    Ok(Some(CallPlan::Design {
        commands: commands.to_string(),
        arguments: arguments.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::discover;
    use crate::parser::parse_input;
    use crate::protocol::Conversion;
    use crate::value::list;

    const MIN_STACK: &str = "class MinStack:\n    def __init__(self):\n        self.s = []\n    def push(self, x):\n        self.s.append(x)\n    def getMin(self):\n        return min(self.s)\n";

    fn select_for(code: &str, input: &str) -> Result<Selection, SelectError> {
        select(&discover(code).unwrap(), &parse_input(input).unwrap())
    }

    #[test]
    fn test_design_replay() {
        let sel = select_for(
            MIN_STACK,
            r#"commands = ["MinStack","push","push","getMin"], args = [[],[1],[2],[]]"#,
        )
        .unwrap();
        assert_eq!(
            sel,
            Selection::Call {
                call: CallPlan::Design {
                    commands: "commands".into(),
                    arguments: "args".into(),
                },
                callee: None,
            }
        );
    }

    #[test]
    fn test_design_length_mismatch_fails_case() {
        let err = select_for(MIN_STACK, r#"operations = ["MinStack","push"], values = [[]]"#).unwrap_err();
        assert!(matches!(err, SelectError::DesignLength { command_count: 2, argument_count: 1, .. }));
    }

    #[test]
    fn test_design_ignored_for_functions() {
        let sel = select_for("def f(ops, vals):\n    return 1\n", "ops = [1], vals = [2]").unwrap();
        match sel {
            Selection::Call {
                call: CallPlan::Function { args },
                callee,
            } => {
                assert_eq!(args.len(), 2);
                assert_eq!(callee.as_deref(), Some("f"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_literal_tail_answers_class_case() {
        let sel = select_for(MIN_STACK, "x = 1\n[x, 2]").unwrap();
        assert_eq!(sel, Selection::Tail(list![1, 2]));
    }

    #[test]
    fn test_null_tail_falls_through_to_method() {
        let sel = select_for(MIN_STACK, "x = 1\nnull").unwrap();
        assert!(matches!(
            sel,
            Selection::Call {
                call: CallPlan::Method { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_script_class_gets_tail_with_method_fallback() {
        let sel = select_for(MIN_STACK, "s = MinStack()\ns.push(-1)\ns.getMin()").unwrap();
        match sel {
            Selection::Call {
                call: CallPlan::ScriptTail { otherwise: Some(plan) },
                callee,
            } => {
                assert_eq!(callee.as_deref(), Some("getMin"));
                assert!(matches!(*plan, CallPlan::Method { ref name, .. } if name == "getMin"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_single_method_class_binds_like_function() {
        let code = "class Solution:\n    def lowestCommonAncestor(self, root, p, q):\n        pass\n";
        let sel = select_for(code, "root = [6,2,8,0,4,7,9,null,null,3,5], p = 2, q = 8").unwrap();
        let Selection::Call { call, callee } = sel else {
            panic!("expected a call");
        };
        assert_eq!(callee.as_deref(), Some("lowestCommonAncestor"));
        let args = call.args();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].conversion, Conversion::Tree);
        assert_eq!(args[2].conversion, Conversion::TreeOrNode { tree_arg: Some(0) });
    }

    #[test]
    fn test_class_without_public_method() {
        let err = select_for("class Solution:\n    def _x(self):\n        pass\n", "a = 1").unwrap_err();
        assert_eq!(err.to_string(), "No public methods found in class Solution");
    }
}

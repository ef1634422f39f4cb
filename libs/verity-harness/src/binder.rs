//! Argument binding.
//!
//! Declared parameter names are matched against the case scope through a
//! fixed, data-only rule table: an exact name match wins, then the rule's
//! aliases in order. The matched rule also names the structural conversion
//! the driver applies before the call. Parameters that resolve to nothing
//! are skipped and the call goes ahead with fewer positional arguments.

use crate::codec::{self, CodecError, LinkedList};
use crate::parser::LocalScope;
use crate::protocol::{ArgSpec, Conversion};
use crate::value::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleConversion {
    None,
    LinkedList,
    Tree,
    /// Graph only when the value is a list of lists.
    GraphIfNested,
    /// Tree from a list, node lookup from an integer.
    TreeOrNode,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamRule {
    pub param: &'static str,
    pub aliases: &'static [&'static str],
    pub conversion: RuleConversion,
}

const fn rule(
    param: &'static str,
    aliases: &'static [&'static str],
    conversion: RuleConversion,
) -> ParamRule {
    ParamRule {
        param,
        aliases,
        conversion,
    }
}

pub const PARAM_RULES: &[ParamRule] = &[
    rule("node", &["adjList", "val"], RuleConversion::GraphIfNested),
    rule("target", &["k"], RuleConversion::None),
    rule("arr", &["nums", "vec"], RuleConversion::None),
    rule("nums", &["arr"], RuleConversion::None),
    rule("root", &["p", "q"], RuleConversion::Tree),
    rule("root1", &[], RuleConversion::Tree),
    rule("root2", &[], RuleConversion::Tree),
    rule("subRoot", &[], RuleConversion::Tree),
    rule("head", &[], RuleConversion::LinkedList),
    rule("l1", &[], RuleConversion::LinkedList),
    rule("l2", &[], RuleConversion::LinkedList),
    rule("list1", &[], RuleConversion::LinkedList),
    rule("list2", &[], RuleConversion::LinkedList),
    rule("headA", &[], RuleConversion::LinkedList),
    rule("headB", &[], RuleConversion::LinkedList),
    rule("p", &[], RuleConversion::TreeOrNode),
    rule("q", &[], RuleConversion::TreeOrNode),
];

pub fn rule_for(param: &str) -> Option<&'static ParamRule> {
    PARAM_RULES.iter().find(|r| r.param == param)
}

#[derive(Debug, Error, PartialEq)]
pub enum BindError {
    #[error("cannot convert argument `{param}`: {source}")]
    Conversion {
        param: String,
        #[source]
        source: CodecError,
    },
}

/// What the binder can see of a case's scope.
#[derive(Debug, Clone, Copy)]
pub enum ScopeView<'a> {
    /// Values known on the host.
    Literal(&'a LocalScope),
    /// Only the names a script assigns; values exist inside the sandbox.
    Script(&'a [String]),
}

impl<'a> ScopeView<'a> {
    fn contains(&self, name: &str) -> bool {
        match self {
            ScopeView::Literal(scope) => scope.contains(name),
            ScopeView::Script(names) => names.iter().any(|n| n == name),
        }
    }

    fn value(&self, name: &str) -> Option<&'a Value> {
        match *self {
            ScopeView::Literal(scope) => scope.get(name),
            ScopeView::Script(_) => None,
        }
    }

    fn cycle_pos(&self) -> Option<i64> {
        self.value("pos").and_then(Value::as_i64)
    }
}

/// Resolve `params` against `scope` in declaration order.
pub fn bind(params: &[String], scope: ScopeView<'_>) -> Result<Vec<ArgSpec>, BindError> {
    let mut args: Vec<ArgSpec> = Vec::with_capacity(params.len());

    for param in params {
        let rule = rule_for(param);
        let source = if scope.contains(param) {
            Some(param.as_str())
        } else {
            rule.and_then(|r| r.aliases.iter().copied().find(|a| scope.contains(a)))
        };

        let Some(source) = source else {
            debug!(param = %param, "parameter not found in scope, skipping");
            continue;
        };

        let kind = rule.map_or(RuleConversion::None, |r| r.conversion);
        let conversion = match scope {
            ScopeView::Literal(_) => {
                let value = scope.value(source).unwrap_or(&Value::Null);
                literal_conversion(param, kind, value, scope, &args)?
            }
            ScopeView::Script(_) => deferred_conversion(kind, &args),
        };

        args.push(ArgSpec {
            param: param.clone(),
            name: source.to_string(),
            conversion,
        });
    }

    Ok(args)
}

/// Decide and validate a conversion for a value the host can see, so that a
/// malformed structure literal fails the case before it reaches the sandbox.
fn literal_conversion(
    param: &str,
    kind: RuleConversion,
    value: &Value,
    scope: ScopeView<'_>,
    bound: &[ArgSpec],
) -> Result<Conversion, BindError> {
    let fail = |source| BindError::Conversion {
        param: param.to_string(),
        source,
    };

    let conversion = match kind {
        RuleConversion::LinkedList if value.is_list() => {
            LinkedList::decode(value, scope.cycle_pos()).map_err(fail)?;
            Conversion::LinkedList
        }
        RuleConversion::Tree if value.is_list() => {
            codec::decode_tree(value).map_err(fail)?;
            Conversion::Tree
        }
        RuleConversion::GraphIfNested
            if value.as_list().map_or(false, |items| items.iter().all(Value::is_list)) =>
        {
            codec::Graph::decode(value).map_err(fail)?;
            Conversion::Graph
        }
        RuleConversion::TreeOrNode if value.is_list() => {
            codec::decode_tree(value).map_err(fail)?;
            Conversion::TreeOrNode { tree_arg: None }
        }
        RuleConversion::TreeOrNode if matches!(value, Value::Int(_)) => {
            match bound_tree_position(bound) {
                Some(pos) => Conversion::TreeOrNode { tree_arg: Some(pos) },
                None => Conversion::None,
            }
        }
        _ => Conversion::None,
    };

    Ok(conversion)
}

/// Script values are unknown until the sandbox runs the script; the driver
/// applies each conversion only if the value turns out to have the shape.
fn deferred_conversion(kind: RuleConversion, bound: &[ArgSpec]) -> Conversion {
    match kind {
        RuleConversion::None => Conversion::None,
        RuleConversion::LinkedList => Conversion::LinkedList,
        RuleConversion::Tree => Conversion::Tree,
        RuleConversion::GraphIfNested => Conversion::Graph,
        RuleConversion::TreeOrNode => Conversion::TreeOrNode {
            tree_arg: bound_tree_position(bound),
        },
    }
}

/// Position of the first already-bound argument that becomes a tree.
fn bound_tree_position(bound: &[ArgSpec]) -> Option<usize> {
    bound.iter().position(|arg| {
        matches!(
            arg.conversion,
            Conversion::Tree | Conversion::TreeOrNode { tree_arg: None }
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_input, ParsedInput};

    fn scope(text: &str) -> LocalScope {
        match parse_input(text).unwrap() {
            ParsedInput::Literal { scope, .. } => scope,
            other => panic!("expected literal, got {:?}", other),
        }
    }

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rule_table_has_unique_params() {
        for (i, r) in PARAM_RULES.iter().enumerate() {
            assert!(
                PARAM_RULES[i + 1..].iter().all(|o| o.param != r.param),
                "duplicate rule for {}",
                r.param
            );
        }
        assert_eq!(rule_for("arr").unwrap().aliases, &["nums", "vec"]);
        assert!(rule_for("grid").is_none());
    }

    #[test]
    fn test_exact_match_then_alias() {
        let s = scope("nums = [2,7,11,15], k = 9");
        let args = bind(&params(&["arr", "target"]), ScopeView::Literal(&s)).unwrap();
        assert_eq!(args[0].name, "nums");
        assert_eq!(args[1].name, "k");
        assert_eq!(args[1].param, "target");
        assert!(args.iter().all(|a| a.conversion == Conversion::None));
    }

    #[test]
    fn test_missing_parameter_is_skipped() {
        let s = scope("nums = [1]");
        let args = bind(&params(&["nums", "m", "n"]), ScopeView::Literal(&s)).unwrap();
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_structure_conversions_by_name() {
        let s = scope("head = [1,2,3], pos = 1, root = [1,null,2], node = [[2],[1]], l1 = 5");
        let args = bind(&params(&["head", "root", "node", "l1"]), ScopeView::Literal(&s)).unwrap();
        assert_eq!(args[0].conversion, Conversion::LinkedList);
        assert_eq!(args[1].conversion, Conversion::Tree);
        assert_eq!(args[2].conversion, Conversion::Graph);
        assert_eq!(args[3].conversion, Conversion::None);
    }

    #[test]
    fn test_node_without_nested_lists_stays_plain() {
        let s = scope("val = 5");
        let args = bind(&params(&["node"]), ScopeView::Literal(&s)).unwrap();
        assert_eq!(args[0].name, "val");
        assert_eq!(args[0].conversion, Conversion::None);
    }

    #[test]
    fn test_p_q_integers_point_at_bound_tree() {
        let s = scope("root = [3,5,1,6,2,0,8,null,null,7,4], p = 5, q = 1");
        let args = bind(&params(&["root", "p", "q"]), ScopeView::Literal(&s)).unwrap();
        assert_eq!(args[1].conversion, Conversion::TreeOrNode { tree_arg: Some(0) });
        assert_eq!(args[2].conversion, Conversion::TreeOrNode { tree_arg: Some(0) });
    }

    #[test]
    fn test_p_q_lists_become_trees() {
        let s = scope("p = [1,2,3], q = [1,2,3]");
        let args = bind(&params(&["p", "q"]), ScopeView::Literal(&s)).unwrap();
        assert_eq!(args[0].conversion, Conversion::TreeOrNode { tree_arg: None });
        assert_eq!(args[1].conversion, Conversion::TreeOrNode { tree_arg: None });
    }

    #[test]
    fn test_p_integer_without_tree_stays_plain() {
        let s = scope("p = 5");
        let args = bind(&params(&["p"]), ScopeView::Literal(&s)).unwrap();
        assert_eq!(args[0].conversion, Conversion::None);
    }

    #[test]
    fn test_bad_structure_literal_fails_binding() {
        let s = scope("head = [[1,5],[2,0]]");
        let err = bind(&params(&["head"]), ScopeView::Literal(&s)).unwrap_err();
        assert!(err.to_string().contains("`head`"));
        assert!(matches!(
            err,
            BindError::Conversion {
                source: CodecError::RandomIndexOutOfRange { index: 5, len: 2 },
                ..
            }
        ));
    }

    #[test]
    fn test_script_scopes_defer_conversion() {
        let names = params(&["root", "p"]);
        let args = bind(&params(&["root", "p", "q"]), ScopeView::Script(&names)).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].conversion, Conversion::Tree);
        assert_eq!(args[1].conversion, Conversion::TreeOrNode { tree_arg: Some(0) });
    }
}

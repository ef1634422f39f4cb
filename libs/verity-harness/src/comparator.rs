//! Type-aware comparison of an actual value against an [`Expected`].

use crate::parser::Expected;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::mem::discriminant;

/// Absolute tolerance for numeric results.
pub const FLOAT_TOLERANCE: f64 = 1e-5;

/// Callables whose `k, name = [...]` slice is compared ignoring order.
const UNORDERED_SLICE_CALLEES: &[&str] = &["removeElement"];

/// Rules, in order: the `k, name = [...]` slice rule, no expected value,
/// numeric tolerance, order-insensitive lists of lists, structural equality.
///
/// `scope_after` holds the case's scope variables after the call; `callee`
/// is the name of the callable that produced `actual`.
pub fn compare(
    actual: &Value,
    expected: &Expected,
    callee: Option<&str>,
    scope_after: &BTreeMap<String, Value>,
) -> bool {
    match expected {
        Expected::Slice { count, name, slice } => {
            compare_slice(actual, *count, scope_after.get(name), slice, callee)
        }
        Expected::Nothing => true,
        Expected::Opaque(text) => string_form(actual) == *text,
        Expected::Value(expected) => compare_values(actual, expected),
    }
}

pub fn compare_values(actual: &Value, expected: &Value) -> bool {
    // Exact for integers; tolerance only once a float is involved
    if let (Value::Int(a), Value::Int(e)) = (actual, expected) {
        return a == e;
    }
    if let (Some(a), Some(e)) = (actual.as_f64(), expected.as_f64()) {
        return (a - e).abs() < FLOAT_TOLERANCE;
    }

    if is_sortable_list_of_lists(actual) && is_sortable_list_of_lists(expected) {
        if let (Some(a), Some(e)) = (sorted_nested(actual), sorted_nested(expected)) {
            return a == e;
        }
    }

    actual == expected
}

fn compare_slice(
    actual: &Value,
    count: i64,
    array: Option<&Value>,
    slice: &Value,
    callee: Option<&str>,
) -> bool {
    let Value::Int(k) = actual else {
        return false;
    };
    if *k != count {
        return false;
    }
    let (Some(array), Some(slice)) = (array.and_then(Value::as_list), slice.as_list()) else {
        return false;
    };

    let k = usize::try_from(*k).unwrap_or(0);
    let got = &array[..k.min(array.len())];
    let want = &slice[..k.min(slice.len())];

    let unordered = callee.map_or(false, |c| UNORDERED_SLICE_CALLEES.iter().any(|u| c.contains(u)));
    if unordered {
        if let (Some(got), Some(want)) = (sorted(got.to_vec()), sorted(want.to_vec())) {
            return got == want;
        }
    }
    got == want
}

/// Non-empty list whose elements are all lists, each free of nulls and
/// holding a single kind of value.
pub fn is_sortable_list_of_lists(value: &Value) -> bool {
    let Some(items) = value.as_list() else {
        return false;
    };
    !items.is_empty()
        && items.iter().all(|item| match item.as_list() {
            Some(inner) => match inner.first() {
                None => true,
                Some(first) => inner
                    .iter()
                    .all(|x| !x.is_null() && discriminant(x) == discriminant(first)),
            },
            None => false,
        })
}

/// Sort every inner list, then the outer list. `None` when some pair of
/// values has no ordering.
pub fn sorted_nested(value: &Value) -> Option<Value> {
    let items = value.as_list()?;
    let inner = items
        .iter()
        .map(|item| item.as_list().and_then(|xs| sorted(xs.to_vec())).map(Value::List))
        .collect::<Option<Vec<_>>>()?;
    sorted(inner).map(Value::List)
}

fn sorted(mut items: Vec<Value>) -> Option<Vec<Value>> {
    let mut comparable = true;
    items.sort_by(|a, b| {
        a.try_cmp(b).unwrap_or_else(|| {
            comparable = false;
            Ordering::Equal
        })
    });
    comparable.then_some(items)
}

/// `str()` of a value: strings bare, everything else in literal style.
pub fn string_form(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expected;
    use crate::value::list;

    fn check(actual: Value, expected: &str) -> bool {
        compare(&actual, &parse_expected(expected), None, &BTreeMap::new())
    }

    #[test]
    fn test_numeric_tolerance() {
        assert!(check(Value::Float(2.00000999), "2.0"));
        assert!(!check(Value::Float(2.1), "2.0"));
        assert!(check(Value::Int(3), "3.000001"));
    }

    #[test]
    fn test_booleans_are_not_numbers() {
        assert!(!check(Value::Bool(true), "1"));
        assert!(check(Value::Bool(true), "true"));
    }

    #[test]
    fn test_no_expected_always_passes() {
        assert!(check(Value::Null, ""));
        assert!(check(list![1, 2], "   "));
    }

    #[test]
    fn test_group_lists_ignore_order() {
        let actual = list![list!["bat"], list!["nat", "tan"], list!["ate", "eat", "tea"]];
        assert!(check(actual, r#"[["nat","tan"],["ate","eat","tea"],["bat"]]"#));
        assert!(check(list![list![2, 1], list![3]], "[[3],[1,2]]"));
    }

    #[test]
    fn test_random_pointer_pairs_stay_ordered() {
        let actual = list![list![7, Value::Null], list![13, 0]];
        assert!(!check(actual.clone(), "[[13,0],[7,null]]"));
        assert!(check(actual, "[[7,null],[13,0]]"));
    }

    #[test]
    fn test_plain_lists_are_order_sensitive() {
        assert!(!check(list![1, 2], "[2,1]"));
        assert!(check(list![1.0, 2], "[1,2]"));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let big = 1_i64 << 62;
        assert!(!compare_values(&Value::Int(big + 1), &Value::Int(big)));
        assert!(compare_values(&Value::Int(big), &Value::Int(big)));
        assert!(compare_values(&Value::Float(2.000001), &Value::Int(2)));
    }

    #[test]
    fn test_opaque_expected_uses_string_form() {
        assert!(check(Value::Str("fl".into()), "fl"));
        assert!(!check(Value::Int(5), "5 apples"));
    }

    #[test]
    fn test_slice_rule() {
        let mut scope = BTreeMap::new();
        scope.insert("nums".to_string(), list![2, 2, 3, 3]);
        let expected = parse_expected("2, nums = [2,2,_,_]");

        assert!(compare(&Value::Int(2), &expected, Some("removeElement"), &scope));
        assert!(!compare(&Value::Int(3), &expected, Some("removeElement"), &scope));
        assert!(!compare(&Value::Int(2), &expected, Some("removeElement"), &BTreeMap::new()));
    }

    #[test]
    fn test_slice_order_depends_on_callee() {
        let mut scope = BTreeMap::new();
        scope.insert("nums".to_string(), list![3, 0, 4, 1]);
        let expected = parse_expected("3, nums = [0,3,4,_]");

        assert!(compare(&Value::Int(3), &expected, Some("removeElement"), &scope));
        assert!(!compare(&Value::Int(3), &expected, Some("removeDuplicates"), &scope));
    }

    #[test]
    fn test_sorted_nested_rejects_mixed_kinds() {
        assert_eq!(sorted_nested(&list![list![2, 1], list![0]]), Some(list![list![0], list![1, 2]]));
        assert_eq!(sorted_nested(&list![list!["a"], list![1]]), None);
        assert!(!is_sortable_list_of_lists(&list![list![1, Value::Null]]));
        assert!(!is_sortable_list_of_lists(&list![list![1, 2.5]]));
    }
}

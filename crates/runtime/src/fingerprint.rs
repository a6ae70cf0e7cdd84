//! Cache keys for operations.
//!
//! A fingerprint is the kind tag, the operation name and the parameters sorted by
//! name, e.g. `proc:billing.get_invoices?customer=i:42;since=s:2024-01-01`.
//! Separator characters inside names and values are percent-escaped and every value
//! carries a type tag, so two different operations never share a fingerprint.

use conduit_common::{OperationKind, ScalarValue};
use sha2::{Digest, Sha256};
use std::fmt::Write;

const QUERY_SEPARATOR: char = '?';
const PAIR_SEPARATOR: char = ';';
const KEY_VALUE_SEPARATOR: char = '=';

fn kind_tag(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Procedure => "proc",
        OperationKind::Query => "query",
    }
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            ';' => out.push_str("%3B"),
            '=' => out.push_str("%3D"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
}

fn render_value(out: &mut String, value: &ScalarValue) {
    match value {
        ScalarValue::Null => out.push_str("null"),
        ScalarValue::Bool(b) => {
            let _ = write!(out, "b:{}", b);
        }
        ScalarValue::Int(i) => {
            let _ = write!(out, "i:{}", i);
        }
        // Debug keeps enough digits to round-trip
        ScalarValue::Float(f) => {
            let _ = write!(out, "f:{:?}", f);
        }
        ScalarValue::Text(s) => {
            out.push_str("s:");
            escape_into(out, s);
        }
    }
}

/// Deterministic key for an operation and its parameters.
///
/// The result does not depend on the order `parameters` are yielded in. With no
/// parameters it is just the tagged name.
pub fn fingerprint<'a, I>(kind: OperationKind, name: &str, parameters: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a ScalarValue)>,
{
    let mut pairs: Vec<(&str, &ScalarValue)> = parameters.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = String::with_capacity(name.len() + 16 * pairs.len() + 8);
    out.push_str(kind_tag(kind));
    out.push(':');
    escape_into(&mut out, name);

    for (i, (key, value)) in pairs.iter().enumerate() {
        out.push(if i == 0 { QUERY_SEPARATOR } else { PAIR_SEPARATOR });
        escape_into(&mut out, key);
        out.push(KEY_VALUE_SEPARATOR);
        render_value(&mut out, value);
    }
    out
}

/// SHA-256 of a fingerprint, safe to log.
pub fn digest(fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn fp(kind: OperationKind, name: &str, params: &[(&str, ScalarValue)]) -> String {
        fingerprint(kind, name, params.iter().map(|(k, v)| (*k, v)))
    }

    #[test]
    fn test_no_parameters_is_tagged_name() {
        assert_eq!(fp(OperationKind::Procedure, "dbo.sync", &[]), "proc:dbo.sync");
        assert_eq!(fp(OperationKind::Query, "SELECT 1", &[]), "query:SELECT 1");
    }

    #[test]
    fn test_layout() {
        let key = fp(
            OperationKind::Procedure,
            "billing.get_invoices",
            &[("since", "2024-01-01".into()), ("customer", 42.into())],
        );
        assert_eq!(key, "proc:billing.get_invoices?customer=i:42;since=s:2024-01-01");
    }

    #[test]
    fn test_kind_discriminates() {
        assert_ne!(
            fp(OperationKind::Procedure, "x", &[]),
            fp(OperationKind::Query, "x", &[])
        );
    }

    #[test]
    fn test_type_tags_discriminate() {
        let text = fp(OperationKind::Procedure, "p", &[("a", "1".into())]);
        let int = fp(OperationKind::Procedure, "p", &[("a", 1.into())]);
        let float = fp(OperationKind::Procedure, "p", &[("a", 1.0.into())]);
        let null = fp(OperationKind::Procedure, "p", &[("a", ScalarValue::Null)]);
        let null_text = fp(OperationKind::Procedure, "p", &[("a", "null".into())]);
        let all = [text, int, float, null, null_text];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_separators_in_values_do_not_alias() {
        let smuggled = fp(OperationKind::Procedure, "p", &[("a", "x;b=s:y".into())]);
        let honest = fp(
            OperationKind::Procedure,
            "p",
            &[("a", "x".into()), ("b", "y".into())],
        );
        assert_ne!(smuggled, honest);
        assert_eq!(smuggled, "proc:p?a=s:x%3Bb%3Ds:y");
    }

    #[test]
    fn test_separators_in_name_do_not_alias() {
        let in_name = fp(OperationKind::Query, "q?a=i:1", &[]);
        let as_param = fp(OperationKind::Query, "q", &[("a", 1.into())]);
        assert_ne!(in_name, as_param);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let d = digest("proc:p");
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d, digest("proc:p"));
        assert_ne!(d, digest("proc:q"));
    }

    fn scalar() -> impl Strategy<Value = ScalarValue> {
        prop_oneof![
            Just(ScalarValue::Null),
            any::<bool>().prop_map(ScalarValue::Bool),
            any::<i64>().prop_map(ScalarValue::Int),
            (-1.0e9f64..1.0e9).prop_map(ScalarValue::Float),
            "[a-z0-9;=%? ]{0,8}".prop_map(ScalarValue::Text),
        ]
    }

    fn params() -> impl Strategy<Value = BTreeMap<String, ScalarValue>> {
        prop::collection::btree_map("[a-z_;=%?]{1,6}", scalar(), 0..6)
    }

    proptest! {
        #[test]
        fn prop_order_independent(map in params()) {
            let forward = fingerprint(
                OperationKind::Procedure,
                "p",
                map.iter().map(|(k, v)| (k.as_str(), v)),
            );
            let reverse = fingerprint(
                OperationKind::Procedure,
                "p",
                map.iter().rev().map(|(k, v)| (k.as_str(), v)),
            );
            prop_assert_eq!(forward, reverse);
        }

        #[test]
        fn prop_distinct_parameters_distinct_keys(a in params(), b in params()) {
            prop_assume!(a != b);
            let fa = fingerprint(OperationKind::Query, "q", a.iter().map(|(k, v)| (k.as_str(), v)));
            let fb = fingerprint(OperationKind::Query, "q", b.iter().map(|(k, v)| (k.as_str(), v)));
            prop_assert_ne!(fa, fb);
        }

        #[test]
        fn prop_distinct_names_distinct_keys(a in "[a-z.?=;]{1,12}", b in "[a-z.?=;]{1,12}") {
            prop_assume!(a != b);
            prop_assert_ne!(
                fingerprint(OperationKind::Procedure, &a, std::iter::empty()),
                fingerprint(OperationKind::Procedure, &b, std::iter::empty())
            );
        }
    }
}

//! Parameter binding.
//!
//! Turns the caller's unordered name/value mapping into a validated, name-ordered
//! parameter list. Values are never rendered into command text here or anywhere
//! downstream; engines send them through their native binding channel.

use conduit_common::{ParameterMap, ScalarValue};
use conduit_error::GatewayError;
use thiserror::Error;

/// Identifier constraints of a target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierRules {
    pub max_len: usize,
}

impl IdentifierRules {
    /// Postgres truncates identifiers beyond NAMEDATALEN - 1 bytes.
    pub const POSTGRES: IdentifierRules = IdentifierRules { max_len: 63 };
    pub const RELAY: IdentifierRules = IdentifierRules { max_len: 128 };

    pub fn check(&self, name: &str) -> Result<(), &'static str> {
        let mut chars = name.chars();
        match chars.next() {
            None => return Err("name is empty"),
            Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
                return Err("name must start with a letter or underscore")
            }
            Some(_) => {}
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err("name may only contain letters, digits and underscores");
        }
        if name.len() > self.max_len {
            return Err("name is too long for the target engine");
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BindError {
    #[error("parameter '{name}' is invalid: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("parameter '{name}' is supplied more than once")]
    Duplicate { name: String },

    #[error("parameter '{name}' is not a finite number")]
    NonFinite { name: String },
}

impl From<BindError> for GatewayError {
    fn from(err: BindError) -> Self {
        match err {
            BindError::InvalidName { name, reason } => {
                GatewayError::invalid_parameter(name, reason)
            }
            BindError::Duplicate { name } => GatewayError::invalid_parameter(
                name,
                "supplied more than once (prefixes '@' and ':' are ignored)",
            ),
            BindError::NonFinite { name } => {
                GatewayError::invalid_parameter(name, "NaN and infinite values are not supported")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    pub value: ScalarValue,
}

/// Validated parameters ordered by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundParameters(Vec<BoundParameter>);

impl BoundParameters {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BoundParameter> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.0
            .binary_search_by(|p| p.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.0[i].value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|p| p.name.as_str())
    }
}

impl<'a> IntoIterator for &'a BoundParameters {
    type Item = &'a BoundParameter;
    type IntoIter = std::slice::Iter<'a, BoundParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParameterBinder {
    rules: IdentifierRules,
}

impl ParameterBinder {
    pub fn new(rules: IdentifierRules) -> Self {
        Self { rules }
    }

    pub fn bind(&self, parameters: &ParameterMap) -> Result<BoundParameters, BindError> {
        let mut bound = Vec::with_capacity(parameters.len());

        for (raw_name, value) in parameters {
            let name = strip_sigil(raw_name);
            self.rules
                .check(name)
                .map_err(|reason| BindError::InvalidName {
                    name: raw_name.clone(),
                    reason,
                })?;

            if let ScalarValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(BindError::NonFinite {
                        name: name.to_string(),
                    });
                }
            }

            bound.push(BoundParameter {
                name: name.to_string(),
                value: value.clone(),
            });
        }

        bound.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = bound.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(BindError::Duplicate {
                name: pair[0].name.clone(),
            });
        }

        Ok(BoundParameters(bound))
    }
}

fn strip_sigil(name: &str) -> &str {
    name.strip_prefix('@')
        .or_else(|| name.strip_prefix(':'))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ScalarValue)]) -> ParameterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_bind_orders_by_name_and_strips_sigils() {
        let binder = ParameterBinder::new(IdentifierRules::POSTGRES);
        let bound = binder
            .bind(&params(&[
                ("@region", "emea".into()),
                ("customer", 42.into()),
                (":active", ScalarValue::Null),
            ]))
            .unwrap();

        assert_eq!(
            bound.names().collect::<Vec<_>>(),
            vec!["active", "customer", "region"]
        );
        assert_eq!(bound.get("active"), Some(&ScalarValue::Null));
        assert_eq!(bound.get("customer"), Some(&ScalarValue::Int(42)));
        assert_eq!(bound.get("missing"), None);
    }

    #[test]
    fn test_rejects_injection_shaped_names() {
        let binder = ParameterBinder::new(IdentifierRules::POSTGRES);
        let err = binder
            .bind(&params(&[("id\" => 1); DROP TABLE x; --", 1.into())]))
            .unwrap_err();
        assert!(matches!(err, BindError::InvalidName { .. }));

        let err = binder.bind(&params(&[("1abc", 1.into())])).unwrap_err();
        assert!(matches!(err, BindError::InvalidName { .. }));
    }

    #[test]
    fn test_length_limit_depends_on_engine() {
        let name = "a".repeat(100);
        assert!(ParameterBinder::new(IdentifierRules::POSTGRES)
            .bind(&params(&[(&name, 1.into())]))
            .is_err());
        assert!(ParameterBinder::new(IdentifierRules::RELAY)
            .bind(&params(&[(&name, 1.into())]))
            .is_ok());
    }

    #[test]
    fn test_rejects_duplicates_after_stripping() {
        let binder = ParameterBinder::new(IdentifierRules::POSTGRES);
        let err = binder
            .bind(&params(&[("@id", 1.into()), ("id", 2.into())]))
            .unwrap_err();
        assert_eq!(
            err,
            BindError::Duplicate {
                name: "id".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_non_finite_floats() {
        let binder = ParameterBinder::new(IdentifierRules::POSTGRES);
        let err = binder
            .bind(&params(&[("ratio", f64::NAN.into())]))
            .unwrap_err();
        let gateway: GatewayError = err.into();
        assert_eq!(gateway.status_code(), 400);
        assert!(gateway.message.contains("ratio"));
    }
}

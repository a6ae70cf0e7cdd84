//! Postgres command rendering.
//!
//! Ad-hoc query text names its parameters with `@name` placeholders. The scanner
//! below finds them while skipping string literals, quoted identifiers, dollar
//! quotes and comments, so the same text can be rendered either with `$n` markers
//! (direct execution) or as a `format()` template (foreign mapping).

use crate::binder::{BoundParameters, IdentifierRules};
use crate::engine::Statement;
use conduit_common::ScalarValue;
use conduit_error::{GatewayError, Result};
use std::borrow::Cow;
use std::fmt::Write;

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

/// Quoted, optionally schema-qualified procedure name.
pub fn procedure_target(name: &str) -> Result<String> {
    let parts: Vec<&str> = name.trim().split('.').collect();
    if parts.len() > 2 {
        return Err(GatewayError::invalid_operation(
            "Procedure name may have at most one schema qualifier",
        ));
    }
    for part in &parts {
        IdentifierRules::POSTGRES.check(part).map_err(|reason| {
            GatewayError::invalid_operation(format!("Invalid procedure name: {}", reason))
        })?;
    }
    Ok(parts
        .iter()
        .map(|p| quote_ident(p))
        .collect::<Vec<_>>()
        .join("."))
}

/// `"a" => <marker 1>, "b" => <marker 2>` in bound (name) order.
pub fn named_arguments(parameters: &BoundParameters, marker: impl Fn(usize) -> String) -> String {
    parameters
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{} => {}", quote_ident(&p.name), marker(i + 1)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT * FROM "schema"."proc"("p" => $1, ...)`
pub fn render_procedure(name: &str, parameters: &BoundParameters) -> Result<Statement> {
    let target = procedure_target(name)?;
    let args = named_arguments(parameters, |i| format!("${}", i));
    let values = parameters.iter().map(|p| p.value.clone()).collect();
    Ok(Statement::with_parameters(
        format!("SELECT * FROM {}({})", target, args),
        values,
    ))
}

/// Rewrite `@name` placeholders to `$n` and collect values in marker order.
pub fn rewrite_query(text: &str, parameters: &BoundParameters) -> Result<Statement> {
    let template = QueryTemplate::parse(text)?;
    let values = template.values(parameters)?;
    let rendered = template.render(|i| format!("${}", i), Cow::Borrowed);
    Ok(Statement::with_parameters(rendered, values))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

/// Query text split into literal text and placeholders.
#[derive(Debug, Clone)]
pub struct QueryTemplate<'a> {
    segments: Vec<Segment<'a>>,
    names: Vec<&'a str>,
}

impl<'a> QueryTemplate<'a> {
    pub fn parse(text: &'a str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(GatewayError::invalid_operation("Query text is empty"));
        }
        let segments = scan(text)?;
        let mut names: Vec<&str> = Vec::new();
        for segment in &segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(name) {
                    names.push(name);
                }
            }
        }
        Ok(Self { segments, names })
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn names(&self) -> &[&'a str] {
        &self.names
    }

    /// Values for [`Self::names`]; a placeholder without a parameter is rejected.
    pub fn values(&self, parameters: &BoundParameters) -> Result<Vec<ScalarValue>> {
        self.names
            .iter()
            .map(|name| {
                parameters.get(name).cloned().ok_or_else(|| {
                    GatewayError::invalid_parameter(
                        *name,
                        "referenced in query text but not supplied",
                    )
                })
            })
            .collect()
    }

    /// Render with `marker(n)` for the n-th distinct placeholder (1-based) and
    /// `escape` applied to every literal text segment.
    pub fn render<'s>(
        &'s self,
        marker: impl Fn(usize) -> String,
        escape: impl Fn(&'s str) -> Cow<'s, str>,
    ) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(&escape(*text)),
                Segment::Placeholder(name) => {
                    let index = self.names.iter().position(|n| n == name).unwrap_or(0);
                    let _ = write!(out, "{}", marker(index + 1));
                }
            }
        }
        out
    }
}

fn invalid_query(reason: &str) -> GatewayError {
    GatewayError::invalid_operation(format!("Malformed query text: {}", reason))
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn ident_end(bytes: &[u8], from: usize) -> usize {
    let mut end = from;
    if end < bytes.len() && is_ident_start(bytes[end]) {
        end += 1;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
    }
    end
}

fn scan(text: &str) -> Result<Vec<Segment<'_>>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        match bytes[i] {
            b'\'' => {
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && (i < 2 || !is_ident_char(bytes[i - 2]));
                i = skip_quoted(bytes, i, b'\'', escapes)?;
            }
            b'"' => i = skip_quoted(bytes, i, b'"', false)?,
            b'-' if next == Some(b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if next == Some(b'*') => i = skip_block_comment(bytes, i)?,
            b'$' if i > 0 && is_ident_char(bytes[i - 1]) => i += 1,
            b'$' if next.is_some_and(|b| b.is_ascii_digit()) => {
                return Err(invalid_query(
                    "positional markers such as $1 are not supported, use @name placeholders",
                ));
            }
            b'$' => i = skip_dollar_quoted(text, i)?,
            b'@' if next == Some(b'@') => i += 2,
            b'@' => {
                let end = ident_end(bytes, i + 1);
                if end == i + 1 {
                    i += 1;
                    continue;
                }
                if start < i {
                    segments.push(Segment::Text(&text[start..i]));
                }
                segments.push(Segment::Placeholder(&text[i + 1..end]));
                i = end;
                start = end;
            }
            _ => i += 1,
        }
    }

    if start < bytes.len() {
        segments.push(Segment::Text(&text[start..]));
    }
    Ok(segments)
}

fn skip_quoted(bytes: &[u8], open: usize, quote: u8, escapes: bool) -> Result<usize> {
    let mut j = open + 1;
    while j < bytes.len() {
        if escapes && bytes[j] == b'\\' {
            j += 2;
            continue;
        }
        if bytes[j] == quote {
            if bytes.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return Ok(j + 1);
        }
        j += 1;
    }
    Err(invalid_query(if quote == b'"' {
        "unterminated quoted identifier"
    } else {
        "unterminated string literal"
    }))
}

fn skip_block_comment(bytes: &[u8], open: usize) -> Result<usize> {
    // Postgres block comments nest
    let mut depth = 0usize;
    let mut j = open;
    while j + 1 < bytes.len() {
        match (bytes[j], bytes[j + 1]) {
            (b'/', b'*') => {
                depth += 1;
                j += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                j += 2;
                if depth == 0 {
                    return Ok(j);
                }
            }
            _ => j += 1,
        }
    }
    Err(invalid_query("unterminated block comment"))
}

fn skip_dollar_quoted(text: &str, open: usize) -> Result<usize> {
    let bytes = text.as_bytes();
    let mut tag_end = open + 1;
    if tag_end < bytes.len() && is_ident_start(bytes[tag_end]) {
        tag_end = ident_end(bytes, tag_end);
    }
    if bytes.get(tag_end) != Some(&b'$') {
        // a lone '$' is not a quote opener
        return Ok(open + 1);
    }
    let tag = &text[open..=tag_end];
    let body_start = tag_end + 1;
    text[body_start..]
        .find(tag)
        .map(|pos| body_start + pos + tag.len())
        .ok_or_else(|| invalid_query("unterminated dollar-quoted string"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{IdentifierRules, ParameterBinder};
    use conduit_common::ParameterMap;
    use conduit_error::ErrorKind;

    fn bind(pairs: &[(&str, ScalarValue)]) -> BoundParameters {
        let map: ParameterMap = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ParameterBinder::new(IdentifierRules::POSTGRES)
            .bind(&map)
            .unwrap()
    }

    #[test]
    fn test_render_procedure_named_notation() {
        let params = bind(&[("region", "emea".into()), ("customer", 7.into())]);
        let stmt = render_procedure("sales.get_orders", &params).unwrap();
        assert_eq!(
            stmt.text,
            r#"SELECT * FROM "sales"."get_orders"("customer" => $1, "region" => $2)"#
        );
        assert_eq!(stmt.parameters, vec![7.into(), "emea".into()]);

        let stmt = render_procedure("ping", &BoundParameters::default()).unwrap();
        assert_eq!(stmt.text, r#"SELECT * FROM "ping"()"#);
    }

    #[test]
    fn test_procedure_name_validation() {
        for bad in ["", "a.b.c", "orders; DROP TABLE x", "x\"y", "1st"] {
            let err = render_procedure(bad, &BoundParameters::default()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidOperation, "{}", bad);
        }
    }

    #[test]
    fn test_rewrite_reuses_markers() {
        let params = bind(&[("id", 5.into()), ("unused", true.into())]);
        let stmt = rewrite_query("SELECT * FROM t WHERE a = @id OR b = @id", &params).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM t WHERE a = $1 OR b = $1");
        assert_eq!(stmt.parameters, vec![ScalarValue::Int(5)]);
    }

    #[test]
    fn test_rewrite_skips_literals_comments_and_operators() {
        let params = bind(&[("q", "x".into())]);
        let text = "SELECT '@q', \"@q\", $fn$ @q $fn$, E'it\\'s @q' \
                    -- @q\n/* @q /* nested @q */ */ FROM t WHERE doc @> '{}' AND tsv @@ @q";
        let stmt = rewrite_query(text, &params).unwrap();
        assert_eq!(stmt.parameters.len(), 1);
        assert!(stmt.text.ends_with("tsv @@ $1"));
        assert!(stmt.text.contains("'@q'"));
        assert!(stmt.text.contains("$fn$ @q $fn$"));
    }

    #[test]
    fn test_missing_parameter_is_invalid_parameter() {
        let err = rewrite_query("SELECT @missing", &BoundParameters::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_malformed_text_is_rejected() {
        for bad in ["SELECT 'open", "SELECT $1", "SELECT /* open", "SELECT $$ open", "  "] {
            let err = rewrite_query(bad, &BoundParameters::default()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidOperation, "{}", bad);
        }
    }

    #[test]
    fn test_template_render_with_escape() {
        let template = QueryTemplate::parse("SELECT '50%' WHERE a = @a AND b = @b").unwrap();
        assert_eq!(template.names(), &["a", "b"]);
        let rendered = template.render(
            |i| format!("%{}$L", i),
            |t| Cow::Owned(t.replace('%', "%%")),
        );
        assert_eq!(rendered, "SELECT '50%%' WHERE a = %1$L AND b = %2$L");
    }
}

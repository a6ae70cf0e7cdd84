//! Mapping between [`ScalarValue`] and Postgres wire types.
//!
//! Parameters are encoded against the type the server declared for each marker,
//! so `Text("2024-01-31")` binds to a `date` argument and `Int(1)` to an `int4`
//! without the command text ever changing. Conversion errors name the types
//! involved, never the value.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use conduit_common::{ScalarKind, ScalarValue};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

#[derive(Debug)]
struct ConversionError {
    from: ScalarKind,
    to: Type,
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot convert {} parameter to {}",
            self.from.as_str(),
            self.to.name()
        )
    }
}

impl Error for ConversionError {}

fn conversion(from: ScalarKind, to: &Type) -> BoxError {
    Box::new(ConversionError {
        from,
        to: to.clone(),
    })
}

fn rejects<E>(from: ScalarKind, to: &Type) -> impl FnOnce(E) -> BoxError + '_ {
    move |_| conversion(from, to)
}

fn is_text_like(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    ) || ty.name() == "citext"
}

/// Borrowed parameter encoder.
#[derive(Debug)]
pub struct PgParam<'a>(pub &'a ScalarValue);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            ScalarValue::Null => Ok(IsNull::Yes),
            ScalarValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ if is_text_like(ty) => b.to_string().to_sql(ty, out),
                _ => Err(conversion(ScalarKind::Bool, ty)),
            },
            ScalarValue::Int(i) => int_to_sql(*i, ty, out),
            ScalarValue::Float(f) => float_to_sql(*f, ty, out),
            ScalarValue::Text(s) => text_to_sql(s, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(i: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(i)
            .map_err(rejects(ScalarKind::Int, ty))?
            .to_sql(ty, out),
        Type::INT4 => i32::try_from(i)
            .map_err(rejects(ScalarKind::Int, ty))?
            .to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        Type::OID => u32::try_from(i)
            .map_err(rejects(ScalarKind::Int, ty))?
            .to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(i).to_sql(ty, out),
        _ if is_text_like(ty) => i.to_string().to_sql(ty, out),
        _ => Err(conversion(ScalarKind::Int, ty)),
    }
}

fn float_to_sql(f: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (f as f32).to_sql(ty, out),
        Type::FLOAT8 => f.to_sql(ty, out),
        Type::NUMERIC => Decimal::try_from(f)
            .map_err(rejects(ScalarKind::Float, ty))?
            .to_sql(ty, out),
        _ if is_text_like(ty) => f.to_string().to_sql(ty, out),
        _ => Err(conversion(ScalarKind::Float, ty)),
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        _ if is_text_like(ty) => s.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(s).map_err(rejects(ScalarKind::Text, ty))?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(rejects(ScalarKind::Text, ty))?
            .to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .map_err(rejects(ScalarKind::Text, ty))?
            .to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(s)
            .ok_or_else(|| conversion(ScalarKind::Text, ty))?
            .to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s)
            .map_err(rejects(ScalarKind::Text, ty))?
            .with_timezone(&Utc)
            .to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)
            .map_err(rejects(ScalarKind::Text, ty))?
            .to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            let i: i64 = s.trim().parse().map_err(rejects(ScalarKind::Text, ty))?;
            int_to_sql(i, ty, out)
        }
        Type::FLOAT4 | Type::FLOAT8 => {
            let f: f64 = s.trim().parse().map_err(rejects(ScalarKind::Text, ty))?;
            float_to_sql(f, ty, out)
        }
        Type::NUMERIC => Decimal::from_str(s.trim())
            .map_err(rejects(ScalarKind::Text, ty))?
            .to_sql(ty, out),
        Type::BOOL => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "on" => true.to_sql(ty, out),
            "false" | "f" | "0" | "no" | "off" => false.to_sql(ty, out),
            _ => Err(conversion(ScalarKind::Text, ty)),
        },
        _ if matches!(ty.kind(), Kind::Enum(_)) => {
            // enum labels travel as their text bytes
            out.extend_from_slice(s.as_bytes());
            Ok(IsNull::No)
        }
        _ => Err(conversion(ScalarKind::Text, ty)),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Result types the decoder understands.
pub fn is_supported(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::UUID
            | Type::DATE
            | Type::TIME
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::JSON
            | Type::JSONB
            | Type::BYTEA
    ) || is_text_like(ty)
        || <&str as FromSql>::accepts(ty)
        || matches!(ty.kind(), Kind::Enum(_))
}

/// Owned result decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct PgCell(pub ScalarValue);

impl<'a> FromSql<'a> for PgCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => ScalarValue::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => ScalarValue::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => ScalarValue::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => ScalarValue::Int(i64::from_sql(ty, raw)?),
            Type::OID => ScalarValue::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => ScalarValue::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => ScalarValue::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => ScalarValue::Text(numeric_text(raw)?),
            Type::UUID => ScalarValue::Text(Uuid::from_sql(ty, raw)?.to_string()),
            Type::DATE => {
                ScalarValue::Text(NaiveDate::from_sql(ty, raw)?.format("%Y-%m-%d").to_string())
            }
            Type::TIME => {
                ScalarValue::Text(NaiveTime::from_sql(ty, raw)?.format("%H:%M:%S%.f").to_string())
            }
            Type::TIMESTAMP => ScalarValue::Text(
                NaiveDateTime::from_sql(ty, raw)?
                    .format("%Y-%m-%dT%H:%M:%S%.f")
                    .to_string(),
            ),
            Type::TIMESTAMPTZ => ScalarValue::Text(
                DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
            Type::JSON | Type::JSONB => {
                ScalarValue::Text(serde_json::Value::from_sql(ty, raw)?.to_string())
            }
            Type::BYTEA => ScalarValue::Text(hex_bytea(raw)),
            _ if matches!(ty.kind(), Kind::Enum(_)) => {
                ScalarValue::Text(std::str::from_utf8(raw)?.to_string())
            }
            _ if is_text_like(ty) || <&str as FromSql>::accepts(ty) => {
                ScalarValue::Text(<&str as FromSql>::from_sql(ty, raw)?.to_string())
            }
            _ => {
                return Err(format!("unsupported column type {}", ty.name()).into());
            }
        };
        Ok(PgCell(value))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(PgCell(ScalarValue::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Exact decimal text of a binary `numeric`, at its declared display scale.
///
/// The wire form is `ndigits, weight, sign, dscale` followed by base-10000
/// digits; `weight` is the power of 10000 of the first digit.
fn numeric_text(raw: &[u8]) -> Result<String, BoxError> {
    let word = |i: usize| -> Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = word(0)? as usize;
    let weight = word(1)? as i16 as i64;
    let sign = word(2)?;
    let dscale = word(3)? as usize;
    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i64| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let mut out = String::with_capacity(ndigits * 4 + dscale + 2);
    if sign == NUMERIC_NEG && ndigits > 0 {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        out.push('.');
        let start = out.len();
        let mut i = weight + 1;
        while out.len() - start < dscale {
            out.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        out.truncate(start + dscale);
    }
    Ok(out)
}

fn hex_bytea(raw: &[u8]) -> String {
    let mut out = String::with_capacity(2 + raw.len() * 2);
    out.push_str("\\x");
    for byte in raw {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

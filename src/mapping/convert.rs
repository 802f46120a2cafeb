//! Cell decoding and the numeric/label coercions applied to every column.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Row, TypeInfo, ValueRef};
use thiserror::Error;

/// One decoded SQL cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl ColumnValue {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("<nil>"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("could not parse '{0}' as a number")]
    NotANumber(String),

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("invalid array literal '{0}'")]
    InvalidArray(String),
}

/// Decodes column `idx` of a row fetched through the simple query protocol,
/// where every value arrives as text.
///
/// # Errors
///
/// Returns an error if the column does not exist or is not valid UTF-8.
pub fn decode_cell(row: &PgRow, idx: usize) -> Result<ColumnValue, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(ColumnValue::Null);
    }

    let type_name = raw.type_info().name().to_owned();
    let text = raw.as_str().map_err(sqlx::Error::Decode)?;

    Ok(decode_text(&type_name, text))
}

/// Types a text-format value by its Postgres type name.
#[must_use]
pub fn decode_text(type_name: &str, text: &str) -> ColumnValue {
    match type_name {
        "BOOL" => match text {
            "t" | "true" => ColumnValue::Bool(true),
            "f" | "false" => ColumnValue::Bool(false),
            _ => ColumnValue::text(text),
        },
        "INT2" | "INT4" | "INT8" | "OID" | "XID" => text
            .parse::<i64>()
            .map_or_else(|_| ColumnValue::text(text), ColumnValue::Int),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => text
            .parse::<f64>()
            .map_or_else(|_| ColumnValue::text(text), ColumnValue::Float),
        "TIMESTAMPTZ" => DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .map_or_else(
                |_| ColumnValue::text(text),
                |t| ColumnValue::Timestamp(t.with_timezone(&Utc)),
            ),
        "TIMESTAMP" => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map_or_else(
            |_| ColumnValue::text(text),
            |t| ColumnValue::Timestamp(t.and_utc()),
        ),
        _ => ColumnValue::text(text),
    }
}

/// Numeric coercion: booleans to 1/0, timestamps to Unix seconds, text parsed
/// as a float, NULL to NaN.
///
/// # Errors
///
/// Returns an error for text that is not a number.
#[allow(clippy::cast_precision_loss)]
pub fn to_f64(value: &ColumnValue) -> Result<f64, ConvertError> {
    match value {
        ColumnValue::Null => Ok(f64::NAN),
        ColumnValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        ColumnValue::Int(i) => Ok(*i as f64),
        ColumnValue::Float(v) => Ok(*v),
        ColumnValue::Timestamp(t) => Ok(t.timestamp() as f64),
        ColumnValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ConvertError::NotANumber(s.clone())),
    }
}

/// Coercion used for histogram counts. NULL counts as zero.
///
/// # Errors
///
/// Returns an error for text that is not an unsigned integer.
#[allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
pub fn to_u64(value: &ColumnValue) -> Result<u64, ConvertError> {
    match value {
        ColumnValue::Null => Ok(0),
        ColumnValue::Bool(b) => Ok(u64::from(*b)),
        ColumnValue::Int(i) => Ok(*i as u64),
        ColumnValue::Float(v) => Ok(*v as u64),
        ColumnValue::Timestamp(t) => Ok(t.timestamp() as u64),
        ColumnValue::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| ConvertError::NotANumber(s.clone())),
    }
}

/// Label coercion. NULL becomes the empty string.
#[must_use]
pub fn to_label(value: &ColumnValue) -> String {
    match value {
        ColumnValue::Null => String::new(),
        ColumnValue::Bool(b) => b.to_string(),
        ColumnValue::Int(i) => i.to_string(),
        ColumnValue::Float(v) => v.to_string(),
        ColumnValue::Timestamp(t) => t.timestamp().to_string(),
        ColumnValue::Text(s) => s.clone(),
    }
}

/// Parses a Go duration string (`300ms`, `-1.5h`, `2h45m`, `0`) and returns
/// whole milliseconds, truncated toward zero.
///
/// # Errors
///
/// Returns an error if the string is not a valid duration.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn parse_go_duration(input: &str) -> Result<f64, ConvertError> {
    let invalid = || ConvertError::InvalidDuration(input.to_owned());

    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };

    if rest == "0" {
        return Ok(0.0);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let number: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "\u{b5}s" | "\u{3bc}s" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };

        nanos += number * scale;
        rest = tail;
    }

    let millis = (nanos / 1e6).trunc();
    Ok(if negative { -millis } else { millis })
}

/// Parses a one-dimensional Postgres array literal such as `{1,2.5,NULL}`.
/// Elements are returned unquoted; `NULL` elements become `None`.
///
/// # Errors
///
/// Returns an error if the literal is not a well-formed array.
pub fn parse_pg_array(input: &str) -> Result<Vec<Option<String>>, ConvertError> {
    let invalid = || ConvertError::InvalidArray(input.to_owned());

    let body = input
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(invalid)?;

    let mut out = Vec::new();
    if body.trim().is_empty() {
        return Ok(out);
    }

    let mut chars = body.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut element = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => element.push(chars.next().ok_or_else(invalid)?),
                    Some('"') => break,
                    Some(c) => element.push(c),
                    None => return Err(invalid()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                if c == '{' || c == '}' || c == '"' {
                    return Err(invalid());
                }
                element.push(c);
                chars.next();
            }
            element = element.trim().to_owned();
            if element.is_empty() {
                return Err(invalid());
            }
        }

        if !quoted && element.eq_ignore_ascii_case("NULL") {
            out.push(None);
        } else {
            out.push(Some(element));
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some(',') => {}
            None => break,
            Some(_) => return Err(invalid()),
        }
    }

    Ok(out)
}

/// Parses an array cell into floats, for histogram bucket bounds.
pub(crate) fn float_array(value: &ColumnValue) -> Result<Vec<f64>, ConvertError> {
    let ColumnValue::Text(text) = value else {
        return Err(ConvertError::InvalidArray(value.to_string()));
    };
    parse_pg_array(text)?
        .into_iter()
        .map(|e| {
            let e = e.ok_or_else(|| ConvertError::InvalidArray(text.clone()))?;
            e.parse::<f64>().map_err(|_| ConvertError::NotANumber(e))
        })
        .collect()
}

/// Parses an array cell into integers, for histogram bucket counts.
#[allow(clippy::cast_sign_loss)]
pub(crate) fn count_array(value: &ColumnValue) -> Result<Vec<u64>, ConvertError> {
    let ColumnValue::Text(text) = value else {
        return Err(ConvertError::InvalidArray(value.to_string()));
    };
    parse_pg_array(text)?
        .into_iter()
        .map(|e| {
            let e = e.ok_or_else(|| ConvertError::InvalidArray(text.clone()))?;
            e.parse::<i64>()
                .map(|v| v as u64)
                .map_err(|_| ConvertError::NotANumber(e))
        })
        .collect()
}

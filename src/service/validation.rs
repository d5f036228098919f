//! Request validation from catalog rules.

use crate::config::{ColumnInfo, ResolvedEntity, ValidationRule};
use crate::error::AppError;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a create body against per-column rules. All required fields must be present.
    pub fn validate(
        body: &HashMap<String, Value>,
        rules: &HashMap<String, ValidationRule>,
    ) -> Result<(), AppError> {
        let mut cols: Vec<&String> = rules.keys().collect();
        cols.sort();
        for col in cols {
            let rule = &rules[col];
            let val = body.get(col);
            if rule.required == Some(true) && val.map_or(true, Value::is_null) {
                return Err(AppError::Validation(format!("{} is required", col)));
            }
            if let Some(v) = val {
                validate_field(col, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for PATCH). Required is enforced only as "not null".
    pub fn validate_partial(
        body: &HashMap<String, Value>,
        rules: &HashMap<String, ValidationRule>,
    ) -> Result<(), AppError> {
        let mut cols: Vec<&String> = body.keys().collect();
        cols.sort();
        for col in cols {
            let v = &body[col];
            if let Some(rule) = rules.get(col) {
                if rule.required == Some(true) && v.is_null() {
                    return Err(AppError::Validation(format!("{} may not be null", col)));
                }
                validate_field(col, v, rule)?;
            }
        }
        Ok(())
    }

    /// Reject keys that are not columns of the entity or that only the database may set,
    /// and values whose JSON type cannot be cast to the column.
    pub fn check_writable(entity: &ResolvedEntity, body: &HashMap<String, Value>) -> Result<(), AppError> {
        let mut cols: Vec<&String> = body.keys().collect();
        cols.sort();
        for col in cols {
            let Some(info) = entity.column(col) else {
                return Err(AppError::Validation(format!("unknown field {}", col)));
            };
            if entity.read_only_columns.contains(col.as_str()) {
                return Err(AppError::Validation(format!("{} is read-only", col)));
            }
            check_type(info, &body[col])?;
        }
        Ok(())
    }
}

/// Values are bound as text and cast by PostgreSQL, so only JSON shapes with a faithful
/// text form for the column's type get through.
fn check_type(col: &ColumnInfo, v: &Value) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    let pg_type = if col.is_enum() {
        "enum"
    } else {
        col.pg_type.as_deref().unwrap_or("text")
    };
    let ok = match pg_type {
        "smallint" | "integer" | "bigint" | "int" | "int2" | "int4" | "int8" => match v {
            Value::Number(n) => n.is_i64() || n.is_u64(),
            Value::String(s) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        },
        "numeric" | "decimal" => match v {
            Value::Number(_) => true,
            Value::String(s) => finite(s).is_some(),
            _ => false,
        },
        "boolean" => v.is_boolean(),
        _ => v.is_string(),
    };
    if ok {
        return Ok(());
    }
    let expected = match pg_type {
        "smallint" | "integer" | "bigint" | "int" | "int2" | "int4" | "int8" => "an integer",
        "numeric" | "decimal" => "a finite number",
        "boolean" => "a boolean",
        _ => "a string",
    };
    Err(AppError::Validation(format!("{} must be {}", col.name, expected)))
}

fn finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn validate_field(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() > max as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at most {} characters",
                    col, max
                )));
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() < min as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at least {} characters",
                    col, min
                )));
            }
        }
    }
    if let Some(ref pattern) = rule.pattern {
        let re = Regex::new(pattern).map_err(|_| AppError::Validation(format!("invalid pattern for {}", col)))?;
        if let Some(s) = v.as_str() {
            if !re.is_match(s) {
                return Err(AppError::Validation(format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(AppError::Validation(format!(
                "{} must be one of: {}",
                col,
                allowed
                    .iter()
                    .map(|a| a.as_str().map(str::to_string).unwrap_or_else(|| a.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
    }
    let bounded = rule.minimum.is_some() || rule.maximum.is_some();
    let number = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if bounded => {
            Some(finite(s).ok_or_else(|| AppError::Validation(format!("{} must be a finite number", col)))?)
        }
        _ => None,
    };
    if let Some(min) = rule.minimum {
        if let Some(n) = number {
            if n < min {
                return Err(AppError::Validation(format!("{} must be at least {}", col, min)));
            }
        }
    }
    if let Some(max) = rule.maximum {
        if let Some(n) = number {
            if n > max {
                return Err(AppError::Validation(format!("{} must be at most {}", col, max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else { return Ok(()) };
    // Blank strings are allowed; NOT NULL columns default to ''.
    if s.is_empty() {
        return Ok(());
    }
    match format.to_lowercase().as_str() {
        "email" => {
            let valid = s
                .split_once('@')
                .map(|(user, domain)| !user.is_empty() && domain.contains('.') && !domain.ends_with('.'))
                .unwrap_or(false);
            if !valid {
                return Err(AppError::Validation(format!("{} must be a valid email", col)));
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err(AppError::Validation(format!("{} must be a valid UUID", col)));
            }
        }
        "date" => {
            if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
                return Err(AppError::Validation(format!("{} must be a date (YYYY-MM-DD)", col)));
            }
        }
        _ => {}
    }
    Ok(())
}

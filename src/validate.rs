//! Shape and type checks for incoming JSON payloads.
//!
//! All checks are pure and fail fast: callers run several in sequence and the
//! first violation aborts the whole validation with a 400-class error. The
//! typed checks treat an absent or null value as a no-op, so optional fields
//! validate for free; pair them with [`require_properties`] when a field is
//! mandatory.

use serde_json::{Map, Value};

use crate::error::AppError;

fn absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Fails if any of the named keys is missing from the object. A key that is
/// present with a null value still counts as present.
pub fn require_properties(obj: &Map<String, Value>, keys: &[&str]) -> Result<(), AppError> {
    let missing: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|key| !obj.contains_key(*key))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Required properties missing: {}",
            missing.join(", ")
        )))
    }
}

/// Fails if the object has any key outside the allowed set.
pub fn restrict_properties(obj: &Map<String, Value>, allowed: &[&str]) -> Result<(), AppError> {
    let unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|key| !allowed.contains(key))
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Properties not allowed: {}",
            unknown.join(", ")
        )))
    }
}

/// Fails if the value under `key` is present and not a string, or not a member
/// of `allowed_values` when that set is given.
pub fn check_string(
    obj: &Map<String, Value>,
    key: &str,
    allowed_values: Option<&[&str]>,
) -> Result<(), AppError> {
    let value = match obj.get(key) {
        None | Some(Value::Null) => return Ok(()),
        Some(value) => value,
    };

    let Some(s) = value.as_str() else {
        return Err(AppError::validation(format!(
            "The '{key}' property must be a string, not this: {value}"
        )));
    };

    if let Some(allowed) = allowed_values {
        if !allowed.contains(&s) {
            return Err(AppError::validation(format!(
                "Invalid value for '{key}' property: {s}. Must be one of: {}",
                allowed.join(", ")
            )));
        }
    }

    Ok(())
}

/// Fails if the value under `key` is present and not a number, or outside the
/// inclusive `min`/`max` bounds when given.
pub fn check_number(
    obj: &Map<String, Value>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), AppError> {
    let value = match obj.get(key) {
        None | Some(Value::Null) => return Ok(()),
        Some(value) => value,
    };

    let Some(n) = value.as_f64() else {
        return Err(AppError::validation(format!(
            "The '{key}' property must be a number, not this: {value}"
        )));
    };

    if let Some(min) = min {
        if n < min {
            return Err(AppError::validation(format!(
                "The '{key}' property is {n}, but is not allowed to be less than {min}"
            )));
        }
    }

    if let Some(max) = max {
        if n > max {
            return Err(AppError::validation(format!(
                "The '{key}' property is {n}, but is not allowed to be greater than {max}"
            )));
        }
    }

    Ok(())
}

/// Fails if the value under `key` is present and not an array. When
/// `allowed_element_values` is given, every element must be a string member of
/// that set.
pub fn check_array(
    obj: &Map<String, Value>,
    key: &str,
    allowed_element_values: Option<&[&str]>,
) -> Result<(), AppError> {
    let value = match obj.get(key) {
        None | Some(Value::Null) => return Ok(()),
        Some(value) => value,
    };

    let Some(elements) = value.as_array() else {
        return Err(AppError::validation(format!(
            "The '{key}' property must be an array, not this: {value}"
        )));
    };

    if let Some(allowed) = allowed_element_values {
        let invalid: Vec<String> = elements
            .iter()
            .filter(|el| !el.as_str().is_some_and(|s| allowed.contains(&s)))
            .map(Value::to_string)
            .collect();

        if !invalid.is_empty() {
            return Err(AppError::validation(format!(
                "Invalid values found in '{key}' array: {}. Must be one of: {}",
                invalid.join(", "),
                allowed.join(", ")
            )));
        }
    }

    Ok(())
}

/// Fails if the value under `key` is present and not a plain (non-array)
/// object.
pub fn check_object(obj: &Map<String, Value>, key: &str) -> Result<(), AppError> {
    let value = obj.get(key);

    if absent(value) || value.is_some_and(Value::is_object) {
        return Ok(());
    }

    Err(AppError::validation(format!(
        "The '{key}' property must be a plain object, not this: {}",
        obj[key]
    )))
}

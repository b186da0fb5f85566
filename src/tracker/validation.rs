use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::Value;
use crate::schema::Constraint;

lazy_static::lazy_static! {
    static ref PATTERN_CACHE: Arc<Mutex<LruCache<String, Arc<Regex>>>> = Arc::new(Mutex::new(
        LruCache::new(NonZeroUsize::new(200).unwrap_or(NonZeroUsize::MIN))
    ));
}

/// Compiles a `Pattern` constraint, anchored so it must match the whole value.
///
/// Compiled patterns are shared process-wide through a bounded LRU.
pub fn compile_pattern(pattern: &str) -> std::result::Result<Arc<Regex>, regex::Error> {
    {
        let mut cache = PATTERN_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(regex) = cache.get(pattern) {
            return Ok(Arc::clone(regex));
        }
    }

    let compiled = Arc::new(Regex::new(&format!("^(?:{})$", pattern))?);

    {
        let mut cache = PATTERN_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
        cache.put(pattern.to_string(), Arc::clone(&compiled));
    }

    Ok(compiled)
}

/// One failed constraint, naming the offending property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub property: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.message)
    }
}

/// Ordered list of validation failures, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    /// Errors reported for `property` (case-insensitive).
    pub fn for_property<'a>(&'a self, property: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.0
            .iter()
            .filter(move |e| e.property.eq_ignore_ascii_case(property))
    }

    pub fn into_inner(self) -> Vec<ValidationError> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Checks `value` against every constraint of `property`, appending failures.
///
/// Only `Required` looks at a null value; the other constraints treat null as
/// "nothing to check".
pub fn check_constraints(
    property: &str,
    constraints: &[Constraint],
    value: &Value,
    errors: &mut ValidationErrors,
) {
    for constraint in constraints {
        if let Some(message) = check_one(constraint, value) {
            errors.push(ValidationError::new(property, message));
        }
    }
}

fn check_one(constraint: &Constraint, value: &Value) -> Option<String> {
    match constraint {
        Constraint::Required => match value {
            Value::Null => Some("is required".to_string()),
            Value::Text(s) if s.trim().is_empty() => Some("is required".to_string()),
            _ => None,
        },
        Constraint::MinLength(min) => {
            let len = value.as_str()?.chars().count();
            (len < *min).then(|| format!("must be at least {} characters long", min))
        }
        Constraint::MaxLength(max) => {
            let len = value.as_str()?.chars().count();
            (len > *max).then(|| format!("must be at most {} characters long", max))
        }
        Constraint::Range { min, max } => {
            let n = value.as_f64()?;
            match (min, max) {
                (Some(lo), Some(hi)) if n < *lo || n > *hi => {
                    Some(format!("must be between {} and {}", lo, hi))
                }
                (Some(lo), None) if n < *lo => Some(format!("must be at least {}", lo)),
                (None, Some(hi)) if n > *hi => Some(format!("must be at most {}", hi)),
                _ => None,
            }
        }
        Constraint::Pattern(pattern) => {
            let text = value.as_str()?;
            match compile_pattern(pattern) {
                Ok(regex) if regex.is_match(text) => None,
                Ok(_) => Some(format!("does not match pattern '{}'", pattern)),
                Err(err) => Some(format!("has an invalid pattern: {}", err)),
            }
        }
    }
}

//! Ordered candidate resolution for telemetry fields.
//!
//! Every canonical field is described by a [`Candidates`] list: lookup paths in priority
//! order (current key first, then legacy names and alternate nesting). The first path that
//! yields a value of the requested kind wins. A value that is present but cannot be coerced
//! is skipped, it never turns into an error.

use serde_json::Value;

/// One lookup path. Segments address object keys; numeric segments also index arrays.
pub type Path = &'static [&'static str];

/// Ordered list of lookup paths for one field.
#[derive(Debug, Clone, Copy)]
pub struct Candidates(pub &'static [Path]);

impl Candidates {
    pub const NONE: Candidates = Candidates(&[]);

    /// First raw value that is present and not null.
    pub fn value<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .filter_map(|path| lookup(root, path))
            .find(|v| !v.is_null())
    }

    /// First value coercible to a finite number.
    pub fn number(&self, root: &Value) -> Option<f64> {
        self.0
            .iter()
            .filter_map(|path| lookup(root, path))
            .find_map(coerce_number)
    }

    /// First value coercible to a non-negative integer.
    pub fn unsigned(&self, root: &Value) -> Option<u32> {
        self.0
            .iter()
            .filter_map(|path| lookup(root, path))
            .filter_map(coerce_number)
            .find(|n| *n >= 0.0 && *n <= u32::MAX as f64)
            .map(|n| n.round() as u32)
    }

    /// First value coercible to a non-empty string.
    pub fn string(&self, root: &Value) -> Option<String> {
        self.0
            .iter()
            .filter_map(|path| lookup(root, path))
            .find_map(coerce_string)
    }
}

/// Walk `path` from `root`.
pub fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Numbers pass through; numeric strings are parsed after trimming unit suffixes
/// such as `%`, `dBm` or `°C`. Booleans, objects, arrays and non-finite values yield `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s
                .trim()
                .trim_end_matches(|c: char| c.is_alphabetic() || c == '%' || c == '°')
                .trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

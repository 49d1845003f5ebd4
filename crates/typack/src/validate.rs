//! # Validation
//!
//! A single recursive walk that checks a `serde_json::Value` against a
//! [`Schema`] and rebuilds the normalized value on the way out.
//!
//! ## Invariants
//! - **Total**: every input produces `Ok` or `Err`, never a panic.
//! - **Exhaustive**: sibling fields and items keep being checked after a
//!   failure so that all issues are reported at once.
//! - **Bounded**: recursion stops at [`MAX_DEPTH`].

use serde_json::Map;
use serde_json::Value;

use crate::FieldPath;
use crate::Issue;
use crate::Result;
use crate::Segment;
use crate::ValidationError;
use crate::schema::ArraySchema;
use crate::schema::NumberSchema;
use crate::schema::ObjectSchema;
use crate::schema::Schema;
use crate::schema::StringSchema;
use crate::schema::UnknownKeys;

/// The maximum nesting depth of a validated value.
pub const MAX_DEPTH: usize = 64;

impl Schema {
    /// Validates `value`, returning the normalized value on success.
    pub fn validate(&self, value: &Value) -> Result<Value> {
        let mut walker = Walker::default();
        let normalized = walker.check(self, value, 0);
        match normalized {
            Some(v) if walker.issues.is_empty() => Ok(v),
            _ => Err(ValidationError::new(walker.issues)),
        }
    }

    /// Returns true if `value` would validate.
    pub fn accepts(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }
}

/// Short name of a JSON value's type, as used in issue messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Default)]
struct Walker {
    path: FieldPath,
    issues: Vec<Issue>,
}

impl Walker {
    fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(Issue {
            path: self.path.clone(),
            message: message.into(),
        });
    }

    fn mismatch(&mut self, expected: &str, found: &Value) {
        self.issue(format!("expected {}, found {}", expected, json_kind(found)));
    }

    fn check(&mut self, schema: &Schema, value: &Value, depth: usize) -> Option<Value> {
        if depth > MAX_DEPTH {
            self.issue(format!("nesting exceeds {} levels", MAX_DEPTH));
            return None;
        }

        match schema {
            Schema::Any => Some(value.clone()),
            Schema::Boolean => match value {
                Value::Bool(_) => Some(value.clone()),
                other => {
                    self.mismatch("boolean", other);
                    None
                }
            },
            Schema::String(rules) => self.check_string(rules, value),
            Schema::Number(rules) => self.check_number(rules, value),
            Schema::Enum(variants) => self.check_enum(variants, value),
            Schema::Array(rules) => self.check_array(rules, value, depth),
            Schema::Object(rules) => self.check_object(rules, value, depth),
            Schema::Optional(inner) | Schema::Nullable(inner) => match value {
                Value::Null => Some(Value::Null),
                other => self.check(inner, other, depth),
            },
        }
    }

    fn check_string(&mut self, rules: &StringSchema, value: &Value) -> Option<Value> {
        let Value::String(s) = value else {
            self.mismatch("string", value);
            return None;
        };

        let len = s.chars().count();
        let mut ok = true;
        if let Some(min) = rules.min_len {
            if len < min {
                self.issue(format!("expected at least {} characters, found {}", min, len));
                ok = false;
            }
        }
        if let Some(max) = rules.max_len {
            if len > max {
                self.issue(format!("expected at most {} characters, found {}", max, len));
                ok = false;
            }
        }
        if let Some(re) = &rules.pattern {
            if !re.is_match(s) {
                self.issue(format!("expected string matching /{}/", re.as_str()));
                ok = false;
            }
        }

        ok.then(|| value.clone())
    }

    fn check_number(&mut self, rules: &NumberSchema, value: &Value) -> Option<Value> {
        let Value::Number(num) = value else {
            self.mismatch(if rules.integer { "integer" } else { "number" }, value);
            return None;
        };

        let Some(n) = num.as_f64() else {
            self.issue(format!("number {} is not representable", num));
            return None;
        };
        let mut ok = true;
        if rules.integer && !(num.is_i64() || num.is_u64() || n.fract() == 0.0) {
            self.issue(format!("expected integer, found {}", num));
            ok = false;
        }
        if let Some(min) = rules.min {
            if n < min {
                self.issue(format!("expected number >= {}, found {}", min, num));
                ok = false;
            }
        }
        if let Some(max) = rules.max {
            if n > max {
                self.issue(format!("expected number <= {}, found {}", max, num));
                ok = false;
            }
        }

        ok.then(|| value.clone())
    }

    fn check_enum(&mut self, variants: &[String], value: &Value) -> Option<Value> {
        let Value::String(s) = value else {
            self.mismatch("string", value);
            return None;
        };

        if variants.iter().any(|v| v == s) {
            return Some(value.clone());
        }

        let allowed = variants
            .iter()
            .map(|v| format!("\"{}\"", v))
            .collect::<Vec<_>>()
            .join(" | ");
        self.issue(format!("expected one of {}, found \"{}\"", allowed, s));
        None
    }

    fn check_array(&mut self, rules: &ArraySchema, value: &Value, depth: usize) -> Option<Value> {
        let Value::Array(items) = value else {
            self.mismatch("array", value);
            return None;
        };

        let mut ok = true;
        if let Some(min) = rules.min_items {
            if items.len() < min {
                self.issue(format!("expected at least {} items, found {}", min, items.len()));
                ok = false;
            }
        }
        if let Some(max) = rules.max_items {
            if items.len() > max {
                self.issue(format!("expected at most {} items, found {}", max, items.len()));
                ok = false;
            }
        }

        let mut out = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            self.path.push(Segment::Index(idx));
            match self.check(&rules.item, item, depth + 1) {
                Some(v) => out.push(v),
                None => ok = false,
            }
            self.path.pop();
        }

        ok.then_some(Value::Array(out))
    }

    fn check_object(&mut self, rules: &ObjectSchema, value: &Value, depth: usize) -> Option<Value> {
        let Value::Object(entries) = value else {
            self.mismatch("object", value);
            return None;
        };

        let mut ok = true;
        let mut out = Map::new();

        for field in &rules.fields {
            self.path.push(Segment::Key(field.name.clone()));
            match entries.get(&field.name) {
                None if field.schema.is_optional() => {}
                None => {
                    self.issue(format!("missing required field (expected {})", field.schema.kind()));
                    ok = false;
                }
                Some(v) => match self.check(&field.schema, v, depth + 1) {
                    Some(normalized) => {
                        out.insert(field.name.clone(), normalized);
                    }
                    None => ok = false,
                },
            }
            self.path.pop();
        }

        for (key, v) in entries {
            if rules.get(key).is_some() {
                continue;
            }
            match rules.unknown {
                UnknownKeys::Strip => {}
                UnknownKeys::Passthrough => {
                    out.insert(key.clone(), v.clone());
                }
                UnknownKeys::Strict => {
                    self.path.push(Segment::Key(key.clone()));
                    self.issue("unrecognized key");
                    self.path.pop();
                    ok = false;
                }
            }
        }

        ok.then_some(Value::Object(out))
    }
}

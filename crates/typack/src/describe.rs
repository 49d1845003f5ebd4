//! JSON-Schema-like rendering of a [`Schema`], for introspection.

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::schema::Schema;
use crate::schema::UnknownKeys;

impl Schema {
    /// Renders this schema in a JSON-Schema-like form.
    ///
    /// Optional object fields are left out of `required`; a top-level
    /// `Optional` describes its inner shape.
    pub fn describe(&self) -> Value {
        match self {
            Schema::Any => json!({}),
            Schema::Boolean => json!({ "type": "boolean" }),
            Schema::String(rules) => {
                let mut out = type_object("string");
                insert_opt(&mut out, "minLength", rules.min_len.map(Value::from));
                insert_opt(&mut out, "maxLength", rules.max_len.map(Value::from));
                insert_opt(&mut out, "pattern", rules.pattern.as_ref().map(|re| Value::from(re.as_str())));
                Value::Object(out)
            }
            Schema::Number(rules) => {
                let mut out = type_object(if rules.integer { "integer" } else { "number" });
                insert_opt(&mut out, "minimum", rules.min.map(Value::from));
                insert_opt(&mut out, "maximum", rules.max.map(Value::from));
                Value::Object(out)
            }
            Schema::Enum(variants) => json!({ "type": "string", "enum": variants }),
            Schema::Array(rules) => {
                let mut out = type_object("array");
                out.insert("items".into(), rules.item.describe());
                insert_opt(&mut out, "minItems", rules.min_items.map(Value::from));
                insert_opt(&mut out, "maxItems", rules.max_items.map(Value::from));
                Value::Object(out)
            }
            Schema::Object(rules) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in &rules.fields {
                    properties.insert(field.name.clone(), field.schema.describe());
                    if !field.schema.is_optional() {
                        required.push(Value::from(field.name.clone()));
                    }
                }

                let mut out = type_object("object");
                out.insert("properties".into(), Value::Object(properties));
                out.insert("required".into(), Value::Array(required));
                if rules.unknown == UnknownKeys::Strict {
                    out.insert("additionalProperties".into(), Value::Bool(false));
                }
                Value::Object(out)
            }
            Schema::Optional(inner) => inner.describe(),
            Schema::Nullable(inner) => json!({ "anyOf": [inner.describe(), { "type": "null" }] }),
        }
    }
}

fn type_object(ty: &str) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("type".into(), Value::from(ty));
    out
}

fn insert_opt(out: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        out.insert(key.into(), v);
    }
}

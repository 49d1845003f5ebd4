//! # Schema model
//!
//! Shapes are plain data. Scalar constraints live on small builder structs
//! that convert into [`Schema`], so a shape reads the way it nests:
//!
//! ```
//! use typack::Schema;
//!
//! let user = Schema::object()
//!     .field("id", Schema::string().non_empty())
//!     .field("age", Schema::integer().min(0.0))
//!     .optional_field("nickname", Schema::string().max_len(32));
//! # let _ = user;
//! ```

use regex::Regex;

/// A composable description of an expected value shape.
#[derive(Debug, Clone)]
pub enum Schema {
    /// Accepts any value unchanged.
    Any,
    Boolean,
    String(StringSchema),
    Number(NumberSchema),
    /// A string drawn from a fixed set of literals.
    Enum(Vec<String>),
    Array(ArraySchema),
    Object(ObjectSchema),
    /// May be absent (or null). Inside an object this makes the field optional.
    Optional(Box<Schema>),
    /// May be null.
    Nullable(Box<Schema>),
}

impl Schema {
    pub fn any() -> Self {
        Schema::Any
    }

    pub fn boolean() -> Self {
        Schema::Boolean
    }

    pub fn string() -> StringSchema {
        StringSchema::default()
    }

    pub fn number() -> NumberSchema {
        NumberSchema::default()
    }

    pub fn integer() -> NumberSchema {
        NumberSchema {
            integer: true,
            ..NumberSchema::default()
        }
    }

    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Enum(variants.into_iter().map(Into::into).collect())
    }

    pub fn array(item: impl Into<Schema>) -> ArraySchema {
        ArraySchema {
            item: Box::new(item.into()),
            min_items: None,
            max_items: None,
        }
    }

    pub fn object() -> ObjectSchema {
        ObjectSchema::default()
    }

    pub fn optional(inner: impl Into<Schema>) -> Self {
        Schema::Optional(Box::new(inner.into()))
    }

    pub fn nullable(inner: impl Into<Schema>) -> Self {
        Schema::Nullable(Box::new(inner.into()))
    }

    /// True if an object field with this schema may be left out.
    pub fn is_optional(&self) -> bool {
        matches!(self, Schema::Optional(_) | Schema::Any)
    }

    /// Short name of the expected shape, as used in issue messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Schema::Any => "any",
            Schema::Boolean => "boolean",
            Schema::String(_) => "string",
            Schema::Number(n) if n.integer => "integer",
            Schema::Number(_) => "number",
            Schema::Enum(_) => "enum",
            Schema::Array(_) => "array",
            Schema::Object(_) => "object",
            Schema::Optional(inner) | Schema::Nullable(inner) => inner.kind(),
        }
    }
}

/// String constraints. Lengths count Unicode scalar values, not bytes.
#[derive(Debug, Clone, Default)]
pub struct StringSchema {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub pattern: Option<Regex>,
}

impl StringSchema {
    pub fn min_len(mut self, n: usize) -> Self {
        self.min_len = Some(n);
        self
    }

    pub fn max_len(mut self, n: usize) -> Self {
        self.max_len = Some(n);
        self
    }

    pub fn non_empty(self) -> Self {
        self.min_len(1)
    }

    /// The whole-string match is up to the caller: anchor the regex if needed.
    pub fn pattern(mut self, re: Regex) -> Self {
        self.pattern = Some(re);
        self
    }
}

/// Numeric bounds, both inclusive.
#[derive(Debug, Clone, Default)]
pub struct NumberSchema {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub integer: bool,
}

impl NumberSchema {
    pub fn min(mut self, n: f64) -> Self {
        self.min = Some(n);
        self
    }

    pub fn max(mut self, n: f64) -> Self {
        self.max = Some(n);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ArraySchema {
    pub item: Box<Schema>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

impl ArraySchema {
    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }
}

/// What to do with object keys the schema does not mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownKeys {
    /// Drop them from the normalized value.
    #[default]
    Strip,
    /// Report each one as an issue.
    Strict,
    /// Keep them untouched.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
}

/// Object shape. Field order is declaration order and is kept in descriptions.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    pub fields: Vec<Field>,
    pub unknown: UnknownKeys,
}

impl ObjectSchema {
    /// Declares a field. Redeclaring a name replaces the earlier schema.
    pub fn field(mut self, name: impl Into<String>, schema: impl Into<Schema>) -> Self {
        let name = name.into();
        let schema = schema.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.schema = schema,
            None => self.fields.push(Field { name, schema }),
        }
        self
    }

    pub fn optional_field(self, name: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.field(name, Schema::optional(schema))
    }

    pub fn strict(mut self) -> Self {
        self.unknown = UnknownKeys::Strict;
        self
    }

    pub fn passthrough(mut self) -> Self {
        self.unknown = UnknownKeys::Passthrough;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.schema)
    }
}

impl From<StringSchema> for Schema {
    fn from(s: StringSchema) -> Self {
        Schema::String(s)
    }
}

impl From<NumberSchema> for Schema {
    fn from(n: NumberSchema) -> Self {
        Schema::Number(n)
    }
}

impl From<ArraySchema> for Schema {
    fn from(a: ArraySchema) -> Self {
        Schema::Array(a)
    }
}

impl From<ObjectSchema> for Schema {
    fn from(o: ObjectSchema) -> Self {
        Schema::Object(o)
    }
}

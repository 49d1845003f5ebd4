//! # Typack
//!
//! Composable value shapes for JSON-compatible input, and a pure validator.
//!
//! ## Philosophy
//!
//! - **Plain data**: A [`Schema`] is an ordinary enum. Builders are consumed by
//!   value and convert into `Schema`, so shapes nest without ceremony.
//! - **Total**: Validation never panics. Every failure is an [`Issue`] with a
//!   path such as `user.tags[2]` and a short message.
//! - **Normalizing**: A successful validation returns the value the caller
//!   should hand on, e.g. with unknown object keys stripped.
//! - **Bounded**: Nesting deeper than [`MAX_DEPTH`] is an issue, not a stack overflow.

mod describe;
mod path;
mod schema;
mod shape;
mod validate;


pub use path::FieldPath;
pub use path::Segment;
pub use schema::ArraySchema;
pub use schema::Field;
pub use schema::NumberSchema;
pub use schema::ObjectSchema;
pub use schema::Schema;
pub use schema::StringSchema;
pub use schema::UnknownKeys;
pub use shape::Shape;
pub use validate::MAX_DEPTH;
pub use validate::json_kind;

/// A single reason a value did not match its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub path: FieldPath,
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_root() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validation failure. Always carries at least one issue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render_issues(.issues))]
pub struct ValidationError {
    issues: Vec<Issue>,
}

impl ValidationError {
    pub(crate) fn new(issues: Vec<Issue>) -> Self {
        debug_assert!(!issues.is_empty());
        Self { issues }
    }

    /// All issues, in the order they were found.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// The first issue. Validation errors are never empty.
    pub fn first(&self) -> &Issue {
        &self.issues[0]
    }

    /// Rendered path of the first issue, `None` when it sits at the root.
    pub fn path(&self) -> Option<String> {
        let path = &self.first().path;
        (!path.is_root()).then(|| path.to_string())
    }
}

fn render_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(Issue::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Specialized `Result` for validation.
pub type Result<T> = std::result::Result<T, ValidationError>;

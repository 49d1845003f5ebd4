//! Procedure declarations shared by the serving and the calling side.

use std::marker::PhantomData;

use serde::Deserialize;
use serde::Serialize;

/// Read (`query`) or write (`mutation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    Query,
    Mutation,
}

impl ProcedureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

impl std::fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed handle on a procedure: its full dotted path and the static types of
/// its input and output.
///
/// Declared once as a `const` and used by both the router (to register a
/// handler with exactly these types) and the client (to call it).
///
/// ```
/// use tyrpc::ProcedureRef;
///
/// pub const GET_BY_ID: ProcedureRef<String, serde_json::Value> = ProcedureRef::query("user.getById");
/// assert_eq!(GET_BY_ID.path(), "user.getById");
/// ```
pub struct ProcedureRef<In, Out> {
    path: &'static str,
    kind: ProcedureKind,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out> ProcedureRef<In, Out> {
    pub const fn query(path: &'static str) -> Self {
        Self {
            path,
            kind: ProcedureKind::Query,
            _types: PhantomData,
        }
    }

    pub const fn mutation(path: &'static str) -> Self {
        Self {
            path,
            kind: ProcedureKind::Mutation,
            _types: PhantomData,
        }
    }

    pub const fn path(&self) -> &'static str {
        self.path
    }

    pub const fn kind(&self) -> ProcedureKind {
        self.kind
    }
}

impl<In, Out> Clone for ProcedureRef<In, Out> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<In, Out> Copy for ProcedureRef<In, Out> {}

impl<In, Out> std::fmt::Debug for ProcedureRef<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureRef")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

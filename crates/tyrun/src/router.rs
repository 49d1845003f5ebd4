//! # Router
//!
//! A flat, immutable map from full dotted paths to procedures.
//!
//! Nested routers are flattened when merged: merging `sub` under `"user"`
//! registers each of its paths as `user.<path>`. Every mistake (a duplicate
//! path, an empty segment) surfaces when the router is assembled, never at
//! call time.

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;

use tyrpc::CallError;
use tyrpc::ProcedureRef;

use crate::context::Context;
use crate::procedure::HandlerError;
use crate::procedure::Procedure;
use crate::procedure::ProcedureBuilder;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("duplicate procedure path '{0}'")]
    DuplicatePath(String),
    #[error("invalid procedure path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Clone, Default)]
pub struct Router {
    procedures: BTreeMap<String, Procedure>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Finds the procedure registered at exactly `path`.
    ///
    /// Prefixes do not resolve: with only `user.getById` registered,
    /// `user` is `NOT_FOUND`.
    pub fn resolve(&self, path: &str) -> std::result::Result<&Procedure, CallError> {
        self.procedures
            .get(path)
            .ok_or_else(|| CallError::not_found(format!("no procedure at path '{}'", path)))
    }

    pub fn get(&self, path: &str) -> Option<&Procedure> {
        self.procedures.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.procedures.contains_key(path)
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Folds `sub` in under `prefix`. See [`RouterBuilder::merge`].
    pub fn merge(self, prefix: &str, sub: Router) -> Result<Router> {
        Ok(RouterBuilder { procedures: self.procedures }.merge(prefix, sub)?.build())
    }

    /// A listing of every procedure with its kind and schemas.
    pub fn describe(&self) -> Value {
        let procedures: serde_json::Map<String, Value> = self
            .procedures
            .iter()
            .map(|(path, procedure)| {
                let mut entry = json!({
                    "kind": procedure.kind().as_str(),
                    "input": procedure.input_schema().describe(),
                });
                if let Some(output) = procedure.output_schema() {
                    entry["output"] = output.describe();
                }
                (path.clone(), entry)
            })
            .collect();
        json!({ "procedures": procedures })
    }
}

#[derive(Debug, Default)]
pub struct RouterBuilder {
    procedures: BTreeMap<String, Procedure>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `procedure` at `path`, which may itself be dotted.
    pub fn procedure(mut self, path: &str, procedure: Procedure) -> Result<Self> {
        check_path(path)?;
        self.insert(path.to_string(), procedure)?;
        Ok(self)
    }

    /// Registers the handler for a typed declaration at the declaration's
    /// full path.
    ///
    /// The handler's input and output types are pinned to the declaration's,
    /// so the client and the server cannot disagree on them. The builder's
    /// kind is replaced by the declaration's.
    pub fn implement<In, Out, F, Fut, E>(
        self,
        declaration: &ProcedureRef<In, Out>,
        builder: ProcedureBuilder,
        f: F,
    ) -> Result<Self>
    where
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Out, E>> + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
    {
        let procedure = builder.with_kind(declaration.kind()).resolve(f);
        self.procedure(declaration.path(), procedure)
    }

    /// Folds every procedure of `sub` in under `prefix`.
    ///
    /// An empty prefix merges at the root. Fails on the first path that
    /// already exists, naming it.
    pub fn merge(mut self, prefix: &str, sub: Router) -> Result<Self> {
        if !prefix.is_empty() {
            check_path(prefix)?;
        }
        for (path, procedure) in sub.procedures {
            let full = if prefix.is_empty() {
                path
            } else {
                format!("{}.{}", prefix, path)
            };
            self.insert(full, procedure)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Router {
        Router {
            procedures: self.procedures,
        }
    }

    fn insert(&mut self, path: String, procedure: Procedure) -> Result<()> {
        if self.procedures.contains_key(&path) {
            return Err(RouterError::DuplicatePath(path));
        }
        self.procedures.insert(path, procedure);
        Ok(())
    }
}

fn check_path(path: &str) -> Result<()> {
    let invalid = |reason| RouterError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(invalid("segments may only hold letters, digits, '_' and '-'"));
        }
    }
    Ok(())
}

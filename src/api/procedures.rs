//! Named RPC procedures and their access levels.

use super::{
    context::{Access, RequestContext},
    error::RpcError,
    handlers::session,
};
use crate::BoxFuture;
use serde_json::Value;
use std::{collections::HashMap, future::Future, sync::Arc};

pub type ProcedureResult = Result<Value, RpcError>;

type Handler = Arc<dyn Fn(Arc<RequestContext>, Value) -> BoxFuture<'static, ProcedureResult> + Send + Sync>;

#[derive(Clone)]
pub struct Procedure {
    access: Access,
    handler: Handler,
}

impl Procedure {
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    pub async fn call(&self, context: Arc<RequestContext>, input: Value) -> ProcedureResult {
        (self.handler)(context, input).await
    }
}

/// Registry served by the RPC endpoint.
#[derive(Clone, Default)]
pub struct Procedures {
    entries: HashMap<String, Procedure>,
}

impl std::fmt::Debug for Procedures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedures")
            .field("names", &self.names())
            .finish()
    }
}

impl Procedures {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `system.ping`, `session.peek` and `session.whoami`.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .public("system.ping", session::ping)
            .public("session.peek", session::peek)
            .protected("session.whoami", session::whoami)
    }

    /// Register a procedure callable without a principal. Replaces any
    /// procedure of the same name.
    #[must_use]
    pub fn public<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Arc<RequestContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        self.register(name, Access::Public, handler)
    }

    /// Register a procedure that requires a verified principal.
    #[must_use]
    pub fn protected<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Arc<RequestContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        self.register(name, Access::Protected, handler)
    }

    fn register<F, Fut>(mut self, name: &str, access: Access, handler: F) -> Self
    where
        F: Fn(Arc<RequestContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |context, input| Box::pin(handler(context, input)));
        self.entries
            .insert(name.to_string(), Procedure { access, handler });
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Procedure> {
        self.entries.get(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_are_registered_with_their_access_level() {
        let procedures = Procedures::with_builtins();
        assert_eq!(
            procedures.names(),
            vec!["session.peek", "session.whoami", "system.ping"]
        );
        assert_eq!(
            procedures.get("system.ping").map(Procedure::access),
            Some(Access::Public)
        );
        assert_eq!(
            procedures.get("session.whoami").map(Procedure::access),
            Some(Access::Protected)
        );
        assert!(procedures.get("missing").is_none());
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let procedures = Procedures::new()
            .public("notes.list", |_, _| async { Ok::<_, RpcError>(json!([])) })
            .protected("notes.list", |_, _| async { Ok::<_, RpcError>(json!([])) });
        assert_eq!(procedures.names(), vec!["notes.list"]);
        assert_eq!(
            procedures.get("notes.list").map(Procedure::access),
            Some(Access::Protected)
        );
    }
}

//! Built-in procedures.

use crate::api::{context::RequestContext, error::RpcError, procedures::ProcedureResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

/// `system.ping`: liveness for RPC clients. Echoes the input.
pub async fn ping(context: Arc<RequestContext>, input: Value) -> ProcedureResult {
    Ok(json!({
        "pong": true,
        "echo": input,
        "authenticated": context.is_authenticated(),
        "store_ready": context.store_ready(),
    }))
}

/// `session.peek`: the caller's principal, or `null` when anonymous.
pub async fn peek(context: Arc<RequestContext>, _input: Value) -> ProcedureResult {
    to_value(context.principal())
}

/// `session.whoami`: the caller's principal.
pub async fn whoami(context: Arc<RequestContext>, _input: Value) -> ProcedureResult {
    let principal = context.principal().ok_or_else(RpcError::unauthenticated)?;
    to_value(principal)
}

fn to_value<T: serde::Serialize>(value: T) -> ProcedureResult {
    serde_json::to_value(value).map_err(|err| {
        error!("Failed to serialize principal: {}", err);
        RpcError::internal()
    })
}

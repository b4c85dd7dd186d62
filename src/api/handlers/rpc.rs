use crate::{
    api::{
        context::{Access, ContextBuilder},
        error::RpcError,
        procedures::Procedures,
    },
    wire::{ErrorCode, RpcFailure, RpcSuccess},
};
use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, instrument};

#[utoipa::path(
    post,
    path= "/rpc/{procedure}",
    params(
        ("procedure" = String, Path, description = "Procedure name, e.g. `session.whoami`")
    ),
    request_body(content = Object, content_type = "application/json", description = "Procedure input; an empty body is treated as null"),
    responses (
        (status = 200, description = "Procedure result", body = RpcSuccess),
        (status = 400, description = "Body is not JSON", body = RpcFailure),
        (status = 401, description = "Session expired, or authentication required", body = RpcFailure),
        (status = 404, description = "Unknown procedure", body = RpcFailure),
        (status = 500, description = "Procedure failed", body = RpcFailure),
        (status = 503, description = "Verification backend unavailable", body = RpcFailure),
    ),
    tag= "rpc"
)]
// axum handler for every procedure call
#[instrument(skip_all, fields(procedure = %procedure))]
pub async fn call(
    Path(procedure): Path<String>,
    headers: HeaderMap,
    builder: Extension<Arc<ContextBuilder>>,
    procedures: Extension<Arc<Procedures>>,
    body: Bytes,
) -> Response {
    match dispatch(&procedure, &headers, &builder, &procedures, &body).await {
        Ok(result) => Json(RpcSuccess { result }).into_response(),
        Err(err) => {
            if err.code == ErrorCode::InternalServerError {
                error!("Procedure failed");
            } else {
                debug!(code = ?err.code, reason = ?err.reason, "Procedure rejected");
            }
            err.into_response()
        }
    }
}

async fn dispatch(
    name: &str,
    headers: &HeaderMap,
    builder: &ContextBuilder,
    procedures: &Procedures,
    body: &[u8],
) -> Result<Value, RpcError> {
    let procedure = procedures
        .get(name)
        .ok_or_else(|| RpcError::not_found(format!("unknown procedure: {name}")))?;

    let input = parse_input(body)?;

    let context = builder.build(headers, procedure.access()).await?;

    if procedure.access() == Access::Protected && !context.is_authenticated() {
        return Err(RpcError::unauthenticated());
    }

    procedure.call(Arc::new(context), input).await
}

fn parse_input(body: &[u8]) -> Result<Value, RpcError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|err| RpcError::bad_request(format!("invalid JSON body: {err}")))
}

use crate::{
    api::{context::ContextBuilder, verifier::DependencyStatus},
    GIT_COMMIT_HASH,
};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
    verifier: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Verifier is usable and the store is reachable or unconfigured", body = [Health]),
        (status = 503, description = "Verifier or store is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, builder: Extension<Arc<ContextBuilder>>) -> impl IntoResponse {
    let store_status = match builder.store() {
        Some(pool) => ping_store(pool).await,
        None => DependencyStatus::Static,
    };

    let verifier_status = builder
        .verifier_status()
        .await
        .unwrap_or(DependencyStatus::Error);

    let is_healthy = store_status.is_healthy() && verifier_status.is_healthy();

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store_status.as_str().to_string(),
        verifier: verifier_status.as_str().to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .unwrap_or_else(|err| {
            error!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    debug!(store = %health.store, verifier = %health.verifier, "Health checked");

    if is_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn ping_store(pool: &PgPool) -> DependencyStatus {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    match pool.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => DependencyStatus::Ok,
                Err(error) => {
                    error!("Failed to ping document store: {}", error);
                    DependencyStatus::Error
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire document store connection: {}", error);
            DependencyStatus::Error
        }
    }
}

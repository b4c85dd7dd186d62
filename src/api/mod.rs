//! HTTP surface: the RPC endpoint, health and the `OpenAPI` document.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub mod context;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod procedures;
pub mod verifier;

pub use context::{Access, AuthFailure, ContextBuilder, RequestContext};
pub use error::RpcError;
pub use openapi::openapi;
pub use procedures::{ProcedureResult, Procedures};

/// Build the application router.
///
/// `frontend_origin` enables credentialed CORS for a single browser origin.
#[must_use]
pub fn router(
    builder: Arc<ContextBuilder>,
    procedures: Arc<Procedures>,
    frontend_origin: Option<HeaderValue>,
) -> Router {
    let app = Router::new()
        .route("/rpc/:procedure", post(handlers::rpc::call))
        .route(
            "/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .route("/openapi.json", get(openapi::openapi_json));

    let app = match frontend_origin {
        Some(origin) => app.layer(
            CorsLayer::new()
                .allow_headers([
                    CONTENT_TYPE,
                    AUTHORIZATION,
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_methods([Method::GET, Method::POST])
                .allow_origin(AllowOrigin::exact(origin))
                .allow_credentials(true),
        ),
        None => app,
    };

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(builder))
            .layer(Extension(procedures)),
    )
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn new(
    port: u16,
    builder: Arc<ContextBuilder>,
    procedures: Arc<Procedures>,
    frontend_origin: Option<HeaderValue>,
) -> Result<()> {
    info!(procedures = ?procedures.names(), "Registered procedures");

    let app = router(builder, procedures, frontend_origin);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Reduce a frontend base URL to the `scheme://host[:port]` origin CORS expects.
///
/// # Errors
/// Return error if the URL is invalid or has no host
pub fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::verifier::JwksVerifier,
        token::{now_unix_seconds, sign_rs256, Claims, Jwks},
        wire::{ErrorCode, RpcFailure, RpcSuccess, UnauthorizedReason},
    };
    use axum::{
        body::to_bytes,
        http::{Response, StatusCode},
    };
    use serde_json::{json, Value};
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::time::Duration;
    use tower::ServiceExt;

    const TEST_KEY_PEM: &str = include_str!("../token/testdata/rsa_private.pem");
    const ISSUER: &str = "https://id.aliro.test";
    const AUDIENCE: &str = "aliro";

    fn builder(store: Option<sqlx::PgPool>) -> Result<Arc<ContextBuilder>> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_KEY_PEM.as_bytes(), "k1")?;
        let verifier = JwksVerifier::new(jwks, ISSUER.to_string(), AUDIENCE.to_string());
        Ok(Arc::new(ContextBuilder::new(Arc::new(verifier), store)))
    }

    fn app(builder: Arc<ContextBuilder>) -> Router {
        let procedures = Procedures::with_builtins()
            .protected("notes.fail", |_, _| async { Err::<Value, _>(RpcError::internal()) });
        router(builder, Arc::new(procedures), None)
    }

    fn token(exp_offset: i64) -> Result<String> {
        let now = now_unix_seconds();
        let claims = Claims {
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            sub: "user-1".to_string(),
            exp: now + exp_offset,
            iat: now,
            email: None,
            name: Some("Ada".to_string()),
        };
        Ok(sign_rs256(TEST_KEY_PEM.as_bytes(), "k1", &claims)?)
    }

    fn rpc(procedure: &str, token: Option<&str>, body: &'static str) -> Result<Request<Body>> {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(format!("/rpc/{procedure}"));
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(request.body(Body::from(body))?)
    }

    async fn json_body(response: Response<Body>) -> Result<Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn failure(response: Response<Body>) -> Result<RpcFailure> {
        Ok(serde_json::from_value(json_body(response).await?)?)
    }

    fn unreachable_pool() -> sqlx::PgPool {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("postgres")
            .database("postgres");
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options)
    }

    #[tokio::test]
    async fn public_ping_works_anonymously() -> Result<()> {
        let response = app(builder(None)?)
            .oneshot(rpc("system.ping", None, r#"{"hello":"world"}"#)?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let success: RpcSuccess = serde_json::from_value(json_body(response).await?)?;
        assert_eq!(success.result["pong"], json!(true));
        assert_eq!(success.result["echo"], json!({"hello": "world"}));
        assert_eq!(success.result["authenticated"], json!(false));
        Ok(())
    }

    #[tokio::test]
    async fn whoami_returns_principal() -> Result<()> {
        let token = token(300)?;
        let response = app(builder(None)?)
            .oneshot(rpc("session.whoami", Some(&token), "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await?;
        assert_eq!(body["result"]["subject"], json!("user-1"));
        assert_eq!(body["result"]["name"], json!("Ada"));
        Ok(())
    }

    #[tokio::test]
    async fn protected_without_token_is_unauthenticated() -> Result<()> {
        let response = app(builder(None)?)
            .oneshot(rpc("session.whoami", None, "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let failure = failure(response).await?;
        assert_eq!(failure.error.code, ErrorCode::Unauthorized);
        assert_eq!(failure.error.reason, Some(UnauthorizedReason::Unauthenticated));
        assert_eq!(failure.error.message, "authentication required");
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_fails_public_calls_too() -> Result<()> {
        let token = token(-10)?;
        let response = app(builder(None)?)
            .oneshot(rpc("session.peek", Some(&token), "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let failure = failure(response).await?;
        assert_eq!(failure.error.reason, Some(UnauthorizedReason::Expired));
        assert_eq!(failure.error.message, "session expired, please log in again");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_token_on_public_call_is_anonymous() -> Result<()> {
        let response = app(builder(None)?)
            .oneshot(rpc("session.peek", Some("not-a-token"), "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await?, json!({"result": null}));
        Ok(())
    }

    #[tokio::test]
    async fn uninitialized_backend_is_service_unavailable() -> Result<()> {
        let builder = Arc::new(ContextBuilder::uninitialized());
        let token = token(300)?;

        let response = app(builder.clone())
            .oneshot(rpc("session.whoami", Some(&token), "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(failure(response).await?.error.code, ErrorCode::ServiceUnavailable);

        let response = app(builder)
            .oneshot(rpc("system.ping", Some(&token), "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_procedure_and_bad_body() -> Result<()> {
        let response = app(builder(None)?)
            .oneshot(rpc("nope.missing", None, "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(builder(None)?)
            .oneshot(rpc("system.ping", None, "{oops")?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(failure(response).await?.error.code, ErrorCode::BadRequest);
        Ok(())
    }

    #[tokio::test]
    async fn handler_failure_is_internal() -> Result<()> {
        let token = token(300)?;
        let response = app(builder(None)?)
            .oneshot(rpc("notes.fail", Some(&token), "")?)
            .await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn request_id_is_propagated() -> Result<()> {
        let mut request = rpc("system.ping", None, "")?;
        request
            .headers_mut()
            .insert("x-request-id", HeaderValue::from_static("req-123"));
        let response = app(builder(None)?).oneshot(request).await?;
        assert_eq!(
            response.headers().get("x-request-id"),
            Some(&HeaderValue::from_static("req-123"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_static_verifier_without_store() -> Result<()> {
        let request = Request::builder().uri("/health").body(Body::empty())?;
        let response = app(builder(None)?).oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));
        let body = json_body(response).await?;
        assert_eq!(body["verifier"], json!("static"));
        assert_eq!(body["store"], json!("static"));
        Ok(())
    }

    #[tokio::test]
    async fn health_unhealthy_store_and_missing_backend() -> Result<()> {
        let request = Request::builder().uri("/health").body(Body::empty())?;
        let response = app(builder(Some(unreachable_pool()))?)
            .oneshot(request)
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await?["store"], json!("error"));

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/health")
            .body(Body::empty())?;
        let response = app(Arc::new(ContextBuilder::uninitialized()))
            .oneshot(request)
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(bytes.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn serves_openapi_document() -> Result<()> {
        let request = Request::builder().uri("/openapi.json").body(Body::empty())?;
        let response = app(builder(None)?).oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await?;
        assert!(body["paths"]["/rpc/{procedure}"].is_object());
        Ok(())
    }

    #[test]
    fn frontend_origin_strips_path() -> Result<()> {
        let origin = frontend_origin("https://app.aliro.dev:8443/login?next=/")?;
        assert_eq!(origin, HeaderValue::from_static("https://app.aliro.dev:8443"));
        assert!(frontend_origin("not a url").is_err());
        Ok(())
    }
}

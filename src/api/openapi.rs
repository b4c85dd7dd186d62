use super::handlers::{health, rpc};
use crate::{
    token::Principal,
    wire::{ErrorBody, ErrorCode, RpcFailure, RpcSuccess, UnauthorizedReason},
};
use axum::Json;
use utoipa::{
    openapi::{Contact, InfoBuilder, License},
    OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(health::health, rpc::call),
    components(schemas(
        health::Health,
        RpcSuccess,
        RpcFailure,
        ErrorBody,
        ErrorCode,
        UnauthorizedReason,
        Principal
    )),
    tags(
        (name = "rpc", description = "Procedure calls authenticated by bearer session tokens"),
        (name = "health", description = "Service and dependency health")
    )
)]
struct ApiDoc;

/// Generated `OpenAPI` document, with info taken from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut spec = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact(env!("CARGO_PKG_AUTHORS"));
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });

    spec.info = info;
    spec
}

// axum handler for GET /openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

fn non_empty(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

/// First Cargo author, split into `Name <email>` parts.
fn cargo_contact(authors: &str) -> Option<Contact> {
    let primary = authors.split(';').next().map(str::trim)?;
    let (name, email) = match primary.split_once('<') {
        Some((name, email)) => (name.trim(), email.trim_end_matches('>').trim()),
        None => (primary, ""),
    };
    if name.is_empty() && email.is_empty() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = Some(name.to_string()).filter(|name| !name.is_empty());
    contact.email = Some(email.to_string()).filter(|email| !email.is_empty());
    Some(contact)
}

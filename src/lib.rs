//! # Aliro (Authenticated RPC Session Layer)
//!
//! `aliro` carries a bearer session token from a client to an RPC server,
//! turns it into a per-request identity, and keeps the client's session state
//! consistent when the token expires.
//!
//! ## Server
//!
//! Every call to `POST /rpc/:procedure` goes through the context builder:
//!
//! - **Expired token:** rejected with `UNAUTHORIZED` (reason `expired`), even
//!   for public procedures, so clients learn about expiry on their next call.
//! - **Invalid or missing token:** the call proceeds anonymously. Public
//!   procedures work; protected ones fail with `UNAUTHORIZED`
//!   (reason `unauthenticated`).
//! - **Verification backend unavailable:** protected calls fail with
//!   `SERVICE_UNAVAILABLE`; public calls proceed anonymously.
//!
//! ## Client
//!
//! The [`session::TokenAttacher`] adds a fresh token to each outbound call, the
//! [`session::SessionCoordinator`] reacts to `UNAUTHORIZED` exactly once per
//! session epoch (clear credentials, drop cached results, notify, redirect),
//! and [`notify::Notifications`] queues the toasts and confirmation prompts
//! the user sees.

pub mod api;
pub mod cli;
pub mod notify;
pub mod session;
pub mod token;
pub mod wire;

use std::{future::Future, pin::Pin};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Boxed future returned by the object-safe async traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

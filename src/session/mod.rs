//! Client side of the session layer.

pub mod attacher;
pub mod cache;
pub mod client;
pub mod coordinator;
pub mod credential;

pub use attacher::{Attachment, TokenAttacher};
pub use cache::ResultCache;
pub use client::{ClientError, RpcClient};
pub use coordinator::{LogNavigator, Navigator, Phase, SessionCoordinator, SessionError, SessionState};
pub use credential::{Credential, CredentialError, CredentialSource, HttpCredentialSource};

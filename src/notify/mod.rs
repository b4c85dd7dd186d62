//! Process-wide notification queue: FIFO toasts plus a single confirm slot.
//!
//! Renderers drain toasts with [`Notifications::pending`] and
//! [`Notifications::dequeue`]. The confirm slot holds at most one prompt;
//! opening a new one discards the old one without running its callbacks.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tokio::sync::oneshot;
use tracing::debug;
use ulid::Ulid;

pub const DEFAULT_TOAST_TTL: Duration = Duration::from_secs(4);
pub const ERROR_TOAST_TTL: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
    Warning,
}

impl ToastKind {
    #[must_use]
    pub const fn default_ttl(self) -> Duration {
        match self {
            Self::Error => ERROR_TOAST_TTL,
            Self::Success | Self::Info | Self::Warning => DEFAULT_TOAST_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: Ulid,
    pub kind: ToastKind,
    pub message: String,
    pub ttl: Duration,
    pub created_at: Instant,
}

impl Toast {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

type Callback = Box<dyn FnOnce() + Send>;

/// A yes/no question with the commands to run on each answer.
pub struct ConfirmPrompt {
    id: Ulid,
    message: String,
    on_confirm: Callback,
    on_cancel: Option<Callback>,
}

impl std::fmt::Debug for ConfirmPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmPrompt")
            .field("id", &self.id)
            .field("message", &self.message)
            .field("on_cancel", &self.on_cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl ConfirmPrompt {
    pub fn new(message: impl Into<String>, on_confirm: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: Ulid::new(),
            message: message.into(),
            on_confirm: Box::new(on_confirm),
            on_cancel: None,
        }
    }

    #[must_use]
    pub fn on_cancel(mut self, on_cancel: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(on_cancel));
        self
    }

    #[must_use]
    pub fn id(&self) -> Ulid {
        self.id
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What a renderer needs to show the pending prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirm {
    pub id: Ulid,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Notifications {
    toasts: Mutex<VecDeque<Toast>>,
    confirm: Mutex<Option<ConfirmPrompt>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Notifications {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a toast with the default TTL for its kind.
    pub fn enqueue(&self, kind: ToastKind, message: impl Into<String>) -> Ulid {
        self.enqueue_with_ttl(kind, message, kind.default_ttl())
    }

    pub fn enqueue_with_ttl(&self, kind: ToastKind, message: impl Into<String>, ttl: Duration) -> Ulid {
        let toast = Toast {
            id: Ulid::new(),
            kind,
            message: message.into(),
            ttl,
            created_at: Instant::now(),
        };
        let id = toast.id;
        debug!(%id, ?kind, message = %toast.message, "Toast enqueued");
        lock(&self.toasts).push_back(toast);
        id
    }

    /// Remove a toast by id.
    pub fn dequeue(&self, id: Ulid) -> Option<Toast> {
        let mut toasts = lock(&self.toasts);
        let position = toasts.iter().position(|toast| toast.id == id)?;
        toasts.remove(position)
    }

    /// Toasts in display order.
    #[must_use]
    pub fn pending(&self) -> Vec<Toast> {
        lock(&self.toasts).iter().cloned().collect()
    }

    /// Drop toasts whose TTL elapsed at `now`; returns how many were dropped.
    pub fn prune_expired(&self, now: Instant) -> usize {
        let mut toasts = lock(&self.toasts);
        let before = toasts.len();
        toasts.retain(|toast| !toast.is_expired(now));
        before - toasts.len()
    }

    /// Show `prompt`, replacing any pending one. The replaced prompt's
    /// callbacks are dropped without running.
    pub fn open_confirm(&self, prompt: ConfirmPrompt) -> Ulid {
        let id = prompt.id;
        let replaced = lock(&self.confirm).replace(prompt);
        if let Some(replaced) = replaced {
            debug!(replaced = %replaced.id, %id, "Confirm prompt superseded");
        }
        id
    }

    #[must_use]
    pub fn pending_confirm(&self) -> Option<PendingConfirm> {
        lock(&self.confirm).as_ref().map(|prompt| PendingConfirm {
            id: prompt.id,
            message: prompt.message.clone(),
        })
    }

    /// Answer the pending prompt, running exactly one of its callbacks.
    /// Returns `false` when no prompt was pending.
    pub fn resolve_confirm(&self, confirmed: bool) -> bool {
        // Callbacks run after the slot lock is released so they may open a new prompt.
        let Some(prompt) = lock(&self.confirm).take() else {
            return false;
        };
        debug!(id = %prompt.id, confirmed, "Confirm prompt resolved");
        if confirmed {
            (prompt.on_confirm)();
        } else if let Some(on_cancel) = prompt.on_cancel {
            on_cancel();
        }
        true
    }

    /// Open a prompt and wait for the answer.
    ///
    /// Resolves to `Some(answer)`, or `None` when another prompt replaces
    /// this one first.
    pub fn confirm(&self, message: impl Into<String>) -> impl Future<Output = Option<bool>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let cancel_tx = Arc::clone(&tx);

        let prompt = ConfirmPrompt::new(message, move || answer(&tx, true))
            .on_cancel(move || answer(&cancel_tx, false));
        self.open_confirm(prompt);

        async move { rx.await.ok() }
    }
}

fn answer(tx: &Mutex<Option<oneshot::Sender<bool>>>, confirmed: bool) {
    if let Some(tx) = lock(tx).take() {
        let _ = tx.send(confirmed);
    }
}

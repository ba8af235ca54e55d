//! Session state and change notifications.
//!
//! The session holds the current identity and token, plus the password the
//! caller supplied at construction. Identity and token change only through
//! the mutators here; each change is announced to subscribed observers after
//! the new value is stored.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

/// Which session field an observer is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The stored token changed.
    AuthToken,
    /// The stored identity changed.
    Email,
}

/// A session change. `None` means the field was cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New token value.
    AuthToken(Option<String>),
    /// New identity value.
    Email(Option<String>),
}

impl SessionEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::AuthToken(_) => EventKind::AuthToken,
            Self::Email(_) => EventKind::Email,
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct Observer {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: Vec<Observer>,
}

#[derive(Default)]
struct SessionState {
    email: Option<String>,
    auth_token: Option<String>,
}

/// Current identity, token and stored credential.
pub struct Session {
    state: RwLock<SessionState>,
    password: Option<String>,
    observers: Arc<Mutex<Observers>>,
}

impl Session {
    /// Create a session from caller-supplied values.
    #[must_use]
    pub fn new(
        email: Option<String>,
        password: Option<String>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            state: RwLock::new(SessionState { email, auth_token }),
            password,
            observers: Arc::new(Mutex::new(Observers::default())),
        }
    }

    /// The current identity.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        self.state.read().email.clone()
    }

    /// The current token.
    #[must_use]
    pub fn auth_token(&self) -> Option<String> {
        self.state.read().auth_token.clone()
    }

    /// Returns `true` if a password was supplied at construction.
    #[must_use]
    pub const fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Identity and password, when both are available for a re-login.
    #[must_use]
    pub fn credentials(&self) -> Option<(String, String)> {
        let email = self.email()?;
        let password = self.password.clone()?;
        Some((email, password))
    }

    /// Replace the stored token and notify `AuthToken` observers.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.state.write().auth_token.clone_from(&token);
        self.notify(&SessionEvent::AuthToken(token));
    }

    /// Replace the stored identity and notify `Email` observers.
    pub fn set_email(&self, email: Option<String>) {
        self.state.write().email.clone_from(&email);
        self.notify(&SessionEvent::Email(email));
    }

    /// Store the identity and token from a successful login.
    ///
    /// Both fields are written before any observer runs; `Email` observers
    /// are notified first, then `AuthToken` observers.
    pub fn set_login(&self, email: String, token: String) {
        tracing::info!(email = %email, "Session logged in");
        {
            let mut state = self.state.write();
            state.email = Some(email.clone());
            state.auth_token = Some(token.clone());
        }
        self.notify(&SessionEvent::Email(Some(email)));
        self.notify(&SessionEvent::AuthToken(Some(token)));
    }

    /// Clear identity and token. The stored password is kept.
    ///
    /// Both fields are cleared before any observer runs; `AuthToken`
    /// observers are notified first, then `Email` observers.
    pub fn logout(&self) {
        tracing::info!("Session logged out");
        {
            let mut state = self.state.write();
            state.auth_token = None;
            state.email = None;
        }
        self.notify(&SessionEvent::AuthToken(None));
        self.notify(&SessionEvent::Email(None));
    }

    /// Register `handler` for events of `kind`.
    ///
    /// Handlers run synchronously, in registration order, on the thread that
    /// mutated the session.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut observers = self.observers.lock();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.entries.push(Observer {
            id,
            kind,
            handler: Arc::new(handler),
        });

        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.lock().entries.len()
    }

    fn notify(&self, event: &SessionEvent) {
        // Snapshot so handlers may subscribe, unsubscribe, or read the session.
        let handlers: Vec<Handler> = self
            .observers
            .lock()
            .entries
            .iter()
            .filter(|observer| observer.kind == event.kind())
            .map(|observer| Arc::clone(&observer.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(kind = ?event.kind(), "Session observer panicked");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Session")
            .field("email", &state.email)
            .field("auth_token", &state.auth_token.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`Session::subscribe`].
///
/// Dropping the handle leaves the observer registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    observers: Weak<Mutex<Observers>>,
}

impl Subscription {
    /// Remove the observer. A no-op once the session is gone.
    pub fn unsubscribe(self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.lock().entries.retain(|observer| observer.id != self.id);
        }
    }
}

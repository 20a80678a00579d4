// Credential store
// Process-wide observable holder of the current credential

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use super::types::{AuthState, Credential};

/// Observable credential holder
///
/// Cloning yields another handle to the same state. Every change is broadcast
/// to receivers obtained from [`CredentialStore::subscribe`], which is how
/// consumers gate authenticated views on `is_logged_in`.
#[derive(Clone)]
pub struct CredentialStore {
    state: Arc<watch::Sender<AuthState>>,
}

impl CredentialStore {
    /// Create an empty, logged-out store
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthState::default());
        Self {
            state: Arc::new(tx),
        }
    }

    /// Create a store seeded with an existing credential
    pub fn with_credential(credential: Credential) -> Self {
        let store = Self::new();
        store.set(credential);
        store
    }

    /// Current credential
    pub fn get(&self) -> Option<Credential> {
        self.state.borrow().credential.clone()
    }

    /// Store a new credential and mark the session logged in
    pub fn set(&self, credential: Credential) {
        self.set_with_expiry(credential, None);
    }

    /// Store a refreshed credential together with its reported expiry
    pub(crate) fn set_with_expiry(&self, credential: Credential, expires_at: Option<DateTime<Utc>>) {
        tracing::debug!(token = %credential.preview(), "Storing credential");
        self.state.send_modify(|state| {
            state.credential = Some(credential);
            state.is_logged_in = true;
            state.generation += 1;
            state.updated_at = Some(Utc::now());
            state.expires_at = expires_at;
        });
    }

    /// Drop the credential and refresh secret, marking the session logged out
    pub fn clear(&self) {
        tracing::debug!("Clearing credential");
        self.state.send_modify(|state| {
            state.credential = None;
            state.refresh_secret = None;
            state.is_logged_in = false;
            state.generation += 1;
            state.updated_at = Some(Utc::now());
            state.expires_at = None;
        });
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in
    }

    /// Flip the logged-in flag without touching the credential
    pub fn set_logged_in(&self, logged_in: bool) {
        self.state.send_if_modified(|state| {
            if state.is_logged_in == logged_in {
                return false;
            }
            state.is_logged_in = logged_in;
            true
        });
    }

    /// Secondary secret used by token-mode refresh
    pub fn refresh_secret(&self) -> Option<Credential> {
        self.state.borrow().refresh_secret.clone()
    }

    pub fn set_refresh_secret(&self, secret: Option<Credential>) {
        self.state.send_modify(|state| state.refresh_secret = secret);
    }

    /// Copy of the full state
    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Counter bumped on every credential change
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_is_logged_out() {
        let store = CredentialStore::new();
        assert!(store.get().is_none());
        assert!(!store.is_logged_in());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_set_and_clear() {
        let store = CredentialStore::new();
        store.set(Credential::new("T1"));
        assert_eq!(store.get(), Some(Credential::new("T1")));
        assert!(store.is_logged_in());
        assert_eq!(store.generation(), 1);

        store.set_refresh_secret(Some(Credential::new("R1")));
        store.clear();
        assert!(store.get().is_none());
        assert!(store.refresh_secret().is_none());
        assert!(!store.is_logged_in());
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let store = CredentialStore::new();
        let other = store.clone();
        other.set(Credential::new("shared"));
        assert_eq!(store.get(), Some(Credential::new("shared")));
    }

    #[test]
    fn test_set_logged_in_keeps_generation() {
        let store = CredentialStore::with_credential(Credential::new("T1"));
        store.set_logged_in(false);
        assert!(!store.is_logged_in());
        assert_eq!(store.get(), Some(Credential::new("T1")));
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_set_with_expiry() {
        let store = CredentialStore::new();
        let expires = Utc::now() + chrono::Duration::minutes(15);
        store.set_with_expiry(Credential::new("T2"), Some(expires));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.expires_at, Some(expires));
        assert!(snapshot.updated_at.is_some());

        store.set(Credential::new("T3"));
        assert!(store.snapshot().expires_at.is_none());
    }

    #[tokio::test]
    async fn test_subscribers_observe_logout() {
        let store = CredentialStore::with_credential(Credential::new("T1"));
        let mut rx = store.subscribe();
        assert!(rx.borrow_and_update().is_logged_in);

        store.clear();
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_logged_in);
    }

    #[tokio::test]
    async fn test_set_logged_in_noop_does_not_notify() {
        let store = CredentialStore::new();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.set_logged_in(false);
        assert!(!rx.has_changed().unwrap());

        store.set_logged_in(true);
        assert!(rx.has_changed().unwrap());
    }
}

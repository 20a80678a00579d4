// Single-flight refresh coordination

use reqwest::{Client, Url};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, OnceCell};

use super::refresh;
use super::store::CredentialStore;
use super::types::{Credential, RefreshMode};
use crate::error::RefreshError;

type RefreshResult = Result<Credential, RefreshError>;

/// Coordinator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// One refresh cycle, shared by every caller that arrives while it runs
pub(crate) struct InFlight {
    result: OnceCell<RefreshResult>,
    notify: Notify,
}

impl InFlight {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn complete(&self, result: RefreshResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> RefreshResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

struct Inner {
    client: Client,
    endpoint: Url,
    mode: RefreshMode,
    store: CredentialStore,
    in_flight: Mutex<Option<Arc<InFlight>>>,

    /// Set while a cycle owns the slot; written only under the slot lock
    refreshing: AtomicBool,
}

/// Obtains a new credential when the current one is rejected
///
/// Concurrent [`refresh`](Self::refresh) calls made while a cycle is running
/// join that cycle instead of starting another, so N simultaneous 401s cost a
/// single call to the token-exchange endpoint. The exchange itself runs on a
/// spawned task: a waiter that is dropped does not abort the cycle for the
/// others.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(client: Client, endpoint: Url, mode: RefreshMode, store: CredentialStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                endpoint,
                mode,
                store,
                in_flight: Mutex::new(None),
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// Refresh the credential, joining the running cycle if there is one
    ///
    /// On success the new credential is already in the store when this
    /// returns. On failure the store has been cleared.
    pub async fn refresh(&self) -> Result<Credential, RefreshError> {
        self.start_or_join(None).await
    }

    /// Like [`refresh`](Self::refresh), but skip the network call when the
    /// store changed after `seen_generation` was observed
    ///
    /// Used by callers whose request went out before an earlier cycle
    /// settled: they get that cycle's outcome instead of starting another.
    pub async fn refresh_since(&self, seen_generation: u64) -> Result<Credential, RefreshError> {
        self.start_or_join(Some(seen_generation)).await
    }

    async fn start_or_join(&self, seen_generation: Option<u64>) -> RefreshResult {
        let (flight, leader) = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(flight) => (flight.clone(), false),
                None => {
                    if let Some(seen) = seen_generation {
                        if self.inner.store.generation() != seen {
                            tracing::debug!("Credential changed since the request was sent");
                            return self.inner.store.get().ok_or(RefreshError::LoggedOut);
                        }
                    }
                    let flight = Arc::new(InFlight::new());
                    *slot = Some(flight.clone());
                    self.inner.refreshing.store(true, Ordering::SeqCst);
                    (flight, true)
                }
            }
        };

        if leader {
            let inner = self.inner.clone();
            let cycle = flight.clone();
            let handle = tokio::spawn(async move { inner.run(cycle).await });

            // Surface a panicked exchange to waiters instead of parking them forever
            let inner = self.inner.clone();
            let cycle = flight.clone();
            tokio::spawn(async move {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Refresh task ended abnormally");
                    inner.abort(&cycle, e.to_string()).await;
                }
            });
        } else {
            tracing::debug!("Refresh already in progress, waiting for its result");
        }

        flight.wait().await
    }

    /// Current position in the state machine
    pub fn state(&self) -> RefreshState {
        if self.inner.refreshing.load(Ordering::SeqCst) {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn mode(&self) -> RefreshMode {
        self.inner.mode
    }
}

impl Inner {
    async fn run(&self, flight: Arc<InFlight>) {
        let secret = self.store.refresh_secret();
        let result = refresh::exchange(&self.client, &self.endpoint, self.mode, secret.as_ref()).await;

        let result = match result {
            Ok(token) => {
                // Store first, so woken waiters re-read the new credential
                self.store
                    .set_with_expiry(token.access_token.clone(), token.expires_at);
                if token.refresh_token.is_some() {
                    self.store.set_refresh_secret(token.refresh_token);
                }
                Ok(token.access_token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, logging out");
                self.store.clear();
                Err(e)
            }
        };

        self.finish(&flight).await;
        flight.complete(result);
    }

    /// Settle a cycle whose task died before reporting: log out and reject waiters
    async fn abort(&self, flight: &Arc<InFlight>, reason: String) {
        self.store.clear();
        self.finish(flight).await;
        flight.complete(Err(RefreshError::Aborted(reason)));
    }

    /// Return to idle, if this cycle still owns the slot
    async fn finish(&self, flight: &Arc<InFlight>) {
        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, flight)) {
            *slot = None;
            self.refreshing.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinator(server: &mockito::Server, mode: RefreshMode, store: CredentialStore) -> RefreshCoordinator {
        let endpoint = Url::parse(&format!("{}/auth/refresh", server.url())).unwrap();
        RefreshCoordinator::new(Client::new(), endpoint, mode, store)
    }

    #[tokio::test]
    async fn test_refresh_updates_store() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(json!({"access_token": "T2"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let store = CredentialStore::with_credential(Credential::new("T1"));
        let coord = coordinator(&server, RefreshMode::Cookie, store.clone());

        let token = coord.refresh().await.unwrap();
        assert_eq!(token, Credential::new("T2"));
        assert_eq!(store.get(), Some(Credential::new("T2")));
        assert!(store.is_logged_in());
        assert_eq!(coord.state(), RefreshState::Idle);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(json!({"access_token": "T2"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let store = CredentialStore::with_credential(Credential::new("T1"));
        let coord = coordinator(&server, RefreshMode::Cookie, store.clone());

        let results = futures::future::join_all((0..8).map(|_| coord.refresh())).await;

        for result in results {
            assert_eq!(result.unwrap(), Credential::new("T2"));
        }
        // One set on construction, one from the single refresh
        assert_eq!(store.generation(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_clears_store_for_all_waiters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let store = CredentialStore::with_credential(Credential::new("T1"));
        let coord = coordinator(&server, RefreshMode::Cookie, store.clone());

        let results = futures::future::join_all((0..4).map(|_| coord.refresh())).await;

        for result in results {
            assert!(matches!(
                result,
                Err(RefreshError::Status { status: 500, .. })
            ));
        }
        assert!(store.get().is_none());
        assert!(!store.is_logged_in());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sequential_refreshes_run_separate_cycles() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(json!({"access_token": "T2"}).to_string())
            .expect(2)
            .create_async()
            .await;

        let coord = coordinator(&server, RefreshMode::Cookie, CredentialStore::new());

        coord.refresh().await.unwrap();
        assert_eq!(coord.state(), RefreshState::Idle);
        coord.refresh().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_mode_rotates_refresh_secret() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .match_body(mockito::Matcher::Json(json!({"refresh_token": "R1"})))
            .with_status(200)
            .with_body(json!({"access_token": "T2", "refresh_token": "R2"}).to_string())
            .create_async()
            .await;

        let store = CredentialStore::new();
        store.set_refresh_secret(Some(Credential::new("R1")));
        let coord = coordinator(&server, RefreshMode::Token, store.clone());

        coord.refresh().await.unwrap();
        assert_eq!(store.get(), Some(Credential::new("T2")));
        assert_eq!(store.refresh_secret(), Some(Credential::new("R2")));
    }

    #[tokio::test]
    async fn test_token_mode_without_secret_logs_out() {
        let server = mockito::Server::new_async().await;
        let store = CredentialStore::with_credential(Credential::new("T1"));
        let coord = coordinator(&server, RefreshMode::Token, store.clone());

        let err = coord.refresh().await.unwrap_err();
        assert_eq!(err, RefreshError::MissingSecret);
        assert!(!store.is_logged_in());
    }

    #[tokio::test]
    async fn test_refresh_since_skips_settled_cycle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let store = CredentialStore::with_credential(Credential::new("T1"));
        let coord = coordinator(&server, RefreshMode::Cookie, store.clone());
        let seen = store.generation();

        store.set(Credential::new("T2"));
        assert_eq!(coord.refresh_since(seen).await.unwrap(), Credential::new("T2"));

        let seen = store.generation();
        store.clear();
        assert_eq!(coord.refresh_since(seen).await.unwrap_err(), RefreshError::LoggedOut);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_since_current_generation_refreshes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(json!({"access_token": "T2"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let store = CredentialStore::with_credential(Credential::new("T1"));
        let coord = coordinator(&server, RefreshMode::Cookie, store.clone());

        let token = coord.refresh_since(store.generation()).await.unwrap();
        assert_eq!(token, Credential::new("T2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_state_ignores_brief_lock_holders() {
        let server = mockito::Server::new_async().await;
        let coord = coordinator(&server, RefreshMode::Cookie, CredentialStore::new());

        let _slot = coord.inner.in_flight.lock().await;
        assert_eq!(coord.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_aborted_cycle_logs_out_waiters() {
        // Accepts connections but never answers, so the exchange stays pending
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = Url::parse(&format!("http://{}/auth/refresh", addr)).unwrap();

        let store = CredentialStore::with_credential(Credential::new("T1"));
        let coord =
            RefreshCoordinator::new(Client::new(), endpoint, RefreshMode::Cookie, store.clone());

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.refresh().await })
        };
        for _ in 0..10 {
            if coord.state() == RefreshState::Refreshing {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(coord.state(), RefreshState::Refreshing);

        let flight = coord.inner.in_flight.lock().await.clone().unwrap();
        coord.inner.abort(&flight, "task panicked".to_string()).await;

        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            RefreshError::Aborted("task panicked".to_string())
        );
        assert!(store.get().is_none());
        assert!(!store.is_logged_in());
        assert_eq!(coord.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_in_flight_wait_returns_completed_result() {
        let flight = Arc::new(InFlight::new());
        let waiter = {
            let flight = flight.clone();
            tokio::spawn(async move { flight.wait().await })
        };
        tokio::task::yield_now().await;

        flight.complete(Ok(Credential::new("T9")));
        assert_eq!(waiter.await.unwrap().unwrap(), Credential::new("T9"));
        // Late arrivals see the stored result immediately
        assert_eq!(flight.wait().await.unwrap(), Credential::new("T9"));
    }
}

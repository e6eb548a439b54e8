//! Session admission: allow-list check plus per-identity concurrency cap.
//!
//! The cap is enforced with a read of the stored count followed by an
//! atomic increment. The two store calls are serialized by a process-wide
//! mutex, otherwise two near-simultaneous handshakes for the same identity
//! could both observe `count < max`. Gateways sharing one store across
//! processes can still overshoot the cap; the mutex is process-local.

use liberty_core::{is_valid_identity, membership_key, StateStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a session was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionRejection {
    #[error("identity is not a UUID")]
    MalformedIdentity,

    #[error("credential not in allow-list")]
    NotAllowed,

    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("session has no disconnect signal")]
    NoSessionSignal,

    #[error("over quota: at most {limit} concurrent sessions")]
    OverQuota { limit: i64 },
}

/// Decides whether a new session may proceed and keeps the shared
/// connection-count table in step with session lifetimes.
pub struct AdmissionController {
    store: Arc<dyn StateStore>,
    max_connections: i64,
    /// Serializes check-then-increment across all identities.
    gate: Mutex<()>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn StateStore>, max_connections: i64) -> Self {
        Self {
            store,
            max_connections,
            gate: Mutex::new(()),
        }
    }

    pub fn max_connections(&self) -> i64 {
        self.max_connections
    }

    /// Admit a session for `identity` presenting `credential`.
    ///
    /// On success the identity's session count has been incremented and a
    /// task is waiting on `session_end` to decrement it again, exactly once.
    /// Every store failure rejects the session.
    ///
    /// # Arguments
    ///
    /// * `identity` - The SSH user name; must be a 36-character UUID.
    /// * `credential` - The public key in authorized-keys text form.
    /// * `session_end` - Fired when the session is over. `None`, or a token
    ///   that already fired, rejects the session.
    pub async fn authorize(
        &self,
        identity: &str,
        credential: &str,
        session_end: Option<&CancellationToken>,
    ) -> Result<(), AdmissionRejection> {
        if !is_valid_identity(identity) {
            debug!(identity = %identity, "rejecting malformed identity");
            return Err(AdmissionRejection::MalformedIdentity);
        }

        let key = membership_key(identity, credential);
        match self.store.is_member(&key).await {
            Ok(true) => {}
            Ok(false) => {
                info!(identity = %identity, "credential not in allow-list");
                return Err(AdmissionRejection::NotAllowed);
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "allow-list lookup failed");
                return Err(AdmissionRejection::StoreUnavailable(e.to_string()));
            }
        }

        let session_end = match session_end {
            Some(token) if !token.is_cancelled() => token.clone(),
            _ => {
                warn!(identity = %identity, "no usable session end signal");
                return Err(AdmissionRejection::NoSessionSignal);
            }
        };

        {
            let _gate = self.gate.lock().await;

            // A failed read counts as zero; a real outage surfaces on the increment.
            let current = self.store.connection_count(identity).await.unwrap_or(0);
            if current >= self.max_connections {
                warn!(
                    identity = %identity,
                    limit = self.max_connections,
                    "client trying to exceed concurrent session limit"
                );
                return Err(AdmissionRejection::OverQuota {
                    limit: self.max_connections,
                });
            }

            if let Err(e) = self.store.add_connections(identity, 1).await {
                warn!(identity = %identity, error = %e, "failed to record session");
                return Err(AdmissionRejection::StoreUnavailable(e.to_string()));
            }
        }

        self.release_on(identity.to_string(), session_end);
        info!(identity = %identity, "session admitted");
        Ok(())
    }

    /// Decrement the session count once `session_end` fires. The task owns
    /// its own store handle so it outlives the session that triggered it.
    fn release_on(&self, identity: String, session_end: CancellationToken) {
        let store = self.store.clone();
        tokio::spawn(async move {
            session_end.cancelled().await;
            match store.add_connections(&identity, -1).await {
                Ok(remaining) => debug!(identity = %identity, remaining, "session released"),
                Err(e) => warn!(identity = %identity, error = %e, "failed to release session"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liberty_core::MemoryStore;
    use std::time::Duration;

    const ID: &str = "11111111-1111-1111-1111-111111111111";
    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOuL";

    async fn store_with_member() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.allow(membership_key(ID, KEY)).await;
        store
    }

    async fn wait_for_count(store: &MemoryStore, expected: i64) {
        for _ in 0..200 {
            if store.raw_connections(ID).await.unwrap_or(0) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "count stuck at {:?}, expected {expected}",
            store.raw_connections(ID).await
        );
    }

    #[tokio::test]
    async fn test_rejects_malformed_identity() {
        let store = store_with_member().await;
        let admission = AdmissionController::new(store, 1);
        let end = CancellationToken::new();
        assert_eq!(
            admission.authorize("root", KEY, Some(&end)).await,
            Err(AdmissionRejection::MalformedIdentity)
        );
    }

    #[tokio::test]
    async fn test_rejects_unknown_credential() {
        let store = store_with_member().await;
        let admission = AdmissionController::new(store.clone(), 1);
        let end = CancellationToken::new();
        assert_eq!(
            admission.authorize(ID, "ssh-ed25519 OTHER", Some(&end)).await,
            Err(AdmissionRejection::NotAllowed)
        );
        assert_eq!(store.raw_connections(ID).await, None);
    }

    #[tokio::test]
    async fn test_accepts_credential_with_trailing_whitespace() {
        let store = store_with_member().await;
        let admission = AdmissionController::new(store.clone(), 1);
        let end = CancellationToken::new();
        let presented = format!("{KEY}\n\t");
        assert!(admission.authorize(ID, &presented, Some(&end)).await.is_ok());
        assert_eq!(store.raw_connections(ID).await, Some(1));
    }

    #[tokio::test]
    async fn test_fails_closed_when_store_unreachable() {
        let store = store_with_member().await;
        store.set_unreachable(true);
        let admission = AdmissionController::new(store, 1);
        let end = CancellationToken::new();
        assert!(matches!(
            admission.authorize(ID, KEY, Some(&end)).await,
            Err(AdmissionRejection::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_requires_session_signal() {
        let store = store_with_member().await;
        let admission = AdmissionController::new(store.clone(), 1);
        assert_eq!(
            admission.authorize(ID, KEY, None).await,
            Err(AdmissionRejection::NoSessionSignal)
        );
        let fired = CancellationToken::new();
        fired.cancel();
        assert_eq!(
            admission.authorize(ID, KEY, Some(&fired)).await,
            Err(AdmissionRejection::NoSessionSignal)
        );
        assert_eq!(store.raw_connections(ID).await, None);
    }

    #[tokio::test]
    async fn test_disconnect_decrements_exactly_once() {
        let store = store_with_member().await;
        let admission = AdmissionController::new(store.clone(), 2);

        let a = CancellationToken::new();
        let b = CancellationToken::new();
        admission.authorize(ID, KEY, Some(&a)).await.unwrap();
        admission.authorize(ID, KEY, Some(&b)).await.unwrap();
        assert_eq!(store.raw_connections(ID).await, Some(2));

        a.cancel();
        a.cancel();
        wait_for_count(&store, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.raw_connections(ID).await, Some(1));

        b.cancel();
        wait_for_count(&store, 0).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_respect_cap() {
        const MAX: i64 = 3;
        const ATTEMPTS: usize = 8;

        let store = store_with_member().await;
        let admission = Arc::new(AdmissionController::new(store.clone(), MAX));

        let tokens: Vec<CancellationToken> =
            (0..ATTEMPTS).map(|_| CancellationToken::new()).collect();
        let handles: Vec<_> = tokens
            .iter()
            .cloned()
            .map(|token| {
                let admission = admission.clone();
                tokio::spawn(async move { admission.authorize(ID, KEY, Some(&token)).await })
            })
            .collect();

        let mut admitted = 0;
        let mut over_quota = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => admitted += 1,
                Err(AdmissionRejection::OverQuota { limit }) => {
                    assert_eq!(limit, MAX);
                    over_quota += 1;
                }
                Err(other) => panic!("unexpected rejection: {other}"),
            }
        }
        assert_eq!(admitted, MAX);
        assert_eq!(over_quota, ATTEMPTS as i64 - MAX);
        assert_eq!(store.raw_connections(ID).await, Some(MAX));

        for token in &tokens {
            token.cancel();
        }
        wait_for_count(&store, 0).await;
    }

    #[tokio::test]
    async fn test_second_session_admitted_after_first_ends() {
        let store = store_with_member().await;
        let admission = AdmissionController::new(store.clone(), 1);

        let session_a = CancellationToken::new();
        admission.authorize(ID, KEY, Some(&session_a)).await.unwrap();

        let session_b = CancellationToken::new();
        assert_eq!(
            admission.authorize(ID, KEY, Some(&session_b)).await,
            Err(AdmissionRejection::OverQuota { limit: 1 })
        );

        session_a.cancel();
        wait_for_count(&store, 0).await;

        assert!(admission.authorize(ID, KEY, Some(&session_b)).await.is_ok());
        assert_eq!(store.raw_connections(ID).await, Some(1));
    }
}

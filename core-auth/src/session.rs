//! # Session State Publisher
//!
//! Single source of truth for "is the user signed in, and as whom".
//!
//! ## Overview
//!
//! [`SessionPublisher`] owns the only write path to the [`TokenStore`] and the
//! derived [`SessionState`]. It is constructed explicitly by the application
//! root and handed to every consumer; there is no global instance.
//!
//! - **Restore**: [`SessionPublisher::restore`] resolves the initial state from
//!   storage before the instance exists, so nobody can observe an unresolved
//!   state. A stored, unexpired access token yields `Authenticated` without any
//!   network call.
//! - **Listeners**: [`SessionPublisher::on_change`] registers a synchronous
//!   callback. It is called once with the current state, then on every change,
//!   inside the call that made the change. Listeners run in subscription order.
//!   The returned [`ListenerHandle`] unregisters the callback when dropped.
//! - **Watchers**: [`SessionPublisher::watch`] gives an async, last-write-wins
//!   view backed by `tokio::sync::watch`.
//! - **Tickets**: network operations take a ticket before they start and pass
//!   it to `commit_*`. Background work (refresh, expiry) uses
//!   [`SessionPublisher::begin`]; login and logout use
//!   [`SessionPublisher::begin_user_action`]. A stale commit is discarded with
//!   [`AuthError::Superseded`]:
//!   - a user action is stale only once a newer user action has applied;
//!   - background work is stale once any newer transition has applied, or
//!     once a user action applied after the ticket was issued.
//!
//!   A background refresh can therefore never undo a logout, and a
//!   background expiry can never cancel a login in flight.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{SessionPublisher, TokenStore};
//! use bridge_traits::{Clock, SecureStore, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn example(secure_store: Arc<dyn SecureStore>) {
//! let publisher = SessionPublisher::restore(
//!     TokenStore::new(secure_store),
//!     Arc::new(SystemClock),
//! )
//! .await;
//!
//! let _handle = publisher.on_change(|state| {
//!     println!("signed in: {}", state.is_authenticated());
//! });
//! # }
//! ```

use crate::claims::AccessClaims;
use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::{SessionState, TokenPair, UserInfo};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, Weak};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Origin {
    User,
    Background,
}

/// Monotonic sequence number for a state-changing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    seq: u64,
    origin: Origin,
}

/// Bookkeeping of applied transitions, guarded by `Inner::applied`.
#[derive(Debug, Default)]
struct Applied {
    last: u64,
    last_user: u64,
    /// Highest ticket issued when the last user action applied.
    barrier: u64,
}

impl Applied {
    fn is_stale(&self, ticket: Ticket) -> bool {
        match ticket.origin {
            Origin::User => ticket.seq < self.last_user,
            Origin::Background => ticket.seq < self.last || ticket.seq <= self.barrier,
        }
    }

    fn record(&mut self, ticket: Ticket, issued: u64) {
        self.last = self.last.max(ticket.seq);
        if ticket.origin == Origin::User {
            self.last_user = ticket.seq;
            self.barrier = issued;
        }
    }
}

type Callback = Box<dyn Fn(&SessionState) + Send + Sync>;

struct Listener {
    id: u64,
    delivered: AtomicU64,
    callback: Callback,
}

impl Listener {
    /// Invoke the callback unless a newer version was already delivered.
    fn deliver(&self, version: u64, state: &SessionState) {
        if self.delivered.fetch_max(version, Ordering::SeqCst) < version {
            (self.callback)(state);
        }
    }
}

struct Snapshot {
    version: u64,
    state: SessionState,
    tokens: Option<TokenPair>,
}

struct Inner {
    store: TokenStore,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Snapshot>,
    listeners: StdMutex<Vec<Arc<Listener>>>,
    next_listener_id: AtomicU64,
    watch_tx: StdMutex<Option<watch::Sender<SessionState>>>,
    next_ticket: AtomicU64,
    /// Holding the lock serializes every store mutation.
    applied: Mutex<Applied>,
}

/// Observable session state and the only writer of the token store.
///
/// Cheap to clone; clones share state, listeners and the token store.
#[derive(Clone)]
pub struct SessionPublisher {
    inner: Arc<Inner>,
}

impl SessionPublisher {
    /// Build a publisher whose initial state is resolved from `store`.
    ///
    /// - unexpired access token that identifies a user: `Authenticated`
    /// - expired access token, live refresh token: `Unauthenticated`, tokens kept
    ///   so the gateway can refresh
    /// - anything else: `Unauthenticated`, storage cleared
    ///
    /// Storage failures resolve to `Unauthenticated`.
    #[instrument(skip_all)]
    pub async fn restore(store: TokenStore, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let (state, tokens) = match store.load().await {
            Ok(Some(pair)) => resolve_stored_pair(&store, pair, now).await,
            Ok(None) => (SessionState::unauthenticated(), None),
            Err(e) => {
                warn!(error = %e, "Could not read stored tokens; starting signed out");
                (SessionState::unauthenticated(), None)
            }
        };

        info!(
            authenticated = state.is_authenticated(),
            has_tokens = tokens.is_some(),
            "Session restored"
        );

        let (watch_tx, _) = watch::channel(state.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                snapshot: RwLock::new(Snapshot {
                    version: 1,
                    state,
                    tokens,
                }),
                listeners: StdMutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                watch_tx: StdMutex::new(Some(watch_tx)),
                next_ticket: AtomicU64::new(0),
                applied: Mutex::new(Applied::default()),
            }),
        }
    }

    pub fn current(&self) -> SessionState {
        self.read_snapshot(|s| s.state.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_snapshot(|s| s.state.is_authenticated())
    }

    /// The stored token pair, if any. May be present while unauthenticated
    /// when only the refresh token is still valid.
    pub fn tokens(&self) -> Option<TokenPair> {
        self.read_snapshot(|s| s.tokens.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_snapshot(|s| s.tokens.as_ref().map(|t| t.access_token().to_string()))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Issue a ticket for background work (refresh, session expiry) that
    /// will later commit a transition.
    pub fn begin(&self) -> Ticket {
        self.issue(Origin::Background)
    }

    /// Issue a ticket for a transition the user asked for (login, logout).
    pub fn begin_user_action(&self) -> Ticket {
        self.issue(Origin::User)
    }

    fn issue(&self, origin: Origin) -> Ticket {
        Ticket {
            seq: self.inner.next_ticket.fetch_add(1, Ordering::SeqCst) + 1,
            origin,
        }
    }

    /// Persist `pair` and publish `Authenticated` for `user`.
    pub async fn set_authenticated(&self, pair: TokenPair, user: UserInfo) -> Result<SessionState> {
        let ticket = self.begin_user_action();
        self.commit_authenticated(ticket, pair, user).await
    }

    /// Clear storage and publish `Unauthenticated`.
    pub async fn set_unauthenticated(&self) -> Result<SessionState> {
        let ticket = self.begin_user_action();
        self.commit_unauthenticated(ticket).await
    }

    /// Persist `pair` and publish `Authenticated` for `user`.
    ///
    /// If `pair` cannot be stored, the previous pair is written back and the
    /// current state kept. When that fails too, storage is cleared and
    /// `Unauthenticated` published. Either way the storage error is returned.
    #[instrument(skip(self, pair, user), fields(username = %user.username))]
    pub async fn commit_authenticated(
        &self,
        ticket: Ticket,
        pair: TokenPair,
        user: UserInfo,
    ) -> Result<SessionState> {
        let mut applied = self.inner.applied.lock().await;
        if applied.is_stale(ticket) {
            debug!(ticket = ticket.seq, ?applied, "Discarding stale sign-in");
            return Err(AuthError::Superseded);
        }

        let roles = AccessClaims::decode(pair.access_token())
            .map(|claims| claims.roles())
            .unwrap_or_default();

        if let Err(e) = self.inner.store.save(&pair).await {
            if !self.restore_previous_tokens().await {
                applied.record(ticket, self.issued());
            }
            return Err(e);
        }
        applied.record(ticket, self.issued());

        let state = SessionState::authenticated(user, roles);
        self.publish(state.clone(), Some(pair));
        Ok(state)
    }

    /// Put the last published pair back after a failed save. Returns `false`
    /// when that was impossible and the session was signed out instead.
    async fn restore_previous_tokens(&self) -> bool {
        if let Some(previous) = self.tokens() {
            match self.inner.store.save(&previous).await {
                Ok(()) => {
                    warn!("New tokens could not be stored; kept the previous session");
                    return true;
                }
                Err(e) => warn!(error = %e, "Previous tokens could not be restored"),
            }
        }

        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Failed to clear token storage");
        }
        self.publish(SessionState::unauthenticated(), None);
        false
    }

    /// Clear storage and publish `Unauthenticated`.
    ///
    /// The in-memory state is signed out even if clearing storage fails; the
    /// storage error is still returned.
    #[instrument(skip(self))]
    pub async fn commit_unauthenticated(&self, ticket: Ticket) -> Result<SessionState> {
        let mut applied = self.inner.applied.lock().await;
        if applied.is_stale(ticket) {
            debug!(ticket = ticket.seq, ?applied, "Discarding stale sign-out");
            return Err(AuthError::Superseded);
        }

        let cleared = self.inner.store.clear().await;
        applied.record(ticket, self.issued());

        let state = SessionState::unauthenticated();
        self.publish(state.clone(), None);
        cleared.map(|_| state)
    }

    /// Register a synchronous listener. It is called immediately with the
    /// current state, then on every change until the handle is dropped.
    #[must_use = "dropping the handle unregisters the listener"]
    pub fn on_change<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let listener = Arc::new(Listener {
            id,
            delivered: AtomicU64::new(0),
            callback: Box::new(callback),
        });

        lock(&self.inner.listeners).push(Arc::clone(&listener));

        let (version, state) = self.read_snapshot(|s| (s.version, s.state.clone()));
        listener.deliver(version, &state);

        ListenerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Async view of the session state. Closed after [`shutdown`](Self::shutdown).
    pub fn watch(&self) -> SessionWatch {
        let rx = match lock(&self.inner.watch_tx).as_ref() {
            Some(tx) => tx.subscribe(),
            None => watch::channel(self.current()).1,
        };
        SessionWatch { rx }
    }

    /// Drop every listener and close all watchers.
    pub fn shutdown(&self) {
        let released = std::mem::take(&mut *lock(&self.inner.listeners)).len();
        lock(&self.inner.watch_tx).take();
        info!(released_listeners = released, "Session publisher shut down");
    }

    fn issued(&self) -> u64 {
        self.inner.next_ticket.load(Ordering::SeqCst)
    }

    fn publish(&self, state: SessionState, tokens: Option<TokenPair>) {
        let version = {
            let mut snapshot = self
                .inner
                .snapshot
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            snapshot.tokens = tokens;
            if snapshot.state == state {
                return;
            }
            snapshot.version += 1;
            snapshot.state = state.clone();
            snapshot.version
        };

        info!(
            authenticated = state.is_authenticated(),
            version, "Session state changed"
        );

        if let Some(tx) = lock(&self.inner.watch_tx).as_ref() {
            tx.send_replace(state.clone());
        }

        let listeners: Vec<Arc<Listener>> = lock(&self.inner.listeners).clone();
        for listener in listeners {
            listener.deliver(version, &state);
        }
    }

    fn read_snapshot<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let snapshot = self
            .inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&snapshot)
    }
}

impl fmt::Debug for SessionPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPublisher")
            .field("authenticated", &self.is_authenticated())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

async fn resolve_stored_pair(
    store: &TokenStore,
    pair: TokenPair,
    now: DateTime<Utc>,
) -> (SessionState, Option<TokenPair>) {
    if !pair.is_access_expired(now) {
        let identity = AccessClaims::decode(pair.access_token())
            .and_then(|claims| Ok((claims.user_info(None)?, claims.roles())));
        match identity {
            Ok((user, roles)) => {
                return (SessionState::authenticated(user, roles), Some(pair));
            }
            Err(e) => warn!(error = %e, "Stored access token is unreadable"),
        }
    } else if !pair.is_refresh_expired(now) {
        debug!("Stored access token expired; refresh token still valid");
        return (SessionState::unauthenticated(), Some(pair));
    } else {
        debug!("Stored tokens expired");
    }

    if let Err(e) = store.clear().await {
        warn!(error = %e, "Failed to clear unusable tokens");
    }
    (SessionState::unauthenticated(), None)
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration returned by [`SessionPublisher::on_change`].
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    id: u64,
    inner: Weak<Inner>,
}

impl ListenerHandle {
    /// Unregister the listener now.
    pub fn release(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.listeners).retain(|listener| listener.id != self.id);
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

/// Async, last-write-wins view of the session state.
#[derive(Debug, Clone)]
pub struct SessionWatch {
    rx: watch::Receiver<SessionState>,
}

impl SessionWatch {
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next change. Returns `None` once the publisher shut down.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::encode_test_token;
    use crate::token_store::ACCESS_TOKEN_KEY;
    use bridge_desktop::MemorySecureStore;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::storage::SecureStore;
    use bridge_traits::FixedClock;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn pair_for(username: &str, access_ttl: Duration, refresh_ttl: Duration) -> TokenPair {
        let access = encode_test_token(&json!({
            "sub": "1",
            "username": username,
            "roles": ["ADMIN"]
        }));
        TokenPair::new(access, "refresh", now() + access_ttl, now() + refresh_ttl).unwrap()
    }

    fn user(username: &str) -> UserInfo {
        UserInfo {
            id: "1".to_string(),
            username: username.to_string(),
            email: None,
            full_name: None,
        }
    }

    async fn publisher_with(pair: Option<TokenPair>) -> (SessionPublisher, MemorySecureStore) {
        let secure_store = MemorySecureStore::new();
        let store = TokenStore::new(Arc::new(secure_store.clone()));
        if let Some(pair) = pair {
            store.save(&pair).await.unwrap();
        }
        let publisher = SessionPublisher::restore(store, Arc::new(FixedClock::new(now()))).await;
        (publisher, secure_store)
    }

    #[tokio::test]
    async fn test_restore_with_valid_token_is_authenticated() {
        let pair = pair_for("alice", Duration::hours(1), Duration::days(7));
        let (publisher, _) = publisher_with(Some(pair.clone())).await;

        let state = publisher.current();
        assert!(state.is_authenticated());
        assert_eq!(state.user().unwrap().username, "alice");
        assert!(state.has_role("ADMIN"));
        assert_eq!(publisher.tokens(), Some(pair));
    }

    #[tokio::test]
    async fn test_restore_with_expired_access_keeps_refresh_token() {
        let pair = pair_for("alice", Duration::hours(-1), Duration::days(7));
        let (publisher, secure_store) = publisher_with(Some(pair.clone())).await;

        assert!(!publisher.is_authenticated());
        assert_eq!(publisher.tokens(), Some(pair));
        assert_eq!(secure_store.len().await, 2);
    }

    #[tokio::test]
    async fn test_restore_with_everything_expired_clears_storage() {
        let pair = pair_for("alice", Duration::days(-2), Duration::days(-1));
        let (publisher, secure_store) = publisher_with(Some(pair)).await;

        assert!(!publisher.is_authenticated());
        assert!(publisher.tokens().is_none());
        assert!(secure_store.is_empty().await);
    }

    #[tokio::test]
    async fn test_restore_with_opaque_token_clears_storage() {
        let pair = TokenPair::new(
            "opaque",
            "refresh",
            now() + Duration::hours(1),
            now() + Duration::days(1),
        )
        .unwrap();
        let (publisher, secure_store) = publisher_with(Some(pair)).await;

        assert!(!publisher.is_authenticated());
        assert!(secure_store.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_authenticated_persists_and_publishes() {
        let (publisher, _) = publisher_with(None).await;
        let pair = pair_for("bob", Duration::hours(1), Duration::days(1));

        let state = publisher
            .set_authenticated(pair.clone(), user("bob"))
            .await
            .unwrap();

        assert!(state.is_authenticated());
        assert_eq!(publisher.current(), state);
        assert_eq!(publisher.inner.store.load().await.unwrap(), Some(pair));
    }

    #[tokio::test]
    async fn test_set_unauthenticated_clears_and_publishes() {
        let pair = pair_for("alice", Duration::hours(1), Duration::days(7));
        let (publisher, _) = publisher_with(Some(pair)).await;

        let state = publisher.set_unauthenticated().await.unwrap();
        assert!(!state.is_authenticated());
        assert!(state.user().is_none());
        assert!(state.roles().is_empty());
        assert_eq!(publisher.inner.store.load().await.unwrap(), None);
        assert!(publisher.tokens().is_none());
    }

    #[tokio::test]
    async fn test_listeners_get_current_value_then_changes_in_order() {
        let (publisher, _) = publisher_with(None).await;
        let log = Arc::new(StdMutex::new(Vec::new()));

        let log_a = Arc::clone(&log);
        let _a = publisher.on_change(move |s| {
            log_a.lock().unwrap().push(("a", s.is_authenticated()));
        });
        let log_b = Arc::clone(&log);
        let _b = publisher.on_change(move |s| {
            log_b.lock().unwrap().push(("b", s.is_authenticated()));
        });

        let pair = pair_for("alice", Duration::hours(1), Duration::days(1));
        publisher.set_authenticated(pair, user("alice")).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", false), ("b", false), ("a", true), ("b", true)]
        );
    }

    #[tokio::test]
    async fn test_unchanged_state_is_not_republished() {
        let (publisher, _) = publisher_with(None).await;
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let _handle = publisher.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        publisher.set_unauthenticated().await.unwrap();
        publisher.set_unauthenticated().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_unregisters_listener() {
        let (publisher, _) = publisher_with(None).await;
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let handle = publisher.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(publisher.listener_count(), 1);

        handle.release();
        assert_eq!(publisher.listener_count(), 0);

        let pair = pair_for("alice", Duration::hours(1), Duration::days(1));
        publisher.set_authenticated(pair, user("alice")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_ticket_is_superseded() {
        let (publisher, _) = publisher_with(None).await;

        let slow_login = publisher.begin();
        let logout = publisher.begin();
        publisher.commit_unauthenticated(logout).await.unwrap();

        let pair = pair_for("alice", Duration::hours(1), Duration::days(1));
        let result = publisher
            .commit_authenticated(slow_login, pair, user("alice"))
            .await;

        assert_eq!(result, Err(AuthError::Superseded));
        assert!(!publisher.is_authenticated());
        assert_eq!(publisher.inner.store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_user_action_invalidates_background_work_in_flight() {
        let pair = pair_for("alice", Duration::hours(1), Duration::days(1));
        let (publisher, _) = publisher_with(Some(pair.clone())).await;

        let refresh = publisher.begin();
        publisher.set_unauthenticated().await.unwrap();

        let result = publisher
            .commit_authenticated(refresh, pair, user("alice"))
            .await;
        assert_eq!(result, Err(AuthError::Superseded));
        assert!(!publisher.is_authenticated());
        assert_eq!(publisher.inner.store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_background_expiry_does_not_cancel_login() {
        let (publisher, _) = publisher_with(None).await;

        let login = publisher.begin_user_action();
        let expiry = publisher.begin();
        publisher.commit_unauthenticated(expiry).await.unwrap();

        let pair = pair_for("alice", Duration::hours(1), Duration::days(1));
        publisher
            .commit_authenticated(login, pair.clone(), user("alice"))
            .await
            .unwrap();
        assert!(publisher.is_authenticated());
        assert_eq!(publisher.inner.store.load().await.unwrap(), Some(pair));
    }

    #[tokio::test]
    async fn test_newer_login_wins_over_older_one() {
        let (publisher, _) = publisher_with(None).await;

        let first = publisher.begin_user_action();
        let second = publisher.begin_user_action();
        let bob = pair_for("bob", Duration::hours(1), Duration::days(1));
        publisher
            .commit_authenticated(second, bob.clone(), user("bob"))
            .await
            .unwrap();

        let alice = pair_for("alice", Duration::hours(1), Duration::days(1));
        let result = publisher.commit_authenticated(first, alice, user("alice")).await;
        assert_eq!(result, Err(AuthError::Superseded));
        assert_eq!(publisher.current().user().unwrap().username, "bob");
        assert_eq!(publisher.tokens(), Some(bob));
    }

    /// Refuses access-token writes while `failures` is non-zero.
    struct FlakyStore {
        inner: MemorySecureStore,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SecureStore for FlakyStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            if key == ACCESS_TOKEN_KEY
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(BridgeError::Storage("keychain locked".to_string()));
            }
            self.inner.set_secret(key, value).await
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            self.inner.get_secret(key).await
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.inner.delete_secret(key).await
        }
    }

    async fn publisher_over_flaky_store(
        stored: &TokenPair,
    ) -> (SessionPublisher, Arc<FlakyStore>) {
        let flaky = Arc::new(FlakyStore {
            inner: MemorySecureStore::new(),
            failures: std::sync::atomic::AtomicUsize::new(0),
        });
        let store = TokenStore::new(flaky.clone());
        store.save(stored).await.unwrap();
        let publisher = SessionPublisher::restore(store, Arc::new(FixedClock::new(now()))).await;
        (publisher, flaky)
    }

    #[tokio::test]
    async fn test_failed_save_restores_previous_session() {
        let alice = pair_for("alice", Duration::hours(1), Duration::days(1));
        let (publisher, flaky) = publisher_over_flaky_store(&alice).await;
        flaky.failures.store(1, Ordering::SeqCst);

        let bob = pair_for("bob", Duration::hours(1), Duration::days(1));
        let result = publisher.set_authenticated(bob, user("bob")).await;

        assert!(matches!(result, Err(AuthError::Storage(_))));
        assert_eq!(publisher.current().user().unwrap().username, "alice");
        assert_eq!(publisher.tokens(), Some(alice.clone()));
        assert_eq!(publisher.inner.store.load().await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn test_failed_save_without_recovery_signs_out() {
        let alice = pair_for("alice", Duration::hours(1), Duration::days(1));
        let (publisher, flaky) = publisher_over_flaky_store(&alice).await;
        flaky.failures.store(usize::MAX, Ordering::SeqCst);

        let transitions = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&transitions);
        let _handle = publisher.on_change(move |s| sink.lock().unwrap().push(s.is_authenticated()));

        let bob = pair_for("bob", Duration::hours(1), Duration::days(1));
        let result = publisher.set_authenticated(bob, user("bob")).await;

        assert!(matches!(result, Err(AuthError::Storage(_))));
        assert!(!publisher.is_authenticated());
        assert!(publisher.tokens().is_none());
        assert_eq!(publisher.inner.store.load().await.unwrap(), None);
        assert_eq!(*transitions.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_watch_sees_latest_state_and_closes_on_shutdown() {
        let (publisher, _) = publisher_with(None).await;
        let mut watch = publisher.watch();
        assert!(!watch.current().is_authenticated());

        let pair = pair_for("alice", Duration::hours(1), Duration::days(1));
        publisher.set_authenticated(pair, user("alice")).await.unwrap();
        assert!(watch.changed().await.unwrap().is_authenticated());

        let _handle = publisher.on_change(|_| {});
        publisher.shutdown();
        assert_eq!(publisher.listener_count(), 0);
        assert!(watch.changed().await.is_none());
        assert!(publisher.watch().current().is_authenticated());
    }
}

//! Session registry with takeover and liveness tracking

use super::token::StopToken;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One tracked streaming session.
struct SessionEntry {
    token: StopToken,
    requires_ack: bool,
    last_ack: Instant,
}

/// The globally current session (single-viewer slot).
struct ActiveSession {
    client_id: String,
    token: StopToken,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionEntry>,
    current: Option<ActiveSession>,
}

/// Process-wide table mapping client ids to stop tokens.
///
/// All mutations run under one mutex. The critical sections never block
/// or await, so the sync mutex is safe to take from async tasks and from
/// Drop-based cleanup guards.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    ack_timeout: Duration,
}

impl SessionRegistry {
    /// `ack_timeout` of zero disables liveness expiry entirely.
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            ack_timeout,
        }
    }

    /// Register a new session, displacing any previous one under the key.
    ///
    /// The displaced token is set after the swap so the old reader observes
    /// cancellation on its next check. An empty client id is the anonymous
    /// degenerate case: a fresh token is returned but nothing is tracked.
    pub fn register(&self, client_id: &str, requires_ack: bool) -> StopToken {
        let token = StopToken::new();
        if client_id.is_empty() {
            return token;
        }

        let displaced = {
            let mut inner = self.inner.lock().unwrap();
            let previous = inner.sessions.insert(
                client_id.to_string(),
                SessionEntry {
                    token: token.clone(),
                    requires_ack,
                    last_ack: Instant::now(),
                },
            );
            inner.current = Some(ActiveSession {
                client_id: client_id.to_string(),
                token: token.clone(),
            });
            previous
        };

        if let Some(previous) = displaced {
            previous.token.set();
            tracing::info!(client_id = %client_id, "Displaced previous session");
        }

        tracing::debug!(
            client_id = %client_id,
            requires_ack = requires_ack,
            "Session registered"
        );
        token
    }

    /// Remove a session entry, but only if it still belongs to `token`.
    ///
    /// Compare-and-delete: a finalizer running late must not remove the
    /// entry of a newer session registered under the same key. The token
    /// itself is always set so any other observer sees completion.
    pub fn release(&self, client_id: &str, token: &StopToken) {
        if !client_id.is_empty() {
            let mut inner = self.inner.lock().unwrap();
            let still_owner = inner
                .sessions
                .get(client_id)
                .map(|entry| entry.token.same_as(token))
                .unwrap_or(false);
            if still_owner {
                inner.sessions.remove(client_id);
            }
            let current_is_token = inner
                .current
                .as_ref()
                .map(|active| active.token.same_as(token))
                .unwrap_or(false);
            if current_is_token {
                inner.current = None;
            }
            tracing::debug!(
                client_id = %client_id,
                removed = still_owner,
                "Session released"
            );
        }
        token.set();
    }

    /// Signal the current session's token, if any. Returns true if found.
    ///
    /// Used by the external stop control action.
    pub fn force_stop(&self, client_id: &str) -> bool {
        let token = {
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .get(client_id)
                .map(|entry| entry.token.clone())
        };
        match token {
            Some(token) => {
                token.set();
                tracing::info!(client_id = %client_id, "Session stop requested");
                true
            }
            None => false,
        }
    }

    /// Signal whichever session is globally current, without removing it.
    ///
    /// Called by a new stream request before it waits on the exclusive
    /// lock, so the in-flight reader exits promptly and unblocks it. The
    /// old session's own finalizer performs the registry removal.
    pub fn signal_active(&self) {
        let token = {
            let inner = self.inner.lock().unwrap();
            inner.current.as_ref().map(|active| active.token.clone())
        };
        if let Some(token) = token {
            token.set();
            tracing::debug!("Signaled active session for takeover");
        }
    }

    /// Refresh the ack timestamp for the live session.
    ///
    /// Fails for unknown ids and for ids that are no longer current, so a
    /// previous session's late heartbeat cannot keep a newer one alive.
    pub fn touch_ack(&self, client_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let is_current = inner
            .current
            .as_ref()
            .map(|active| active.client_id == client_id)
            .unwrap_or(false);
        if !is_current {
            return false;
        }
        match inner.sessions.get_mut(client_id) {
            Some(entry) => {
                entry.last_ack = Instant::now();
                true
            }
            None => false,
        }
    }

    /// True iff the session has gone silent past the configured timeout.
    ///
    /// Never expires when the feature is disabled (timeout zero), when the
    /// token is no longer the registered one, or when the session does not
    /// require acks.
    pub fn is_expired(&self, client_id: &str, token: &StopToken) -> bool {
        if self.ack_timeout.is_zero() {
            return false;
        }
        let inner = self.inner.lock().unwrap();
        match inner.sessions.get(client_id) {
            Some(entry) if entry.token.same_as(token) => {
                entry.requires_ack && entry.last_ack.elapsed() > self.ack_timeout
            }
            _ => false,
        }
    }

    /// Client id of the globally current session, if any.
    pub fn active_client(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.current.as_ref().map(|active| active.client_id.clone())
    }

    /// Number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    /// Whether the registry still maps `client_id` to exactly this token.
    pub fn is_current(&self, client_id: &str, token: &StopToken) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(client_id)
            .map(|entry| entry.token.same_as(token))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::ZERO)
    }

    #[test]
    fn test_register_replaces_existing_session() {
        let reg = registry();

        let first = reg.register("abc", false);
        let second = reg.register("abc", false);

        assert!(!first.same_as(&second));
        assert!(first.is_set());
        assert!(!second.is_set());
        assert!(reg.is_current("abc", &second));
        assert_eq!(reg.session_count(), 1);
    }

    #[test]
    fn test_register_anonymous_is_untracked() {
        let reg = registry();

        let token = reg.register("", false);

        assert!(!token.is_set());
        assert_eq!(reg.session_count(), 0);
        assert!(reg.active_client().is_none());
    }

    #[test]
    fn test_release_sets_token_and_removes_entry() {
        let reg = registry();

        let token = reg.register("abc", false);
        reg.release("abc", &token);

        assert!(token.is_set());
        assert_eq!(reg.session_count(), 0);
        assert!(reg.active_client().is_none());
    }

    #[test]
    fn test_stale_release_keeps_newer_session() {
        let reg = registry();

        let t1 = reg.register("abc", false);
        let t2 = reg.register("abc", false);

        // Stale finalizer must not delete the newer entry.
        reg.release("abc", &t1);

        assert!(reg.is_current("abc", &t2));
        assert!(!t2.is_set());
        assert_eq!(reg.active_client().as_deref(), Some("abc"));
    }

    #[test]
    fn test_force_stop() {
        let reg = registry();

        assert!(!reg.force_stop("ghost"));

        let token = reg.register("abc", false);
        assert!(reg.force_stop("abc"));
        assert!(token.is_set());
    }

    #[test]
    fn test_signal_active_targets_latest_session() {
        let reg = registry();

        let t1 = reg.register("a", false);
        let t2 = reg.register("b", false);

        reg.signal_active();

        assert!(t2.is_set());
        assert!(!t1.is_set());
    }

    #[test]
    fn test_touch_ack_rejects_stale_client() {
        let reg = registry();

        reg.register("old", true);
        reg.register("new", true);

        // "old" is still tracked but no longer the live session.
        assert!(!reg.touch_ack("old"));
        assert!(reg.touch_ack("new"));
        assert!(!reg.touch_ack("ghost"));
    }

    #[test]
    fn test_expiry_disabled_without_timeout() {
        let reg = SessionRegistry::new(Duration::ZERO);
        let token = reg.register("abc", true);

        sleep(Duration::from_millis(20));
        assert!(!reg.is_expired("abc", &token));
    }

    #[test]
    fn test_expiry_after_silence() {
        let reg = SessionRegistry::new(Duration::from_millis(50));
        let token = reg.register("abc", true);

        assert!(!reg.is_expired("abc", &token));
        sleep(Duration::from_millis(80));
        assert!(reg.is_expired("abc", &token));
    }

    #[test]
    fn test_ack_refresh_defers_expiry() {
        let reg = SessionRegistry::new(Duration::from_millis(80));
        let token = reg.register("abc", true);

        sleep(Duration::from_millis(50));
        assert!(reg.touch_ack("abc"));
        sleep(Duration::from_millis(50));

        // 100ms since registration but only 50ms since the last ack.
        assert!(!reg.is_expired("abc", &token));
    }

    #[test]
    fn test_expiry_skips_sessions_without_ack_requirement() {
        let reg = SessionRegistry::new(Duration::from_millis(20));
        let token = reg.register("abc", false);

        sleep(Duration::from_millis(50));
        assert!(!reg.is_expired("abc", &token));
    }

    #[test]
    fn test_expiry_ignores_replaced_token() {
        let reg = SessionRegistry::new(Duration::from_millis(20));
        let t1 = reg.register("abc", true);
        let _t2 = reg.register("abc", true);

        sleep(Duration::from_millis(50));
        assert!(!reg.is_expired("abc", &t1));
    }
}

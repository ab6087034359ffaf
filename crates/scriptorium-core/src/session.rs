//! Admin sessions and the route gate in front of admin operations.
//!
//! [`SessionContext`] owns every live session. Components that care about
//! sign-in state subscribe to it and get a [`Subscription`] back; dropping
//! the subscription ends it, so a listener lives exactly as long as the
//! component holding it. [`AdminGate`] turns a presented token into either
//! an allowed session or a redirect to the login view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

/// An authenticated admin session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Credential issued by an upstream auth service, kept for sign-out.
    #[serde(skip)]
    pub provider_token: Option<String>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    Logout,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { email: String },
    SignedOut { email: String, reason: SignOutReason },
}

type Listener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

struct Inner {
    sessions: RwLock<HashMap<String, Session>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    ttl: Duration,
}

impl Inner {
    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: &AuthEvent) {
        let listeners: Vec<Listener> = self.listeners().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Shared handle to the live admin sessions. Clones share state.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl SessionContext {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Records a successful sign-in and returns the new session.
    pub fn establish(&self, email: &str, provider_token: Option<String>) -> Session {
        self.establish_at(email, provider_token, Utc::now())
    }

    pub fn establish_at(
        &self,
        email: &str,
        provider_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Session {
        let session = Session {
            token: uuid::Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
            issued_at: now,
            expires_at: now + self.inner.ttl,
            provider_token,
        };
        self.inner
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.token.clone(), session.clone());
        debug!(email, "session established");
        self.inner.emit(&AuthEvent::SignedIn {
            email: email.to_string(),
        });
        session
    }

    /// The live session for `token`, if any.
    pub fn lookup(&self, token: &str) -> Option<Session> {
        self.lookup_at(token, Utc::now())
    }

    /// Expired sessions are dropped on lookup and reported as signed out.
    pub fn lookup_at(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let session = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned()?;
        if !session.is_expired_at(now) {
            return Some(session);
        }
        self.remove(token, SignOutReason::Expired);
        None
    }

    /// Ends the session for `token`. Returns it when it existed.
    pub fn end(&self, token: &str) -> Option<Session> {
        self.remove(token, SignOutReason::Logout)
    }

    fn remove(&self, token: &str, reason: SignOutReason) -> Option<Session> {
        let removed = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
        if let Some(session) = &removed {
            debug!(email = %session.email, ?reason, "session ended");
            self.inner.emit(&AuthEvent::SignedOut {
                email: session.email.clone(),
                reason,
            });
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Registers a listener for sign-in and sign-out events.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().push((id, Arc::new(listener)));
        Subscription {
            id,
            context: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    context: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.context.upgrade() {
            inner.listeners().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Outcome of presenting a token at an admin route.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow(Session),
    RedirectToLogin { login_path: String },
}

/// Guards admin routes: a live session passes, anything else is sent to login.
#[derive(Clone)]
pub struct AdminGate {
    sessions: SessionContext,
    login_path: String,
}

impl AdminGate {
    pub fn new(sessions: SessionContext, login_path: impl Into<String>) -> Self {
        Self {
            sessions,
            login_path: login_path.into(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn check(&self, token: Option<&str>) -> GateDecision {
        match token.and_then(|t| self.sessions.lookup(t)) {
            Some(session) => GateDecision::Allow(session),
            None => GateDecision::RedirectToLogin {
                login_path: self.login_path.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_see_sign_in_and_out() {
        let ctx = SessionContext::new(Duration::hours(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = ctx.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let s = ctx.establish("admin@example.org", None);
        ctx.end(&s.token);
        assert!(ctx.end(&s.token).is_none());

        let events = seen.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                AuthEvent::SignedIn {
                    email: "admin@example.org".to_string()
                },
                AuthEvent::SignedOut {
                    email: "admin@example.org".to_string(),
                    reason: SignOutReason::Logout
                },
            ]
        );
        drop(sub);
    }

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let ctx = SessionContext::new(Duration::hours(1));
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        let sub = ctx.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ctx.listener_count(), 1);
        ctx.establish("a@example.org", None);
        sub.unsubscribe();
        assert_eq!(ctx.listener_count(), 0);
        ctx.establish("b@example.org", None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let ctx = SessionContext::new(Duration::minutes(30));
        let start = Utc::now();
        let s = ctx.establish_at("a@example.org", None, start);
        assert!(ctx.lookup_at(&s.token, start + Duration::minutes(29)).is_some());
        assert!(ctx.lookup_at(&s.token, start + Duration::minutes(30)).is_none());
        assert_eq!(ctx.active_count(), 0);
    }

    #[test]
    fn gate_allows_live_sessions_and_redirects_the_rest() {
        let ctx = SessionContext::new(Duration::hours(1));
        let gate = AdminGate::new(ctx.clone(), "/login");
        let s = ctx.establish("a@example.org", None);

        match gate.check(Some(&s.token)) {
            GateDecision::Allow(got) => assert_eq!(got.email, "a@example.org"),
            other => panic!("expected Allow, got {other:?}"),
        }
        assert_eq!(
            gate.check(None),
            GateDecision::RedirectToLogin {
                login_path: "/login".to_string()
            }
        );
        ctx.end(&s.token);
        assert!(matches!(
            gate.check(Some(&s.token)),
            GateDecision::RedirectToLogin { .. }
        ));
    }
}

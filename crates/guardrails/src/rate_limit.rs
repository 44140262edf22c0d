//! Sliding-window rate limiter.
//!
//! One window per (rule, scope key). A window holds the instants of recent
//! executions; entries older than the rule's window are pruned on access.

use mindloop_core::guardrail::{RateLimit, RateScope};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of checking one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateStatus {
    pub used: u32,
    pub limit: u32,
}

impl RateStatus {
    pub fn exceeded(&self) -> bool {
        self.used >= self.limit
    }
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

fn scope_key(rule: &RateLimit, user_id: &str) -> String {
    match rule.scope {
        RateScope::PerUser => format!("user:{user_id}"),
        RateScope::Global => "global".to_string(),
    }
}

fn prune(window: &mut VecDeque<Instant>, span: Duration, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls counted against `rule` for this user right now.
    pub fn status(&self, rule: &RateLimit, user_id: &str) -> RateStatus {
        let now = Instant::now();
        let span = Duration::from_secs(rule.window_secs);
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let used = match windows.get_mut(&(rule.name.clone(), scope_key(rule, user_id))) {
            Some(window) => {
                prune(window, span, now);
                window.len() as u32
            }
            None => 0,
        };
        RateStatus {
            used,
            limit: rule.max_calls,
        }
    }

    /// Take one slot in every window of `rules`, all or nothing.
    ///
    /// Checking and counting happen under one lock, so concurrent callers
    /// can never overrun a window together. On failure nothing is held and
    /// the exceeded rules are returned with their counts.
    pub fn try_acquire(
        &self,
        rules: &[&RateLimit],
        user_id: &str,
    ) -> Result<Reservation, Vec<(String, RateStatus)>> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let mut exceeded = Vec::new();
        for rule in rules {
            let key = (rule.name.clone(), scope_key(rule, user_id));
            let window = windows.entry(key).or_default();
            prune(window, Duration::from_secs(rule.window_secs), now);
            let status = RateStatus {
                used: window.len() as u32,
                limit: rule.max_calls,
            };
            if status.exceeded() {
                exceeded.push((rule.name.clone(), status));
            }
        }
        if !exceeded.is_empty() {
            return Err(exceeded);
        }

        let mut slots = Vec::with_capacity(rules.len());
        for rule in rules {
            let key = (rule.name.clone(), scope_key(rule, user_id));
            windows.entry(key.clone()).or_default().push_back(now);
            slots.push((key, now));
        }
        Ok(Reservation { slots })
    }

    /// Give back slots for work that never ran.
    pub fn release(&self, reservation: Reservation) {
        if reservation.slots.is_empty() {
            return;
        }
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        for (key, at) in reservation.slots {
            if let Some(window) = windows.get_mut(&key)
                && let Some(pos) = window.iter().rposition(|t| *t == at)
            {
                window.remove(pos);
            }
        }
    }
}

/// Slots taken by [`RateLimiter::try_acquire`].
///
/// Dropping it keeps the slots counted; hand it to [`RateLimiter::release`]
/// when the guarded work did not happen.
#[derive(Debug, Default)]
#[must_use]
pub struct Reservation {
    slots: Vec<((String, String), Instant)>,
}

impl Reservation {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(scope: RateScope) -> RateLimit {
        RateLimit {
            name: "mail".into(),
            capabilities: vec!["email.*".into()],
            max_calls: 2,
            window_secs: 60,
            scope,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = RateLimiter::new();
        let r = rule(RateScope::PerUser);
        let _ = limiter.try_acquire(&[&r], "u1").unwrap();
        let _ = limiter.try_acquire(&[&r], "u1").unwrap();
        assert!(limiter.status(&r, "u1").exceeded());
        assert!(limiter.try_acquire(&[&r], "u1").is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.status(&r, "u1").used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_user_scopes_are_independent() {
        let limiter = RateLimiter::new();
        let r = rule(RateScope::PerUser);
        let _ = limiter.try_acquire(&[&r], "u1").unwrap();
        let _ = limiter.try_acquire(&[&r], "u1").unwrap();
        assert!(!limiter.status(&r, "u2").exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn global_scope_is_shared() {
        let limiter = RateLimiter::new();
        let r = rule(RateScope::Global);
        let _ = limiter.try_acquire(&[&r], "u1").unwrap();
        let _ = limiter.try_acquire(&[&r], "u2").unwrap();
        assert!(limiter.status(&r, "u3").exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_is_all_or_nothing() {
        let limiter = RateLimiter::new();
        let mail = rule(RateScope::PerUser);
        let tight = RateLimit {
            name: "tight".into(),
            max_calls: 1,
            ..rule(RateScope::PerUser)
        };
        let _ = limiter.try_acquire(&[&tight], "u1").unwrap();

        let exceeded = limiter.try_acquire(&[&mail, &tight], "u1").unwrap_err();
        assert_eq!(exceeded.len(), 1);
        assert_eq!(exceeded[0].0, "tight");
        assert_eq!(limiter.status(&mail, "u1").used, 0, "no partial hold");
    }

    #[tokio::test(start_paused = true)]
    async fn released_slots_are_reusable() {
        let limiter = RateLimiter::new();
        let r = RateLimit {
            max_calls: 1,
            ..rule(RateScope::Global)
        };
        let held = limiter.try_acquire(&[&r], "u1").unwrap();
        assert!(limiter.try_acquire(&[&r], "u2").is_err());

        limiter.release(held);
        assert_eq!(limiter.status(&r, "u2").used, 0);
        assert!(limiter.try_acquire(&[&r], "u2").is_ok());
    }
}

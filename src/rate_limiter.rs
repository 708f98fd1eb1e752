//! Multi-level rate limiting
//!
//! Every job submission passes one combined check over three fixed-window
//! levels, evaluated in a deterministic order: active penalty, then the
//! global window, then the per-user window, then the per-operation window.
//! Counters are incremented only when every level passes, so a rejected
//! attempt never consumes quota, and two identical request streams always
//! reject at the same level. Rejections at the per-user levels may impose
//! a cooldown on the offending user; global congestion blocks the request
//! but never penalizes anyone for it.

use crate::config::{RateLimitConfig, RateWindowConfig};
use crate::types::{OperationKind, RateLimiterStats, RateScope, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Outcome of a combined rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// All levels passed; the attempt has been counted
    Allowed,
    /// One level rejected; nothing was counted
    Rejected {
        /// The level that rejected
        scope: RateScope,
        /// Time until another attempt can succeed
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WindowKey {
    Global,
    User(UserId),
    Operation(UserId, OperationKind),
}

struct WindowState {
    count: u32,
    window_start: Instant,
}

struct PenaltyState {
    until: Instant,
    scope: RateScope,
}

struct LimiterState {
    windows: HashMap<WindowKey, WindowState>,
    penalties: HashMap<UserId, PenaltyState>,
}

/// Fixed-window rate limiter shared by all submissions
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    checks: AtomicU64,
    allowed: AtomicU64,
    rejected_global: AtomicU64,
    rejected_user: AtomicU64,
    rejected_operation: AtomicU64,
    rejected_penalty: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter from its configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                penalties: HashMap::new(),
            }),
            checks: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            rejected_global: AtomicU64::new(0),
            rejected_user: AtomicU64::new(0),
            rejected_operation: AtomicU64::new(0),
            rejected_penalty: AtomicU64::new(0),
        }
    }

    /// Runs the combined check and, only if every level passes, records the
    /// attempt against all of them
    pub async fn check_and_record(&self, user: UserId, operation: OperationKind) -> RateDecision {
        self.checks.fetch_add(1, Ordering::Relaxed);

        if !self.config.enabled || self.config.exempt_users.contains(&user) {
            self.allowed.fetch_add(1, Ordering::Relaxed);
            return RateDecision::Allowed;
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;

        // 1. Active penalty outranks every window
        if let Some(penalty) = state.penalties.get(&user) {
            if penalty.until > now {
                let decision = RateDecision::Rejected {
                    scope: penalty.scope,
                    retry_after: penalty.until - now,
                };
                self.rejected_penalty.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%user, scope = %penalty.scope, "Rejected by active penalty");
                return decision;
            }
            state.penalties.remove(&user);
        }

        // 2. Windows in fixed order; nothing is counted until all pass
        let op_config = self.operation_window(operation);
        let levels = [
            (RateScope::Global, WindowKey::Global, &self.config.global),
            (RateScope::User, WindowKey::User(user), &self.config.per_user),
            (
                RateScope::Operation,
                WindowKey::Operation(user, operation),
                op_config,
            ),
        ];

        for (scope, key, window_config) in levels {
            if let Some(window_remaining) =
                window_rejects(&mut state.windows, key, window_config, now)
            {
                // Penalties are personal: only the user's own windows impose
                // one. Global congestion blocks without penalizing.
                let penalized = self.config.penalties_enabled
                    && !window_config.penalty.is_zero()
                    && matches!(scope, RateScope::User | RateScope::Operation);
                let retry_after = if penalized {
                    // The hint must never promise success earlier than the
                    // cooldown allows
                    window_remaining.max(window_config.penalty)
                } else {
                    window_remaining
                };
                if penalized {
                    state.penalties.insert(
                        user,
                        PenaltyState {
                            until: now + window_config.penalty,
                            scope,
                        },
                    );
                }
                match scope {
                    RateScope::Global => self.rejected_global.fetch_add(1, Ordering::Relaxed),
                    RateScope::User => self.rejected_user.fetch_add(1, Ordering::Relaxed),
                    RateScope::Operation => self.rejected_operation.fetch_add(1, Ordering::Relaxed),
                };
                tracing::debug!(
                    %user,
                    %operation,
                    %scope,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit rejection"
                );
                return RateDecision::Rejected { scope, retry_after };
            }
        }

        // 3. All levels passed; count the attempt against each of them
        for key in [
            WindowKey::Global,
            WindowKey::User(user),
            WindowKey::Operation(user, operation),
        ] {
            if let Some(window) = state.windows.get_mut(&key) {
                window.count += 1;
            }
        }
        self.allowed.fetch_add(1, Ordering::Relaxed);
        RateDecision::Allowed
    }

    /// Snapshot of the limiter's counters
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            checks: self.checks.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            rejected_global: self.rejected_global.load(Ordering::Relaxed),
            rejected_user: self.rejected_user.load(Ordering::Relaxed),
            rejected_operation: self.rejected_operation.load(Ordering::Relaxed),
            rejected_penalty: self.rejected_penalty.load(Ordering::Relaxed),
        }
    }

    fn operation_window(&self, operation: OperationKind) -> &RateWindowConfig {
        match operation {
            OperationKind::Download => &self.config.download,
            OperationKind::Command => &self.config.command,
        }
    }
}

/// Checks one window without counting the attempt.
///
/// Lazily creates the window on first sight and resets it when its span has
/// elapsed; a reset only reflects the passage of time, never the attempt
/// itself. Returns the remaining window time when the window is full.
fn window_rejects(
    windows: &mut HashMap<WindowKey, WindowState>,
    key: WindowKey,
    config: &RateWindowConfig,
    now: Instant,
) -> Option<Duration> {
    let window = windows.entry(key).or_insert_with(|| WindowState {
        count: 0,
        window_start: now,
    });
    let elapsed = now.duration_since(window.window_start);
    if elapsed >= config.window {
        window.count = 0;
        window.window_start = now;
        return None;
    }
    if window.count >= config.max_requests {
        return Some(config.window - elapsed);
    }
    None
}

/// Rounds a duration up to whole seconds for user-facing retry hints
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

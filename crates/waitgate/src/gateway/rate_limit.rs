// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client-fingerprint request rate limiting at the gateway (spec §2
//! component G "rate-limits per client fingerprint"), distinct from the
//! per-queue admission-bucket rate in `admission` — this one guards the
//! gateway itself against a single client hammering it, not the protected
//! origin's admission rate.

use std::num::NonZeroU32;
use std::time::{SystemTime, UNIX_EPOCH};

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

/// Outcome of a rate-limit check, carrying the header values spec §6 asks
/// every response to include (`limit`, `remaining`, `reset`).
pub struct LimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_unix_secs: u64,
}

pub struct FingerprintLimiter {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    clock: DefaultClock,
    limit: u32,
}

impl FingerprintLimiter {
    pub fn new(per_sec: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_sec.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst.max(per_sec).max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self { limiter: RateLimiter::keyed(quota), clock: DefaultClock::default(), limit: burst.get() }
    }

    /// GCRA doesn't expose an exact token count the way a plain token bucket
    /// does, so `remaining` is the coarse approximation most gateways ship:
    /// `limit - 1` on a pass, `0` on a deny.
    pub fn check(&self, fingerprint: &str) -> LimitDecision {
        let now_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        match self.limiter.check_key(&fingerprint.to_owned()) {
            Ok(()) => LimitDecision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit.saturating_sub(1),
                reset_unix_secs: now_unix + 1,
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                LimitDecision { allowed: false, limit: self.limit, remaining: 0, reset_unix_secs: now_unix + wait.as_secs().max(1) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_then_denies() {
        let limiter = FingerprintLimiter::new(1, 2);
        assert!(limiter.check("fp-a").allowed);
        assert!(limiter.check("fp-a").allowed);
        assert!(!limiter.check("fp-a").allowed);
    }

    #[test]
    fn distinct_fingerprints_have_independent_budgets() {
        let limiter = FingerprintLimiter::new(1, 1);
        assert!(limiter.check("fp-a").allowed);
        assert!(limiter.check("fp-b").allowed);
    }
}

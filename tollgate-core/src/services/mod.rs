//! Service layer for the security core
//!
//! Each service wraps injected collaborators (the counter store, the user and
//! password history repositories, the audit sink) and exposes the operations
//! the routing layer calls on every authentication request.

pub mod csrf;
pub mod lockout;
pub mod password;
pub mod rate_limit;
pub mod two_factor;

pub use csrf::{CsrfConfig, CsrfService};
pub use lockout::{
    LockoutRecord, LockoutService, LockoutSettings, LockoutState, LockoutStats, LockoutStatus,
    LockoutTransition,
};
pub use password::{PasswordChangeResult, PasswordSecurityService};
pub use rate_limit::{RateLimitAction, RateLimitConfig, RateLimitStatus, RateLimiter, RateRecord};
pub use two_factor::{TwoFactorConfig, TwoFactorService, TwoFactorSetupResponse};

use chrono::{DateTime, Duration, Utc};

/// Lockout duration multipliers indexed by the number of previous lockouts.
pub const PROGRESSIVE_MULTIPLIERS: [i32; 6] = [1, 2, 4, 8, 16, 48];

/// Upper bound for any single lockout.
pub fn max_lockout_duration() -> Duration {
    Duration::hours(24)
}

/// Duration of the next lockout for an identifier that has been locked
/// `previous_lockouts` times before.
pub fn progressive_lockout_duration(
    base: Duration,
    previous_lockouts: u32,
    progressive: bool,
) -> Duration {
    if !progressive {
        return base;
    }
    let index = (previous_lockouts as usize).min(PROGRESSIVE_MULTIPLIERS.len() - 1);
    base.checked_mul(PROGRESSIVE_MULTIPLIERS[index])
        .unwrap_or_else(max_lockout_duration)
        .min(max_lockout_duration())
}

pub(crate) fn from_millis(value: Option<&String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

/// Whole seconds from `now` until `target`, rounded up and never negative.
pub(crate) fn seconds_until(target: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (target - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progressive_duration_follows_multipliers() {
        let base = Duration::minutes(30);
        assert_eq!(progressive_lockout_duration(base, 0, true), Duration::minutes(30));
        assert_eq!(progressive_lockout_duration(base, 1, true), Duration::minutes(60));
        assert_eq!(progressive_lockout_duration(base, 2, true), Duration::minutes(120));
        assert_eq!(progressive_lockout_duration(base, 3, true), Duration::minutes(240));
        assert_eq!(progressive_lockout_duration(base, 4, true), Duration::minutes(480));
        // 30min * 48 is capped at a day
        assert_eq!(progressive_lockout_duration(base, 5, true), Duration::hours(24));
        assert_eq!(progressive_lockout_duration(base, 50, true), Duration::hours(24));
    }

    #[test]
    fn test_progressive_duration_is_monotonic_and_capped() {
        for base in [Duration::minutes(1), Duration::minutes(15), Duration::hours(2)] {
            let mut previous = Duration::zero();
            for k in 0..10 {
                let d = progressive_lockout_duration(base, k, true);
                assert!(d >= previous);
                assert!(d <= max_lockout_duration());
                let expected = (base * PROGRESSIVE_MULTIPLIERS[(k as usize).min(5)])
                    .min(max_lockout_duration());
                assert_eq!(d, expected);
                previous = d;
            }
        }
    }

    #[test]
    fn test_flat_duration_ignores_history() {
        let base = Duration::minutes(60);
        assert_eq!(progressive_lockout_duration(base, 4, false), base);
    }

    #[test]
    fn test_seconds_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(seconds_until(now + Duration::milliseconds(1), now), 1);
        assert_eq!(seconds_until(now + Duration::seconds(90), now), 90);
        assert_eq!(seconds_until(now - Duration::seconds(5), now), 0);
    }
}

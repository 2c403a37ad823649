//! Aggregated configuration for all security services
//!
//! [`SecurityConfig::from_env`] reads the following variables:
//!
//! | Variable                              | Effect                                        |
//! | ------------------------------------- | --------------------------------------------- |
//! | `TOLLGATE_CSRF_SECRET`                | CSRF signing key (required unless the next is set) |
//! | `TOLLGATE_SESSION_SECRET`             | Fallback CSRF signing key                     |
//! | `TOLLGATE_TOTP_ISSUER`                | Issuer shown in authenticator apps            |
//! | `TOLLGATE_PASSWORD_EXPIRATION_DAYS`   | Password lifetime                             |
//! | `TOLLGATE_LOCKOUT_MAX_ATTEMPTS`       | Failed logins before an account is locked     |
//! | `TOLLGATE_LOCKOUT_DURATION_MINUTES`   | Base lockout duration                         |

use chrono::Duration;
use tollgate_core::{
    CsrfConfig, Error, LockoutSettings, PasswordAlgorithm, PasswordPolicy, RateLimitAction,
    RateLimitConfig, TwoFactorConfig,
};

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Limits applied by [`crate::Tollgate::login_attempt_guard`]
    pub login_rate_limit: RateLimitConfig,
    pub lockout: LockoutSettings,
    pub csrf: CsrfConfig,
    /// Share the used-CSRF-token set through the counter store so a token
    /// spent on one instance is rejected on every other.
    pub shared_csrf_cache: bool,
    pub two_factor: TwoFactorConfig,
    pub password_policy: PasswordPolicy,
    /// Algorithm for new password hashes
    pub password_algorithm: PasswordAlgorithm,
}

impl SecurityConfig {
    /// Default settings with the given CSRF signing secret.
    pub fn new(csrf_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            login_rate_limit: RateLimitAction::Login.default_config(),
            lockout: LockoutSettings::default(),
            csrf: CsrfConfig::new(csrf_secret),
            shared_csrf_cache: false,
            two_factor: TwoFactorConfig::default(),
            password_policy: PasswordPolicy::default(),
            password_algorithm: PasswordAlgorithm::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if no CSRF secret is set or a numeric variable
    /// does not parse.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let csrf = CsrfConfig::from_secrets(
            lookup("TOLLGATE_CSRF_SECRET").as_deref(),
            lookup("TOLLGATE_SESSION_SECRET").as_deref(),
        )?;

        let mut config = Self {
            csrf,
            ..Self::new(Vec::new())
        };

        if let Some(issuer) = lookup("TOLLGATE_TOTP_ISSUER") {
            config.two_factor.issuer = issuer;
        }
        if let Some(days) = parse_var::<i64>(&lookup, "TOLLGATE_PASSWORD_EXPIRATION_DAYS")? {
            config.password_policy.expiration_days = days;
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, "TOLLGATE_LOCKOUT_MAX_ATTEMPTS")? {
            config.lockout.max_failed_attempts = attempts;
        }
        if let Some(minutes) = parse_var::<i64>(&lookup, "TOLLGATE_LOCKOUT_DURATION_MINUTES")? {
            config.lockout.lockout_duration = Duration::minutes(minutes);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, Error> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Configuration(format!("{name} must be a number, got {raw:?}"))),
        None => Ok(None),
    }
}

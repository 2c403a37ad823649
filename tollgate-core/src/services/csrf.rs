//! Single-use signed CSRF tokens.
//!
//! A token has three dot-separated parts:
//!
//! ```text
//! hex(32 random bytes) . issued_at_millis . hex(HMAC-SHA256(secret, "{random}.{issued_at_millis}"))
//! ```
//!
//! Validation checks, in order: structure, the per-client validation budget,
//! expiry (tokens from the future are never valid), the signature in
//! constant time, and single use. Validation fails closed: any internal error
//! rejects the token, and the caller only ever sees `false`.
//!
//! Used tokens are remembered in a bounded in-process cache. Deployments with
//! several replicas can additionally claim tokens in the shared counter store
//! with [`CsrfService::with_shared_store`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::{
    Error,
    crypto::{constant_time_compare, hmac_sha256_hex, random_hex},
    error::StorageError,
    repositories::{CounterStore, StoreOp, StoreReply, keys},
};

const RANDOM_BYTES: usize = 32;

#[derive(Clone)]
pub struct CsrfConfig {
    /// HMAC key
    pub secret: Vec<u8>,
    /// Token lifetime
    pub ttl: Duration,
    /// Validation attempts allowed per client inside `validation_window`
    pub max_validations_per_client: usize,
    pub validation_window: Duration,
    /// Maximum number of used tokens remembered in process
    pub used_token_capacity: usize,
    /// Maximum number of clients the validation throttle tracks
    pub throttled_client_capacity: usize,
}

impl std::fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .field(
                "max_validations_per_client",
                &self.max_validations_per_client,
            )
            .field("validation_window", &self.validation_window)
            .field("used_token_capacity", &self.used_token_capacity)
            .field("throttled_client_capacity", &self.throttled_client_capacity)
            .finish()
    }
}

impl CsrfConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::hours(1),
            max_validations_per_client: 10,
            validation_window: Duration::seconds(60),
            used_token_capacity: 10_000,
            throttled_client_capacity: 10_000,
        }
    }

    /// Use `primary` if set, otherwise `fallback`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when neither secret is set.
    pub fn from_secrets(primary: Option<&str>, fallback: Option<&str>) -> Result<Self, Error> {
        [primary, fallback]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .map(|s| Self::new(s.as_bytes().to_vec()))
            .ok_or_else(|| Error::Configuration("a CSRF signing secret is required".to_string()))
    }
}

/// Why a token was rejected. Logged, never returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Malformed,
    Throttled,
    Expired,
    FutureTimestamp,
    BadSignature,
    Replayed,
}

impl Rejection {
    fn as_str(&self) -> &'static str {
        match self {
            Rejection::Malformed => "malformed",
            Rejection::Throttled => "throttled",
            Rejection::Expired => "expired",
            Rejection::FutureTimestamp => "future_timestamp",
            Rejection::BadSignature => "bad_signature",
            Rejection::Replayed => "replayed",
        }
    }
}

/// Bounded set of used token signatures. The oldest entries are evicted
/// first once the capacity is exceeded.
#[derive(Debug)]
pub struct UsedTokenCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl UsedTokenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Mark `signature` as used. Returns `false` if it already was.
    pub fn claim(&mut self, signature: &str) -> bool {
        if self.seen.contains(signature) {
            return false;
        }
        self.seen.insert(signature.to_string());
        self.order.push_back(signature.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.seen.contains(signature)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Rolling-window count of validation attempts per client.
///
/// At most `capacity` clients are tracked; once full, the client seen
/// first is forgotten first.
#[derive(Debug)]
struct ClientThrottle {
    capacity: usize,
    attempts: HashMap<String, VecDeque<DateTime<Utc>>>,
    order: VecDeque<String>,
}

impl ClientThrottle {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            attempts: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn allow(&mut self, client: &str, now: DateTime<Utc>, max: usize, window: Duration) -> bool {
        if !self.attempts.contains_key(client) {
            self.evict_idle(now, window);
            while self.attempts.len() >= self.capacity {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.attempts.remove(&oldest);
            }
            self.order.push_back(client.to_string());
        }

        let attempts = self.attempts.entry(client.to_string()).or_default();
        while attempts.front().is_some_and(|t| now - *t >= window) {
            attempts.pop_front();
        }
        if attempts.len() >= max {
            return false;
        }
        attempts.push_back(now);
        true
    }

    /// Drop leading clients whose attempts all fell out of the window.
    fn evict_idle(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(front) = self.order.front() {
            let idle = self
                .attempts
                .get(front)
                .and_then(|attempts| attempts.back())
                .is_none_or(|last| now - *last >= window);
            if !idle {
                break;
            }
            if let Some(client) = self.order.pop_front() {
                self.attempts.remove(&client);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.attempts.len()
    }
}

struct ParsedToken<'a> {
    random: &'a str,
    issued_at: DateTime<Utc>,
    signature: &'a str,
}

fn parse(token: &str) -> Option<ParsedToken<'_>> {
    let mut parts = token.split('.');
    let (random, timestamp, signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || random.is_empty() || signature.is_empty() {
        return None;
    }
    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let issued_at = DateTime::from_timestamp_millis(timestamp.parse::<i64>().ok()?)?;
    Some(ParsedToken {
        random,
        issued_at,
        signature,
    })
}

/// Service issuing and validating CSRF tokens.
pub struct CsrfService {
    config: CsrfConfig,
    used: Mutex<UsedTokenCache>,
    throttle: Mutex<ClientThrottle>,
    shared: Option<Arc<dyn CounterStore>>,
}

impl CsrfService {
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            used: Mutex::new(UsedTokenCache::new(config.used_token_capacity)),
            throttle: Mutex::new(ClientThrottle::new(config.throttled_client_capacity)),
            config,
            shared: None,
        }
    }

    /// Also claim tokens in a shared store so a token used on one replica
    /// cannot be replayed on another.
    pub fn with_shared_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.shared = Some(store);
        self
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    fn sign(&self, random: &str, issued_at_millis: i64) -> Result<String, Error> {
        Ok(hmac_sha256_hex(
            &self.config.secret,
            &format!("{random}.{issued_at_millis}"),
        )?)
    }

    /// Issue a new token.
    pub fn generate_token(&self) -> Result<String, Error> {
        self.generate_token_at(Utc::now())
    }

    pub fn generate_token_at(&self, now: DateTime<Utc>) -> Result<String, Error> {
        let random = random_hex(RANDOM_BYTES);
        let issued_at = now.timestamp_millis();
        let signature = self.sign(&random, issued_at)?;
        Ok(format!("{random}.{issued_at}.{signature}"))
    }

    /// Validate and consume a token.
    ///
    /// `client_id` (usually the client IP or session id) limits how many
    /// validations a single client may attempt; `None` skips that limit.
    pub async fn validate_token(&self, token: &str, client_id: Option<&str>) -> bool {
        self.validate_token_at(token, client_id, Utc::now()).await
    }

    pub async fn validate_token_at(
        &self,
        token: &str,
        client_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.check(token, client_id, now).await {
            Ok(Ok(())) => true,
            Ok(Err(rejection)) => {
                tracing::debug!(reason = rejection.as_str(), "CSRF token rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "CSRF validation failed, rejecting token");
                false
            }
        }
    }

    async fn check(
        &self,
        token: &str,
        client_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Result<(), Rejection>, Error> {
        let Some(parsed) = parse(token) else {
            return Ok(Err(Rejection::Malformed));
        };

        if let Some(client) = client_id {
            let allowed = self
                .throttle
                .lock()
                .map_err(|_| StorageError::CounterStore("client throttle poisoned".into()))?
                .allow(
                    client,
                    now,
                    self.config.max_validations_per_client,
                    self.config.validation_window,
                );
            if !allowed {
                return Ok(Err(Rejection::Throttled));
            }
        }

        if parsed.issued_at > now {
            return Ok(Err(Rejection::FutureTimestamp));
        }
        if now - parsed.issued_at > self.config.ttl {
            return Ok(Err(Rejection::Expired));
        }

        let expected = self.sign(parsed.random, parsed.issued_at.timestamp_millis())?;
        if !constant_time_compare(expected.as_bytes(), parsed.signature.as_bytes()) {
            return Ok(Err(Rejection::BadSignature));
        }

        let claimed = {
            let mut used = self
                .used
                .lock()
                .map_err(|_| StorageError::CounterStore("used token cache poisoned".into()))?;
            used.claim(parsed.signature)
        };
        if !claimed {
            return Ok(Err(Rejection::Replayed));
        }

        if let Some(store) = &self.shared {
            let key = keys::csrf_used(parsed.signature);
            let replies = store
                .atomic(vec![
                    StoreOp::Incr { key: key.clone() },
                    StoreOp::Expire {
                        key,
                        ttl: self.config.ttl,
                    },
                ])
                .await?;
            if !matches!(replies.first(), Some(StoreReply::Integer(1))) {
                return Ok(Err(Rejection::Replayed));
            }
        }

        Ok(Ok(()))
    }
}

//! TOTP two-factor authentication with single-use backup codes.
//!
//! Enrollment is two-phase. [`TwoFactorService::setup_two_factor`] stores a
//! pending setup under `2fa_setup:{user_id}` with a short TTL; a valid code
//! against the pending secret promotes it to `2fa_user:{user_id}` (no TTL)
//! and deletes the setup, so a user never has both at once.
//!
//! Backup codes are returned in plaintext exactly once and stored as SHA-256
//! digests of their normalized form.
//!
//! Every operation fails closed: counter store errors are returned to the
//! caller and never treated as a successful verification.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::{
    Error, UserId,
    audit::{AuditEvent, AuditEventType, AuditSeverity, AuditSink, TracingAuditSink, record_audit},
    crypto::{constant_time_compare, hash_token, random_bytes},
    error::{CryptoError, TwoFactorError, utilities::StorageResultExt},
    repositories::{CounterStore, keys},
};

/// Backup code alphabet without the look-alikes 0, O, 1 and I. Its 32
/// symbols map onto 5 bits of a random byte without bias.
const BACKUP_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const SECRET_BYTES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorConfig {
    /// Issuer shown in authenticator apps
    pub issuer: String,
    /// Lifetime of a pending setup
    pub setup_ttl: Duration,
    pub backup_code_count: usize,
    pub backup_code_length: usize,
    pub digits: usize,
    /// TOTP step in seconds
    pub step: u64,
    /// Steps of clock skew accepted on either side
    pub skew: u8,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: "Tollgate".to_string(),
            setup_ttl: Duration::minutes(10),
            backup_code_count: 10,
            backup_code_length: 8,
            digits: 6,
            step: 30,
            skew: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCode {
    pub code_hash: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Pending enrollment, stored with a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TwoFactorSetup {
    secret: String,
    backup_codes: Vec<BackupCode>,
    created_at: DateTime<Utc>,
}

/// Enabled two-factor state for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TwoFactorUser {
    secret: String,
    backup_codes: Vec<BackupCode>,
    enabled_at: DateTime<Utc>,
}

/// What the user needs to finish enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorSetupResponse {
    /// Base32 secret for manual entry
    pub secret: String,
    pub otpauth_url: String,
    /// `data:image/png;base64,...`
    pub qr_code_url: String,
    pub backup_codes: Vec<String>,
}

/// Uppercase and strip separators so `abcd-efgh` matches `ABCDEFGH`.
fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

fn hash_backup_code(code: &str) -> String {
    hash_token(&normalize_backup_code(code))
}

fn normalize_totp_code(code: &str) -> String {
    code.chars().filter(|c| !c.is_whitespace()).collect()
}

pub struct TwoFactorService<S: CounterStore + ?Sized> {
    store: Arc<S>,
    config: TwoFactorConfig,
    audit: Arc<dyn AuditSink>,
}

impl<S: CounterStore + ?Sized> TwoFactorService<S> {
    pub fn new(store: Arc<S>, config: TwoFactorConfig) -> Self {
        Self {
            store,
            config,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &TwoFactorConfig {
        &self.config
    }

    fn totp(&self, secret: Vec<u8>, account_name: &str) -> Result<TOTP, Error> {
        TOTP::new(
            Algorithm::SHA1,
            self.config.digits,
            self.config.skew,
            self.config.step,
            secret,
            Some(self.config.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|e| CryptoError::Totp(e.to_string()).into())
    }

    fn check_totp(&self, secret: &str, code: &str, now: DateTime<Utc>) -> Result<bool, Error> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| format!("{e:?}"))
            .map_malformed_err("2fa secret")?;
        let totp = self.totp(bytes, "user")?;
        let code = normalize_totp_code(code);
        Ok(totp.check(&code, now.timestamp().max(0) as u64))
    }

    fn generate_backup_codes(&self) -> (Vec<String>, Vec<BackupCode>) {
        let mut codes = HashSet::new();
        while codes.len() < self.config.backup_code_count {
            let code: String = random_bytes(self.config.backup_code_length)
                .into_iter()
                .map(|b| BACKUP_CODE_ALPHABET[(b & 31) as usize] as char)
                .collect();
            codes.insert(code);
        }
        let plaintext: Vec<String> = codes.into_iter().collect();
        let stored = plaintext
            .iter()
            .map(|code| BackupCode {
                code_hash: hash_backup_code(code),
                used: false,
                used_at: None,
            })
            .collect();
        (plaintext, stored)
    }

    async fn load_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_malformed_err(key)?)),
            None => Ok(None),
        }
    }

    async fn load_user(&self, user_id: &UserId) -> Result<Option<TwoFactorUser>, Error> {
        self.load_json(&keys::two_factor_user(user_id.as_str())).await
    }

    async fn save_user(&self, user_id: &UserId, record: &TwoFactorUser) -> Result<(), Error> {
        let json = serde_json::to_string(record).map_malformed_err("2fa_user")?;
        self.store
            .set(&keys::two_factor_user(user_id.as_str()), &json, None)
            .await
    }

    async fn audit(&self, event_type: AuditEventType, user_id: &UserId, details: serde_json::Value) {
        let severity = match event_type {
            AuditEventType::TwoFactorDisabled => AuditSeverity::Warning,
            _ => AuditSeverity::Info,
        };
        record_audit(
            self.audit.as_ref(),
            AuditEvent::new(event_type, severity)
                .actor(Some(user_id.clone()))
                .details(details),
        )
        .await;
    }

    /// Start enrollment for a user.
    ///
    /// Replaces any pending setup. The enabled state is not touched.
    ///
    /// # Errors
    ///
    /// `TwoFactorError::AlreadyEnabled` if two-factor is already on.
    pub async fn setup_two_factor(
        &self,
        user_id: &UserId,
        account_name: &str,
    ) -> Result<TwoFactorSetupResponse, Error> {
        if self.is_enabled(user_id).await? {
            return Err(TwoFactorError::AlreadyEnabled.into());
        }

        let totp = self.totp(random_bytes(SECRET_BYTES), account_name)?;
        let secret = totp.get_secret_base32();
        let otpauth_url = totp.get_url();
        let qr = totp.get_qr_base64().map_err(CryptoError::Totp)?;
        let (backup_codes, stored_codes) = self.generate_backup_codes();

        let setup = TwoFactorSetup {
            secret: secret.clone(),
            backup_codes: stored_codes,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&setup).map_malformed_err("2fa_setup")?;
        self.store
            .set(
                &keys::two_factor_setup(user_id.as_str()),
                &json,
                Some(self.config.setup_ttl),
            )
            .await?;

        tracing::debug!(user_id = %user_id, "Two-factor setup started");
        Ok(TwoFactorSetupResponse {
            secret,
            otpauth_url,
            qr_code_url: format!("data:image/png;base64,{qr}"),
            backup_codes,
        })
    }

    /// Finish enrollment with a code from the authenticator app.
    pub async fn verify_and_enable(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        self.verify_and_enable_at(user_id, code, Utc::now()).await
    }

    pub async fn verify_and_enable_at(
        &self,
        user_id: &UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let setup_key = keys::two_factor_setup(user_id.as_str());
        let setup: TwoFactorSetup = self
            .load_json(&setup_key)
            .await?
            .ok_or(TwoFactorError::NotSetUp)?;

        if now - setup.created_at > self.config.setup_ttl {
            self.store.delete(&setup_key).await?;
            return Err(TwoFactorError::SetupExpired.into());
        }
        if !self.check_totp(&setup.secret, code, now)? {
            return Err(TwoFactorError::InvalidCode.into());
        }

        self.store.delete(&setup_key).await?;
        self.save_user(
            user_id,
            &TwoFactorUser {
                secret: setup.secret,
                backup_codes: setup.backup_codes,
                enabled_at: now,
            },
        )
        .await?;

        tracing::info!(user_id = %user_id, "Two-factor authentication enabled");
        self.audit(
            AuditEventType::TwoFactorEnabled,
            user_id,
            serde_json::Value::Null,
        )
        .await;
        Ok(())
    }

    /// Second-factor check during login.
    ///
    /// Tries `code` as a TOTP code first, then as an unused backup code. Both
    /// paths fail with the same error.
    pub async fn verify_two_factor(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        self.verify_two_factor_at(user_id, code, Utc::now()).await
    }

    pub async fn verify_two_factor_at(
        &self,
        user_id: &UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut record = self
            .load_user(user_id)
            .await?
            .ok_or(TwoFactorError::NotEnabled)?;

        if self.check_totp(&record.secret, code, now)? {
            return Ok(());
        }

        let candidate = hash_backup_code(code);
        let Some(backup) = record.backup_codes.iter_mut().find(|b| {
            !b.used && constant_time_compare(b.code_hash.as_bytes(), candidate.as_bytes())
        }) else {
            return Err(TwoFactorError::InvalidTokenOrBackupCode.into());
        };

        backup.used = true;
        backup.used_at = Some(now);
        let remaining = record.backup_codes.iter().filter(|b| !b.used).count();
        self.save_user(user_id, &record).await?;

        tracing::info!(user_id = %user_id, remaining, "Backup code used");
        self.audit(
            AuditEventType::BackupCodeUsed,
            user_id,
            serde_json::json!({ "remaining_backup_codes": remaining }),
        )
        .await;
        Ok(())
    }

    /// Turn two-factor off. Only a TOTP code is accepted; backup codes are
    /// rejected.
    pub async fn disable_two_factor(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        self.disable_two_factor_at(user_id, code, Utc::now()).await
    }

    pub async fn disable_two_factor_at(
        &self,
        user_id: &UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let record = self
            .load_user(user_id)
            .await?
            .ok_or(TwoFactorError::NotEnabled)?;

        if !self.check_totp(&record.secret, code, now)? {
            return Err(TwoFactorError::InvalidCode.into());
        }

        self.store
            .delete(&keys::two_factor_user(user_id.as_str()))
            .await?;
        self.store
            .delete(&keys::two_factor_setup(user_id.as_str()))
            .await?;

        tracing::info!(user_id = %user_id, "Two-factor authentication disabled");
        self.audit(
            AuditEventType::TwoFactorDisabled,
            user_id,
            serde_json::Value::Null,
        )
        .await;
        Ok(())
    }

    pub async fn is_enabled(&self, user_id: &UserId) -> Result<bool, Error> {
        Ok(self.load_user(user_id).await?.is_some())
    }

    /// Replace all backup codes. Requires a valid TOTP code.
    pub async fn generate_new_backup_codes(
        &self,
        user_id: &UserId,
        code: &str,
    ) -> Result<Vec<String>, Error> {
        self.generate_new_backup_codes_at(user_id, code, Utc::now())
            .await
    }

    pub async fn generate_new_backup_codes_at(
        &self,
        user_id: &UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, Error> {
        let mut record = self
            .load_user(user_id)
            .await?
            .ok_or(TwoFactorError::NotEnabled)?;

        if !self.check_totp(&record.secret, code, now)? {
            return Err(TwoFactorError::InvalidCode.into());
        }

        let (plaintext, stored) = self.generate_backup_codes();
        record.backup_codes = stored;
        self.save_user(user_id, &record).await?;

        self.audit(
            AuditEventType::BackupCodesRegenerated,
            user_id,
            serde_json::json!({ "count": plaintext.len() }),
        )
        .await;
        Ok(plaintext)
    }

    /// Unused backup codes left.
    pub async fn remaining_backup_codes(&self, user_id: &UserId) -> Result<usize, Error> {
        let record = self
            .load_user(user_id)
            .await?
            .ok_or(TwoFactorError::NotEnabled)?;
        Ok(record.backup_codes.iter().filter(|b| !b.used).count())
    }
}

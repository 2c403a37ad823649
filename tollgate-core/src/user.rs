//! User records as seen by the security services
//!
//! The relational user store is owned by the host application. The services
//! only need a narrow view of it:
//!
//! | Field                 | Type               | Description                                        |
//! | --------------------- | ------------------ | -------------------------------------------------- |
//! | `id`                  | `UserId`           | The unique identifier for the user.                |
//! | `email`               | `String`           | The email of the user.                             |
//! | `first_name`          | `Option<String>`   | Given name, used by the password user-info rule.   |
//! | `last_name`           | `Option<String>`   | Family name, used by the password user-info rule.  |
//! | `status`              | `UserStatus`       | Active, suspended (locked out) or disabled.        |
//! | `password_hash`       | `Option<String>`   | The current password hash.                         |
//! | `password_updated_at` | `Option<DateTime>` | When the password was last changed.                |
//! | `last_login_at`       | `Option<DateTime>` | When the user last logged in successfully.         |
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unique, stable identifier for a specific user
/// This value should be treated as opaque
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: &str) -> Self {
        UserId(id.to_string())
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted account status.
///
/// `Suspended` is set by the lockout engine while an account is locked and
/// reverted to `Active` when the lockout ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            "disabled" => Ok(UserStatus::Disabled),
            other => Err(format!("unknown user status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: UserStatus,
    pub password_hash: Option<String>,
    pub password_updated_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn is_suspended(&self) -> bool {
        self.status == UserStatus::Suspended
    }

    /// The fields the password user-info rule compares against.
    pub fn user_info(&self) -> crate::validation::UserInfo {
        crate::validation::UserInfo {
            email: Some(self.email.clone()),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

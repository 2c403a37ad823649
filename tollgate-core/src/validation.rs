//! Password policy and strength estimation
//!
//! This module is the single source of truth for what an acceptable password
//! looks like. [`validate_password`] checks a candidate against a
//! [`PasswordPolicy`] and always returns a strength estimate alongside the
//! violations, so callers can render feedback even for accepted passwords.
//!
//! "Meets requirements" depends only on the policy rules; the numeric score is
//! advisory.

use serde::{Deserialize, Serialize};

/// Static password policy.
///
/// The defaults are the policy applied to every account unless a caller passes
/// an override for a single validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// Longest allowed run of one repeated character.
    pub max_repeated_chars: usize,
    pub forbid_common_passwords: bool,
    pub forbid_user_info: bool,
    /// Number of previous passwords that cannot be reused.
    pub history_length: usize,
    pub expiration_days: i64,
    pub warning_days: i64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            max_repeated_chars: 2,
            forbid_common_passwords: true,
            forbid_user_info: true,
            history_length: 5,
            expiration_days: 90,
            warning_days: 14,
        }
    }
}

/// A single failed policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PolicyViolation {
    TooShort { min: usize },
    TooLong { max: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecial,
    RepeatingCharacters { max: usize },
    TooCommon,
    ContainsUserInfo,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TooShort { min } => {
                write!(f, "Password must be at least {min} characters long")
            }
            PolicyViolation::TooLong { max } => {
                write!(f, "Password must be no more than {max} characters long")
            }
            PolicyViolation::MissingUppercase => {
                f.write_str("Password must contain at least one uppercase letter")
            }
            PolicyViolation::MissingLowercase => {
                f.write_str("Password must contain at least one lowercase letter")
            }
            PolicyViolation::MissingDigit => f.write_str("Password must contain at least one number"),
            PolicyViolation::MissingSpecial => {
                f.write_str("Password must contain at least one special character")
            }
            PolicyViolation::RepeatingCharacters { max } => write!(
                f,
                "Password cannot repeat the same character more than {max} times in a row"
            ),
            PolicyViolation::TooCommon => f.write_str("Password is too common"),
            PolicyViolation::ContainsUserInfo => {
                f.write_str("Password cannot contain your name or email address")
            }
        }
    }
}

/// Personal data a password must not contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserInfo {
    /// Lowercased fragments to search for. Fragments shorter than three
    /// characters are skipped.
    fn fragments(&self) -> Vec<String> {
        let mut fragments = Vec::new();
        if let Some(email) = &self.email {
            let email = email.to_lowercase();
            if let Some((local, _)) = email.split_once('@') {
                fragments.push(local.to_string());
            }
            fragments.push(email);
        }
        fragments.extend(self.first_name.iter().map(|n| n.to_lowercase()));
        fragments.extend(self.last_name.iter().map(|n| n.to_lowercase()));
        fragments.retain(|f| f.trim().chars().count() >= 3);
        fragments
    }

    fn is_contained_in(&self, password: &str) -> bool {
        let password = password.to_lowercase();
        self.fragments()
            .iter()
            .any(|fragment| password.contains(fragment.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthLevel {
    VeryWeak,
    Weak,
    Fair,
    Good,
    Strong,
}

impl StrengthLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..30 => StrengthLevel::VeryWeak,
            30..50 => StrengthLevel::Weak,
            50..70 => StrengthLevel::Fair,
            70..85 => StrengthLevel::Good,
            _ => StrengthLevel::Strong,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrengthLevel::VeryWeak => "very_weak",
            StrengthLevel::Weak => "weak",
            StrengthLevel::Fair => "fair",
            StrengthLevel::Good => "good",
            StrengthLevel::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthResult {
    /// 0 to 100
    pub score: u8,
    pub level: StrengthLevel,
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordValidation {
    pub is_valid: bool,
    pub violations: Vec<PolicyViolation>,
    pub strength: StrengthResult,
}

/// Characters counted as "special" when building passwords.
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()-_=+[]{};:,.<>?/~";

/// Frequently used passwords, compared case-insensitively against the whole password.
static COMMON_PASSWORDS: &[&str] = &[
    "123456",
    "123456789",
    "12345678",
    "12345",
    "1234567",
    "1234567890",
    "111111",
    "000000",
    "123123",
    "654321",
    "666666",
    "121212",
    "password",
    "password1",
    "password123",
    "password1234",
    "passw0rd",
    "p@ssw0rd",
    "p@ssword",
    "p@ssword123",
    "qwerty",
    "qwerty123",
    "qwertyuiop",
    "1q2w3e4r",
    "1qaz2wsx",
    "zaq12wsx",
    "asdfghjkl",
    "abc123",
    "abcd1234",
    "iloveyou",
    "admin",
    "admin123",
    "administrator",
    "welcome",
    "welcome1",
    "welcome123",
    "letmein",
    "monkey",
    "dragon",
    "football",
    "baseball",
    "superman",
    "batman",
    "trustno1",
    "sunshine",
    "princess",
    "master",
    "shadow",
    "michael",
    "jennifer",
    "hello123",
    "freedom",
    "whatever",
    "changeme",
    "secret",
    "login",
    "starwars",
    "computer",
    "internet",
    "summer2024",
    "winter2024",
    "spring2024",
    "autumn2024",
    "money",
    "finance",
    "banking",
    "budget",
    "password!",
    "password123!",
    "qwerty123!",
    "changeme123",
    "letmein123",
    "welcome123!",
    "p@ssw0rd123",
    "p@ssw0rd!",
    "passwordpassword",
    "correcthorsebatterystaple",
];

/// Whether `password` is on the built-in common password list.
pub fn is_common_password(password: &str) -> bool {
    let lowered = password.to_lowercase();
    COMMON_PASSWORDS.iter().any(|common| *common == lowered)
}

fn is_special(c: char) -> bool {
    !c.is_alphanumeric()
}

/// Length of the longest run of one repeated character.
pub(crate) fn longest_run(password: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in password.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

#[derive(Debug, Default, Clone, Copy)]
struct CharacterClasses {
    uppercase: bool,
    lowercase: bool,
    digit: bool,
    special: bool,
}

impl CharacterClasses {
    fn of(password: &str) -> Self {
        let mut classes = Self::default();
        for c in password.chars() {
            if c.is_uppercase() {
                classes.uppercase = true;
            } else if c.is_lowercase() {
                classes.lowercase = true;
            } else if c.is_numeric() {
                classes.digit = true;
            } else if is_special(c) {
                classes.special = true;
            }
        }
        classes
    }

    fn count(&self) -> u32 {
        [self.uppercase, self.lowercase, self.digit, self.special]
            .iter()
            .filter(|present| **present)
            .count() as u32
    }

    fn pool_size(&self) -> u32 {
        let mut pool = 0;
        if self.lowercase {
            pool += 26;
        }
        if self.uppercase {
            pool += 26;
        }
        if self.digit {
            pool += 10;
        }
        if self.special {
            pool += 32;
        }
        pool
    }
}

/// Estimate the strength of a password on a 0 to 100 scale.
///
/// The score adds a length bonus, character-class diversity and a capped
/// entropy estimate, then subtracts penalties for common passwords, repeated
/// character runs and embedded personal data.
pub fn estimate_strength(password: &str, user_info: Option<&UserInfo>) -> StrengthResult {
    let length = password.chars().count();
    let classes = CharacterClasses::of(password);
    let mut feedback = Vec::new();

    let length_bonus = (length as f64 * 1.5).min(30.0);
    let class_bonus = (classes.count() * 10).min(40) as f64;

    let pool = classes.pool_size().max(1) as f64;
    let entropy_bits = length as f64 * pool.log2();
    let entropy_bonus = (entropy_bits / 4.0).min(30.0);

    let mut score = length_bonus + class_bonus + entropy_bonus;

    if is_common_password(password) {
        score -= 60.0;
        feedback.push("Avoid commonly used passwords".to_string());
    }
    if longest_run(password) > 2 {
        score -= 15.0;
        feedback.push("Avoid repeating the same character".to_string());
    }
    if user_info.is_some_and(|info| info.is_contained_in(password)) {
        score -= 25.0;
        feedback.push("Avoid using your name or email address".to_string());
    }
    if length < 12 {
        feedback.push("Use at least 12 characters".to_string());
    }
    if classes.count() < 4 {
        feedback.push("Mix uppercase, lowercase, numbers and symbols".to_string());
    }

    let score = score.clamp(0.0, 100.0).round() as u8;
    StrengthResult {
        score,
        level: StrengthLevel::from_score(score),
        feedback,
    }
}

/// Validate a password against a policy.
///
/// # Arguments
///
/// * `password` - The candidate password
/// * `user_info` - Personal data the password must not contain, if known
/// * `policy` - The policy to enforce
///
/// # Examples
///
/// ```rust
/// use tollgate_core::validation::{PasswordPolicy, PolicyViolation, validate_password};
///
/// let result = validate_password("password", None, &PasswordPolicy::default());
/// assert!(!result.is_valid);
/// assert!(result.violations.contains(&PolicyViolation::TooCommon));
/// ```
pub fn validate_password(
    password: &str,
    user_info: Option<&UserInfo>,
    policy: &PasswordPolicy,
) -> PasswordValidation {
    let mut violations = Vec::new();
    let length = password.chars().count();
    let classes = CharacterClasses::of(password);

    if length < policy.min_length {
        violations.push(PolicyViolation::TooShort {
            min: policy.min_length,
        });
    }
    if length > policy.max_length {
        violations.push(PolicyViolation::TooLong {
            max: policy.max_length,
        });
    }
    if policy.require_uppercase && !classes.uppercase {
        violations.push(PolicyViolation::MissingUppercase);
    }
    if policy.require_lowercase && !classes.lowercase {
        violations.push(PolicyViolation::MissingLowercase);
    }
    if policy.require_digit && !classes.digit {
        violations.push(PolicyViolation::MissingDigit);
    }
    if policy.require_special && !classes.special {
        violations.push(PolicyViolation::MissingSpecial);
    }
    if policy.max_repeated_chars > 0 && longest_run(password) > policy.max_repeated_chars {
        violations.push(PolicyViolation::RepeatingCharacters {
            max: policy.max_repeated_chars,
        });
    }
    if policy.forbid_common_passwords && is_common_password(password) {
        violations.push(PolicyViolation::TooCommon);
    }
    if policy.forbid_user_info && user_info.is_some_and(|info| info.is_contained_in(password)) {
        violations.push(PolicyViolation::ContainsUserInfo);
    }

    PasswordValidation {
        is_valid: violations.is_empty(),
        violations,
        strength: estimate_strength(password, user_info),
    }
}

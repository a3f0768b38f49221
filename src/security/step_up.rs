//! Step-up authentication: supplementary challenges for untrusted devices.
//!
//! Methods live in a per-user registry, one tagged payload per kind,
//! exhaustively matched at verification time. Wrong answers are `Ok(false)`;
//! only a missing or unconfigured method is an error. Recovery codes are
//! single-use: a successful verification removes the code from the stored
//! list.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use utoipa::ToSchema;

use super::mail::Mailer;
use crate::store::{KeyValueStore, StoreError};

const RECOVERY_CODE_COUNT: usize = 10;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const EMAIL_CODE_BYTES: usize = 32;

fn methods_key(user_id: &str) -> String {
    format!("step_up:methods:{user_id}")
}

fn email_code_key(user_id: &str) -> String {
    format!("step_up:email:{user_id}")
}

/// Supported step-up method kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Totp,
    Recovery,
    Questions,
    Email,
}

impl MethodKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Recovery => "recovery",
            Self::Questions => "questions",
            Self::Email => "email",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "totp" => Some(Self::Totp),
            "recovery" => Some(Self::Recovery),
            "questions" => Some(Self::Questions),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured security question with its expected answer.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SecurityQuestion {
    pub question: String,
    pub answer: String,
}

/// One payload shape per method kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodPayload {
    Totp { secret: String },
    Recovery { codes: Vec<String> },
    Questions { entries: Vec<SecurityQuestion> },
    Email { address: String },
}

/// Stored registry entry for one method.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodRecord {
    pub enabled: bool,
    pub payload: MethodPayload,
    pub last_used: Option<DateTime<Utc>>,
}

/// Setup data returned when enrolling a one-time-code generator.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct TotpSetup {
    pub secret: String,
    pub uri: String,
}

#[derive(Debug, Error)]
pub enum StepUpError {
    #[error("step-up method `{0}` is not configured")]
    NotConfigured(MethodKind),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid step-up method payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("one-time code generator error: {0}")]
    Totp(String),
    #[error("failed to dispatch challenge email: {0}")]
    Mail(String),
}

#[derive(Clone)]
pub struct StepUpOrchestrator {
    store: Arc<dyn KeyValueStore>,
    mailer: Arc<dyn Mailer>,
    issuer: String,
    email_code_ttl_seconds: u64,
}

impl StepUpOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        mailer: Arc<dyn Mailer>,
        issuer: String,
        email_code_ttl_seconds: u64,
    ) -> Self {
        Self {
            store,
            mailer,
            issuer,
            email_code_ttl_seconds,
        }
    }

    /// Kinds the user has enabled, in stable order.
    pub async fn available_methods(&self, user_id: &str) -> Result<Vec<MethodKind>, StepUpError> {
        let entries = self.store.hgetall(&methods_key(user_id)).await?;
        let mut kinds = Vec::new();
        for (field, raw) in entries {
            let Some(kind) = MethodKind::from_str(&field) else {
                continue;
            };
            let record: MethodRecord = serde_json::from_str(&raw)?;
            if record.enabled {
                kinds.push(kind);
            }
        }
        kinds.sort();
        Ok(kinds)
    }

    /// Enroll a TOTP generator; returns the secret and provisioning URI for
    /// the authenticator app.
    pub async fn setup_totp(&self, user_id: &str) -> Result<TotpSetup, StepUpError> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|err| StepUpError::Totp(format!("secret generation failed: {err:?}")))?;
        let totp = self.totp_from_bytes(secret_bytes, user_id)?;

        let secret_base32 = totp.get_secret_base32();
        let uri = totp.get_url();

        self.save_method(
            user_id,
            MethodKind::Totp,
            &MethodRecord {
                enabled: true,
                payload: MethodPayload::Totp {
                    secret: secret_base32.clone(),
                },
                last_used: None,
            },
        )
        .await?;

        Ok(TotpSetup {
            secret: secret_base32,
            uri,
        })
    }

    /// Verify a one-time code within the generator's standard time-step
    /// tolerance.
    pub async fn verify_totp(&self, user_id: &str, code: &str) -> Result<bool, StepUpError> {
        let mut record = self.load_method(user_id, MethodKind::Totp).await?;
        let MethodPayload::Totp { secret } = &record.payload else {
            return Err(StepUpError::NotConfigured(MethodKind::Totp));
        };

        let secret_bytes = Secret::Encoded(secret.clone())
            .to_bytes()
            .map_err(|err| StepUpError::Totp(format!("stored secret invalid: {err:?}")))?;
        let totp = self.totp_from_bytes(secret_bytes, user_id)?;
        let valid = totp.check_current(code).unwrap_or(false);

        if valid {
            record.last_used = Some(Utc::now());
            self.save_method(user_id, MethodKind::Totp, &record).await?;
        }
        Ok(valid)
    }

    /// Generate a fresh batch of single-use recovery codes, replacing any
    /// previous batch. Returns the codes in display form.
    pub async fn setup_recovery_codes(&self, user_id: &str) -> Result<Vec<String>, StepUpError> {
        let mut formatted = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut stored = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let code = generate_recovery_code();
            stored.push(normalize_recovery_code(&code));
            formatted.push(code);
        }

        self.save_method(
            user_id,
            MethodKind::Recovery,
            &MethodRecord {
                enabled: true,
                payload: MethodPayload::Recovery { codes: stored },
                last_used: None,
            },
        )
        .await?;

        Ok(formatted)
    }

    /// Verify a recovery code. A matching code is removed from the stored
    /// list, so each code succeeds exactly once.
    pub async fn verify_recovery_code(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<bool, StepUpError> {
        let mut record = self.load_method(user_id, MethodKind::Recovery).await?;
        let MethodPayload::Recovery { codes } = &mut record.payload else {
            return Err(StepUpError::NotConfigured(MethodKind::Recovery));
        };

        let normalized = normalize_recovery_code(code);
        let Some(position) = codes.iter().position(|stored| *stored == normalized) else {
            return Ok(false);
        };

        codes.remove(position);
        record.last_used = Some(Utc::now());
        self.save_method(user_id, MethodKind::Recovery, &record)
            .await?;
        Ok(true)
    }

    /// Store security questions with their expected answers.
    pub async fn setup_security_questions(
        &self,
        user_id: &str,
        entries: Vec<SecurityQuestion>,
    ) -> Result<(), StepUpError> {
        if entries.is_empty() {
            return Err(StepUpError::Invalid(
                "at least one security question is required".to_string(),
            ));
        }
        if entries
            .iter()
            .any(|entry| entry.question.trim().is_empty() || entry.answer.trim().is_empty())
        {
            return Err(StepUpError::Invalid(
                "questions and answers must not be empty".to_string(),
            ));
        }

        self.save_method(
            user_id,
            MethodKind::Questions,
            &MethodRecord {
                enabled: true,
                payload: MethodPayload::Questions { entries },
                last_used: None,
            },
        )
        .await
    }

    /// Verify answers pairwise against the stored questions: order-sensitive,
    /// case-insensitive, whitespace-trimmed, all-or-nothing.
    pub async fn verify_security_questions(
        &self,
        user_id: &str,
        answers: &[String],
    ) -> Result<bool, StepUpError> {
        let mut record = self.load_method(user_id, MethodKind::Questions).await?;
        let MethodPayload::Questions { entries } = &record.payload else {
            return Err(StepUpError::NotConfigured(MethodKind::Questions));
        };

        if answers.len() != entries.len() {
            return Ok(false);
        }
        let valid = entries
            .iter()
            .zip(answers)
            .all(|(entry, answer)| answers_match(&entry.answer, answer));

        if valid {
            record.last_used = Some(Utc::now());
            self.save_method(user_id, MethodKind::Questions, &record)
                .await?;
        }
        Ok(valid)
    }

    /// Register the email method and dispatch a short-lived challenge code.
    pub async fn send_email_challenge(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<(), StepUpError> {
        if !valid_email(email) {
            return Err(StepUpError::Invalid("invalid email address".to_string()));
        }

        let code = generate_email_code();
        self.store
            .set_ex(&email_code_key(user_id), &code, self.email_code_ttl_seconds)
            .await?;

        self.save_method(
            user_id,
            MethodKind::Email,
            &MethodRecord {
                enabled: true,
                payload: MethodPayload::Email {
                    address: email.to_string(),
                },
                last_used: None,
            },
        )
        .await?;

        self.mailer
            .send_challenge(email, &code)
            .await
            .map_err(|err| StepUpError::Mail(err.to_string()))
    }

    /// Verify an email challenge code; valid only until its TTL expires.
    pub async fn verify_email_code(&self, user_id: &str, code: &str) -> Result<bool, StepUpError> {
        let mut record = self.load_method(user_id, MethodKind::Email).await?;

        let Some(stored) = self.store.get(&email_code_key(user_id)).await? else {
            return Ok(false);
        };
        if !constant_time_eq(&stored, code) {
            return Ok(false);
        }

        record.last_used = Some(Utc::now());
        self.save_method(user_id, MethodKind::Email, &record).await?;
        Ok(true)
    }

    async fn load_method(
        &self,
        user_id: &str,
        kind: MethodKind,
    ) -> Result<MethodRecord, StepUpError> {
        let raw = self
            .store
            .hget(&methods_key(user_id), kind.as_str())
            .await?
            .ok_or(StepUpError::NotConfigured(kind))?;
        let record: MethodRecord = serde_json::from_str(&raw)?;
        if !record.enabled {
            return Err(StepUpError::NotConfigured(kind));
        }
        Ok(record)
    }

    async fn save_method(
        &self,
        user_id: &str,
        kind: MethodKind,
        record: &MethodRecord,
    ) -> Result<(), StepUpError> {
        let data = serde_json::to_string(record)?;
        self.store
            .hset(&methods_key(user_id), kind.as_str(), &data)
            .await?;
        Ok(())
    }

    fn totp_from_bytes(
        &self,
        secret_bytes: Vec<u8>,
        account: &str,
    ) -> Result<TOTP, StepUpError> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|err| StepUpError::Totp(err.to_string()))
    }
}

/// Strip separators and uppercase so display form and typed form compare
/// equal.
fn normalize_recovery_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

/// One grouped recovery code, e.g. `ABCD-EFGH-JKLM`.
fn generate_recovery_code() -> String {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    OsRng.fill_bytes(&mut raw);

    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, byte) in raw.iter().enumerate() {
        if idx > 0 && idx % RECOVERY_CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        let position = usize::from(*byte) % RECOVERY_CODE_ALPHABET.len();
        out.push(RECOVERY_CODE_ALPHABET[position] as char);
    }
    out
}

fn generate_email_code() -> String {
    let mut bytes = [0u8; EMAIL_CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn answers_match(expected: &str, given: &str) -> bool {
    expected.trim().to_lowercase() == given.trim().to_lowercase()
}

/// Compare via digests so timing does not leak the stored code.
fn constant_time_eq(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

impl StepUpError {
    /// Whether this error means the method was never set up.
    #[must_use]
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }
}

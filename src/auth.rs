use std::fmt;

use anyhow::{Context, Result};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::ApiError;

/// Re-logins allowed per request before an unauthorized reply is final.
pub const MAX_REAUTH_ATTEMPTS: u32 = 1;

/// Account credentials for basic-auth login.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies a second-factor code when login asks for one.
pub trait CodeProvider: Send + Sync {
    fn code(&self) -> Result<String, ApiError>;
}

/// Computes codes from a shared base32 secret (RFC 6238, SHA-1, 6 digits, 30 s).
pub struct TotpCodeProvider {
    totp: TOTP,
}

impl TotpCodeProvider {
    pub fn from_base32(secret: &str) -> Result<Self> {
        let normalized: String = secret
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let bytes = Secret::Encoded(normalized)
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("{e:?}"))
            .context("OTP secret is not valid base32")?;
        Ok(Self {
            totp: TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, bytes),
        })
    }

    /// Code for the 30-second window containing `unix_secs`.
    #[cfg(test)]
    fn code_at(&self, unix_secs: u64) -> String {
        self.totp.generate(unix_secs)
    }
}

impl CodeProvider for TotpCodeProvider {
    fn code(&self) -> Result<String, ApiError> {
        self.totp
            .generate_current()
            .map_err(|e| ApiError::SecondFactorCode(e.to_string()))
    }
}

/// Asks on the terminal with hidden input. Only for interactive setup.
pub struct PromptCodeProvider;

impl CodeProvider for PromptCodeProvider {
    fn code(&self) -> Result<String, ApiError> {
        let code = rpassword::prompt_password("Enter 2FA code: ")
            .map_err(|e| ApiError::SecondFactorCode(e.to_string()))?;
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(ApiError::SecondFactorCode("empty code".to_string()));
        }
        Ok(code)
    }
}

/// A code known up front, e.g. passed on the command line.
pub struct FixedCode(pub String);

impl CodeProvider for FixedCode {
    fn code(&self) -> Result<String, ApiError> {
        Ok(self.0.clone())
    }
}

/// Second factor demanded by a login reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondFactor {
    NotRequired,
    Totp,
    Unsupported(Vec<String>),
}

impl SecondFactor {
    /// Interpret the `requiresTwoFactorAuth` list. `totp` wins when several methods are offered.
    pub fn from_methods(methods: &[String]) -> Self {
        if methods.is_empty() {
            SecondFactor::NotRequired
        } else if methods.iter().any(|m| m == "totp") {
            SecondFactor::Totp
        } else {
            SecondFactor::Unsupported(methods.to_vec())
        }
    }
}

/// Counts re-authentications left for a single request.
#[derive(Debug)]
pub struct ReauthBudget {
    remaining: u32,
}

impl ReauthBudget {
    pub fn new(attempts: u32) -> Self {
        Self {
            remaining: attempts,
        }
    }

    /// Take one attempt, or fail with `Unauthorized` once none are left.
    pub fn spend(&mut self) -> Result<(), ApiError> {
        if self.remaining == 0 {
            return Err(ApiError::Unauthorized);
        }
        self.remaining -= 1;
        Ok(())
    }
}

impl Default for ReauthBudget {
    fn default() -> Self {
        Self::new(MAX_REAUTH_ATTEMPTS)
    }
}

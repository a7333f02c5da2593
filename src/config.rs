use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, TimeDelta};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::{HOT_WORLD_COOLDOWN_DAYS, HOT_WORLD_PICKS, RotationPolicy};
use crate::session::SESSION_RETENTION_DAYS;
use crate::state::INSTANCE_RETENTION_DAYS;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Upper bound for every day-count setting.
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Tag filter used when searching for hot worlds.
pub const DEFAULT_HOT_WORLD_TAG: &str = "system_approved,system_published_recently";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub vrchat: VrchatConfig,
    pub cache: CacheConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// Account and group on the source API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrchatConfig {
    pub username: String,
    /// May be left empty for `setup-account`, which then prompts for it.
    #[serde(default)]
    pub password: String,
    pub user_agent: String,
    pub group_id: String,
    /// Base32 TOTP secret. Without it, only a saved session can be used.
    #[serde(default)]
    pub otp_secret: Option<String>,
}

impl VrchatConfig {
    /// The OTP secret, treating an empty value as unset.
    pub fn otp_secret(&self) -> Option<&str> {
        self.otp_secret.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Upstash Redis REST endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub rest_url: String,
    pub rest_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: String,
    /// Corner image added to instance announcements.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_hot_world_picks")]
    pub hot_world_picks: usize,
    #[serde(default = "default_hot_world_cooldown_days")]
    pub hot_world_cooldown_days: i64,
    #[serde(default = "default_hot_world_tag")]
    pub hot_world_tag: String,
    #[serde(default = "default_instance_retention_days")]
    pub instance_retention_days: i64,
    #[serde(default = "default_session_retention_days")]
    pub session_retention_days: i64,
    /// Offset publish dates are displayed in.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

fn default_hot_world_picks() -> usize {
    HOT_WORLD_PICKS
}

fn default_hot_world_cooldown_days() -> i64 {
    HOT_WORLD_COOLDOWN_DAYS
}

fn default_hot_world_tag() -> String {
    DEFAULT_HOT_WORLD_TAG.to_string()
}

fn default_instance_retention_days() -> i64 {
    INSTANCE_RETENTION_DAYS
}

fn default_session_retention_days() -> i64 {
    SESSION_RETENTION_DAYS
}

fn default_utc_offset_hours() -> i32 {
    9
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            hot_world_picks: default_hot_world_picks(),
            hot_world_cooldown_days: default_hot_world_cooldown_days(),
            hot_world_tag: default_hot_world_tag(),
            instance_retention_days: default_instance_retention_days(),
            session_retention_days: default_session_retention_days(),
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

fn window(name: &str, days: i64) -> Result<TimeDelta> {
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        bail!("settings.{name} must be between 1 and {MAX_WINDOW_DAYS}, got {days}");
    }
    TimeDelta::try_days(days).with_context(|| format!("settings.{name} is out of range"))
}

impl SettingsConfig {
    pub fn rotation_policy(&self) -> Result<RotationPolicy> {
        Ok(RotationPolicy {
            picks: self.hot_world_picks,
            cooldown: window("hot_world_cooldown_days", self.hot_world_cooldown_days)?,
        })
    }

    pub fn instance_retention(&self) -> Result<TimeDelta> {
        window("instance_retention_days", self.instance_retention_days)
    }

    pub fn session_retention(&self) -> Result<TimeDelta> {
        window("session_retention_days", self.session_retention_days)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .with_context(|| format!("utc_offset_hours {} is out of range", self.utc_offset_hours))
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise build the config from the environment.
    pub fn resolve(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Self::from_env()
        }
    }

    /// Read config from environment variables, loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from a variable lookup. Settings always take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key).with_context(|| format!("environment variable {key} is not set"))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            vrchat: VrchatConfig {
                username: required("VRC_USERNAME")?,
                password: required("VRC_PASSWORD")?,
                user_agent: required("VRC_USER_AGENT")?,
                group_id: required("VRC_GROUP_ID")?,
                otp_secret: optional("OTP_SECRET"),
            },
            cache: CacheConfig {
                rest_url: required("UPSTASH_REDIS_REST_URL")?,
                rest_token: required("UPSTASH_REDIS_REST_TOKEN")?,
            },
            discord: DiscordConfig {
                webhook_url: required("DISCORD_WEBHOOK_URL")?,
                thumbnail_url: optional("THUMBNAIL_URL"),
            },
            settings: SettingsConfig::default(),
        })
    }

    /// Reject configs that would only fail later, mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.vrchat.username.trim().is_empty() {
            bail!("vrchat.username must not be empty");
        }
        if self.vrchat.user_agent.trim().is_empty() {
            bail!("vrchat.user_agent must not be empty");
        }
        if self.vrchat.group_id.trim().is_empty() {
            bail!("vrchat.group_id must not be empty");
        }
        Url::parse(&self.cache.rest_url).context("cache.rest_url is not a valid URL")?;
        Url::parse(&self.discord.webhook_url).context("discord.webhook_url is not a valid URL")?;
        if let Some(thumbnail) = &self.discord.thumbnail_url {
            Url::parse(thumbnail).context("discord.thumbnail_url is not a valid URL")?;
        }

        let s = &self.settings;
        s.rotation_policy()?;
        s.instance_retention()?;
        s.session_retention()?;
        s.utc_offset()?;
        Ok(())
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[vrchat]
username = "alice"
password = "secret"
user_agent = "vrchan/0.1 alice@example.com"
group_id = "grp_123"

[cache]
rest_url = "https://example.upstash.io"
rest_token = "token"

[discord]
webhook_url = "https://discord.com/api/webhooks/1/abc"
"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.vrchat.otp_secret(), None);
        assert_eq!(config.settings.hot_world_picks, 3);
        assert_eq!(config.settings.hot_world_cooldown_days, 30);
        assert_eq!(config.settings.instance_retention_days, 7);
        assert_eq!(config.settings.session_retention_days, 30);
        assert_eq!(config.settings.hot_world_tag, DEFAULT_HOT_WORLD_TAG);
        assert_eq!(
            config.settings.utc_offset().unwrap(),
            FixedOffset::east_opt(9 * 3600).unwrap()
        );
        assert_eq!(config.settings.rotation_policy().unwrap(), RotationPolicy::default());
        config.validate().unwrap();
    }

    #[test]
    fn settings_override() {
        let contents =
            format!("{MINIMAL}\n[settings]\nhot_world_picks = 5\nutc_offset_hours = 0\n");
        let config = AppConfig::parse(&contents).unwrap();
        assert_eq!(config.settings.hot_world_picks, 5);
        assert_eq!(config.settings.utc_offset_hours, 0);
        assert_eq!(config.settings.hot_world_cooldown_days, 30);
    }

    #[test]
    fn empty_otp_secret_is_unset() {
        let contents = MINIMAL.replace(
            "group_id = \"grp_123\"",
            "group_id = \"grp_123\"\notp_secret = \"\"",
        );
        let config = AppConfig::parse(&contents).unwrap();
        assert_eq!(config.vrchat.otp_secret.as_deref(), Some(""));
        assert_eq!(config.vrchat.otp_secret(), None);
    }

    #[test]
    fn validate_rejects_bad_webhook() {
        let mut config = AppConfig::parse(MINIMAL).unwrap();
        config.discord.webhook_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_offset() {
        let mut config = AppConfig::parse(MINIMAL).unwrap();
        config.settings.utc_offset_hours = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_windows() {
        let contents =
            format!("{MINIMAL}\n[settings]\nhot_world_cooldown_days = 9999999999999999\n");
        let config = AppConfig::parse(&contents).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hot_world_cooldown_days"));
        assert!(config.settings.rotation_policy().is_err());

        let mut config = AppConfig::parse(MINIMAL).unwrap();
        config.settings.instance_retention_days = MAX_WINDOW_DAYS + 1;
        assert!(config.validate().is_err());
        assert!(config.settings.instance_retention().is_err());

        let mut config = AppConfig::parse(MINIMAL).unwrap();
        config.settings.session_retention_days = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::parse(MINIMAL).unwrap();
        config.settings.session_retention_days = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::parse(MINIMAL).unwrap();
        config.settings.instance_retention_days = MAX_WINDOW_DAYS;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_overflowing_offset() {
        let mut config = AppConfig::parse(MINIMAL).unwrap();
        config.settings.utc_offset_hours = i32::MAX;
        assert!(config.validate().is_err());
        config.settings.utc_offset_hours = i32::MIN;
        assert!(config.settings.utc_offset().is_err());
        config.settings.utc_offset_hours = -9;
        config.validate().unwrap();
    }

    #[test]
    fn from_lookup_reads_env_names() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("VRC_USERNAME", "alice"),
            ("VRC_PASSWORD", "secret"),
            ("VRC_USER_AGENT", "ua"),
            ("VRC_GROUP_ID", "grp_1"),
            ("OTP_SECRET", "JBSWY3DPEHPK3PXP"),
            ("THUMBNAIL_URL", ""),
            ("UPSTASH_REDIS_REST_URL", "https://example.upstash.io"),
            ("UPSTASH_REDIS_REST_TOKEN", "t"),
            ("DISCORD_WEBHOOK_URL", "https://discord.com/api/webhooks/1/abc"),
        ]);
        let config =
            AppConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.vrchat.group_id, "grp_1");
        assert_eq!(config.vrchat.otp_secret.as_deref(), Some("JBSWY3DPEHPK3PXP"));
        assert_eq!(config.discord.thumbnail_url, None);
        config.validate().unwrap();
    }

    #[test]
    fn from_lookup_reports_missing_variable() {
        let err = AppConfig::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("VRC_USERNAME"));
    }
}

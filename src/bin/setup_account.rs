//! setup-account: first login for the notifier account.
//!
//! Logs in with the configured credentials, completing the second factor
//! interactively (hidden input) unless `--totp` or `--code` is given, and saves
//! the resulting session to the cache so scheduled runs start authenticated.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use vrchan::api::VrchatClient;
use vrchan::auth::{CodeProvider, Credentials, FixedCode, PromptCodeProvider, TotpCodeProvider};
use vrchan::cache::UpstashCache;
use vrchan::config::{AppConfig, CONFIG_PATH};
use vrchan::session;

#[derive(Parser)]
#[command(
    name = "setup-account",
    about = "Log in once, verify the second factor, and save the session to the cache"
)]
struct Cli {
    /// Config file; the environment (and `.env`) is used when it does not exist
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Compute the 2FA code from the configured OTP secret instead of prompting
    #[arg(long, conflicts_with = "code")]
    totp: bool,

    /// 2FA code to submit (for scripted use)
    #[arg(long)]
    code: Option<String>,

    /// Write a prompted password back into the config file
    #[arg(long)]
    save_password: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::resolve(&cli.config)?;

    println!("=== vrchan: Account Setup ===\n");

    // ── Step 1: Credentials ────────────────────────────────────────
    let mut prompted = false;
    if config.vrchat.password.trim().is_empty() {
        let password = rpassword::prompt_password(format!(
            "Password for {}: ",
            config.vrchat.username
        ))
        .context("failed to read password")?;
        if password.trim().is_empty() {
            bail!("password cannot be empty");
        }
        config.vrchat.password = password.trim().to_string();
        prompted = true;
    }
    config.validate()?;

    let codes: Box<dyn CodeProvider> = if let Some(code) = cli.code {
        Box::new(FixedCode(code))
    } else if cli.totp {
        let secret = config
            .vrchat
            .otp_secret()
            .context("--totp needs vrchat.otp_secret in the config")?;
        Box::new(TotpCodeProvider::from_base32(secret)?)
    } else {
        Box::new(PromptCodeProvider)
    };

    // ── Step 2: Log in ─────────────────────────────────────────────
    println!("Logging in as {}...", config.vrchat.username);
    let api = VrchatClient::new(
        Credentials {
            username: config.vrchat.username.clone(),
            password: config.vrchat.password.clone(),
        },
        &config.vrchat.user_agent,
        codes,
    )?;
    let mut session = api.login().await.context("login failed")?;
    let user = api
        .current_user(&mut session)
        .await
        .context("session check failed")?;
    let display_name = user
        .get("displayName")
        .and_then(|v| v.as_str())
        .unwrap_or("(unknown)");
    println!("  Logged in as {display_name}");
    println!();

    // ── Step 3: Save session ───────────────────────────────────────
    println!("Saving session to cache...");
    let cache = UpstashCache::new(&config.cache.rest_url, &config.cache.rest_token)?;
    session::persist(
        &cache,
        &config.vrchat.username,
        &session,
        config.settings.session_retention()?,
    )
    .await?;
    println!(
        "  Saved {} cookie(s) under {}",
        session.cookies().len(),
        session::session_key(&config.vrchat.username)
    );
    println!();

    // ── Step 4: Optionally store the password ──────────────────────
    if prompted && cli.save_password {
        if cli.config.exists() {
            config.save(&cli.config)?;
            println!("  Password saved to {}", cli.config.display());
        } else {
            println!("  {} does not exist; password not saved", cli.config.display());
        }
        println!();
    }

    println!("=== Setup Complete ===");
    println!();
    println!("Next steps:");
    println!("  cargo run --bin vrchan -- --stdout --job group-instances");

    Ok(())
}

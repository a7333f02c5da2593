use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use vrchan::api::VrchatClient;
use vrchan::auth::{CodeProvider, Credentials, TotpCodeProvider};
use vrchan::cache::UpstashCache;
use vrchan::config::{AppConfig, CONFIG_PATH};
use vrchan::error::ApiError;
use vrchan::jobs::{self, Job, RunSettings};
use vrchan::reporter::{DiscordWebhook, RenderOptions, Sink, StdoutReporter};

#[derive(Parser)]
#[command(name = "vrchan", about = "Announce new group instances and hot worlds to Discord")]
struct Args {
    /// Config file; the environment (and `.env`) is used when it does not exist
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Job to run (repeatable). Runs every job when omitted
    #[arg(long = "job", value_enum)]
    jobs: Vec<Job>,

    /// Print webhook payloads as JSON lines instead of posting them
    #[arg(long)]
    stdout: bool,
}

/// Used when no OTP secret is configured: a login that needs a code fails instead of blocking.
struct NoCodeProvider;

impl CodeProvider for NoCodeProvider {
    fn code(&self) -> Result<String, ApiError> {
        Err(ApiError::SecondFactorCode(
            "no otp_secret configured; run setup-account to save a session".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = AppConfig::resolve(&args.config)?;
    config.validate()?;
    info!("Loaded config for {}", config.vrchat.username);

    let jobs = if args.jobs.is_empty() {
        vec![Job::GroupInstances, Job::HotWorlds]
    } else {
        args.jobs.clone()
    };

    let codes: Box<dyn CodeProvider> = match config.vrchat.otp_secret() {
        Some(secret) => Box::new(TotpCodeProvider::from_base32(secret)?),
        None => {
            warn!("No OTP secret configured; relying on the saved session");
            Box::new(NoCodeProvider)
        }
    };
    let api = VrchatClient::new(
        Credentials {
            username: config.vrchat.username.clone(),
            password: config.vrchat.password.clone(),
        },
        &config.vrchat.user_agent,
        codes,
    )?;
    let cache = UpstashCache::new(&config.cache.rest_url, &config.cache.rest_token)?;

    let render = RenderOptions {
        utc_offset: config.settings.utc_offset()?,
        thumbnail_url: config.discord.thumbnail_url.clone(),
    };
    let sink = if args.stdout {
        Sink::Stdout(StdoutReporter::new(render))
    } else {
        Sink::Discord(DiscordWebhook::new(&config.discord.webhook_url, render)?)
    };

    let settings = RunSettings::from_config(&config)?;
    let jobs_desc: Vec<String> = jobs.iter().map(|j| j.to_string()).collect();
    info!(
        "Starting run: group={} jobs={} sink={}",
        settings.group_id,
        jobs_desc.join(","),
        if args.stdout { "stdout" } else { "discord" },
    );

    let report = jobs::run(&api, &cache, &sink, &settings, &jobs)
        .await
        .context("run could not load or save its session")?;

    for (job, outcome) in &report.outcomes {
        info!("{job}: {outcome:?}");
    }
    if let Some(failure) = &report.failure {
        warn!("Run ended early: {failure}");
    }

    Ok(())
}

//! Probe: dump raw API responses
//!
//! Prints what the group and world endpoints currently return, pretty-printed,
//! so changes in the upstream schema can be spotted. Reuses and refreshes the
//! saved session.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

use vrchan::api::VrchatClient;
use vrchan::auth::{CodeProvider, Credentials, PromptCodeProvider, TotpCodeProvider};
use vrchan::cache::UpstashCache;
use vrchan::config::{AppConfig, CONFIG_PATH};
use vrchan::session;
use vrchan::types::{WorldSearch, WorldSort};

#[derive(Parser)]
#[command(name = "probe-api", about = "Print raw VRChat API responses")]
struct Cli {
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    probe: Probe,
}

#[derive(Subcommand)]
enum Probe {
    /// Live instances of the configured group
    Instances,
    /// World search, defaulting to the hot-world query
    Worlds {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, value_parser = parse_sort)]
        sort: Option<WorldSort>,
        #[arg(long)]
        n: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// The configured group's announcement
    Announcement,
    /// The configured group's posts
    Posts {
        #[arg(long)]
        n: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
        #[arg(long)]
        public_only: bool,
    },
}

fn parse_sort(raw: &str) -> Result<WorldSort, String> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| format!("unknown sort '{raw}'"))
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

    let cli = Cli::parse();
    let config = AppConfig::resolve(&cli.config)?;
    config.validate()?;

    let codes: Box<dyn CodeProvider> = match config.vrchat.otp_secret() {
        Some(secret) => Box::new(TotpCodeProvider::from_base32(secret)?),
        None => Box::new(PromptCodeProvider),
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
    let mut session = session::restore(&cache, &config.vrchat.username).await?;
    let group_id = &config.vrchat.group_id;

    let result = match cli.probe {
        Probe::Instances => api.get_group_instances_raw(&mut session, group_id).await,
        Probe::Worlds {
            search,
            tag,
            sort,
            n,
            offset,
        } => {
            let query = if search.is_none() && tag.is_none() && sort.is_none() {
                WorldSearch {
                    n,
                    offset,
                    ..WorldSearch::hot(&config.settings.hot_world_tag)
                }
            } else {
                WorldSearch {
                    search,
                    n,
                    offset,
                    tag,
                    sort,
                }
            };
            api.search_world_raw(&mut session, &query).await
        }
        Probe::Announcement => api.get_group_announcement(&mut session, group_id).await,
        Probe::Posts {
            n,
            offset,
            public_only,
        } => {
            api.get_group_posts(&mut session, group_id, n, offset, public_only.then_some(true))
                .await
        }
    };

    session::persist(
        &cache,
        &config.vrchat.username,
        &session,
        config.settings.session_retention()?,
    )
    .await?;

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    if let Some(arr) = value.as_array() {
        eprintln!("{} item(s)", arr.len());
    }
    Ok(())
}

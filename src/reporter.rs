use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{Announcement, WorldCard};

/// Message header for a new group instance.
pub const INSTANCE_HEADER: &str = "グループインスタンス通知";

/// Message header for the hot-world pickup.
pub const HOT_WORLDS_HEADER: &str = "VRCおすすめワールドピックアップ";

const PUBLISHED_LABEL: &str = "ワールド公開日";
const PUBLISHED_FORMAT: &str = "%Y年%m月%d日";
const POPULARITY_LABEL: &str = ":fire: Popularity";
const FAVORITES_LABEL: &str = ":bookmark: Bookmarks";
const LAUNCH_LABEL: &str = "Launch Instance";

/// Delivers announcements somewhere humans will read them.
pub trait Notifier {
    fn announce(&self, announcement: &Announcement) -> impl Future<Output = Result<()>> + Send;
}

/// Discord webhook execute payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ActionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Component row (type 1) holding link buttons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRow {
    #[serde(rename = "type")]
    pub kind: u8,
    pub components: Vec<LinkButton>,
}

/// Button component (type 2) with link style (5).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkButton {
    #[serde(rename = "type")]
    pub kind: u8,
    pub style: u8,
    pub url: String,
    pub label: String,
}

/// Presentation settings shared by every rendered message.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Offset publish dates are shown in.
    pub utc_offset: FixedOffset,
    /// Small image shown in the corner of instance announcements.
    pub thumbnail_url: Option<String>,
}

/// Build the webhook payload for an announcement.
pub fn render(announcement: &Announcement, opts: &RenderOptions) -> WebhookMessage {
    match announcement {
        Announcement::InstanceAnnounced {
            world,
            instance_url,
            ..
        } => {
            let mut embed = world_embed(world, opts, true);
            embed.thumbnail = opts
                .thumbnail_url
                .as_ref()
                .map(|url| EmbedImage { url: url.clone() });
            WebhookMessage {
                content: INSTANCE_HEADER.to_string(),
                embeds: vec![embed],
                components: vec![ActionRow {
                    kind: 1,
                    components: vec![LinkButton {
                        kind: 2,
                        style: 5,
                        url: instance_url.clone(),
                        label: LAUNCH_LABEL.to_string(),
                    }],
                }],
            }
        }
        Announcement::HotWorldsAnnounced { worlds } => WebhookMessage {
            content: HOT_WORLDS_HEADER.to_string(),
            embeds: worlds.iter().map(|w| world_embed(w, opts, false)).collect(),
            components: Vec::new(),
        },
    }
}

fn world_embed(world: &WorldCard, opts: &RenderOptions, with_description: bool) -> Embed {
    let published = world
        .created_at
        .map(|t| t.with_timezone(&opts.utc_offset).format(PUBLISHED_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string());

    Embed {
        title: world.name.clone(),
        url: world.world_url.clone(),
        description: if with_description {
            world.description.clone().filter(|d| !d.is_empty())
        } else {
            None
        },
        image: world
            .thumbnail_image_url
            .as_ref()
            .map(|url| EmbedImage { url: url.clone() }),
        thumbnail: None,
        fields: vec![
            EmbedField {
                name: PUBLISHED_LABEL.to_string(),
                value: published,
                inline: false,
            },
            EmbedField {
                name: POPULARITY_LABEL.to_string(),
                value: world.popularity.to_string(),
                inline: true,
            },
            EmbedField {
                name: FAVORITES_LABEL.to_string(),
                value: world.favorites.to_string(),
                inline: true,
            },
        ],
    }
}

/// Posts announcements to a Discord webhook.
pub struct DiscordWebhook {
    http: reqwest::Client,
    url: String,
    render: RenderOptions,
}

impl DiscordWebhook {
    pub fn new(url: &str, render: RenderOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.to_string(),
            render,
        })
    }
}

impl Notifier for DiscordWebhook {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        let message = render(announcement, &self.render);
        let resp = self
            .http
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .context("webhook request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Webhook rejected message ({status}): {body}");
        } else {
            debug!("Webhook accepted message ({status})");
        }
        Ok(())
    }
}

/// Prints rendered payloads as JSON lines to stdout instead of posting them.
pub struct StdoutReporter {
    render: RenderOptions,
}

impl StdoutReporter {
    pub fn new(render: RenderOptions) -> Self {
        Self { render }
    }
}

impl Notifier for StdoutReporter {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        let message = render(announcement, &self.render);
        let json = serde_json::to_string(&message).context("failed to serialize payload")?;
        println!("{json}");
        Ok(())
    }
}

/// Notifier chosen at startup.
pub enum Sink {
    Discord(DiscordWebhook),
    Stdout(StdoutReporter),
}

impl Notifier for Sink {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        match self {
            Sink::Discord(webhook) => webhook.announce(announcement).await,
            Sink::Stdout(reporter) => reporter.announce(announcement).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Instance, World};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn opts(thumbnail: Option<&str>) -> RenderOptions {
        RenderOptions {
            utc_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
            thumbnail_url: thumbnail.map(str::to_string),
        }
    }

    fn make_world(id: &str, thumbnail: Option<&str>) -> World {
        World {
            id: id.to_string(),
            name: Some("Night Market".to_string()),
            description: Some("lanterns".to_string()),
            thumbnail_image_url: thumbnail.map(str::to_string),
            // 2024-12-31 20:00 UTC is already January 1st in UTC+9
            created_at: Some(Utc.with_ymd_and_hms(2024, 12, 31, 20, 0, 0).unwrap()),
            popularity: 8,
            favorites: 321,
        }
    }

    #[test]
    fn instance_message_layout() {
        let instance = Instance {
            instance_id: "77~group(grp_1)".to_string(),
            world: make_world("wrld_n", Some("https://example.com/n.png")),
        };
        let message = render(
            &Announcement::instance(&instance),
            &opts(Some("https://example.com/logo.png")),
        );
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["content"], INSTANCE_HEADER);
        let embed = &value["embeds"][0];
        assert_eq!(embed["title"], "Night Market");
        assert_eq!(embed["url"], "https://vrchat.com/home/launch?worldId=wrld_n");
        assert_eq!(embed["description"], "lanterns");
        assert_eq!(embed["image"]["url"], "https://example.com/n.png");
        assert_eq!(embed["thumbnail"]["url"], "https://example.com/logo.png");
        assert_eq!(
            embed["fields"],
            json!([
                { "name": "ワールド公開日", "value": "2025年01月01日", "inline": false },
                { "name": ":fire: Popularity", "value": "8", "inline": true },
                { "name": ":bookmark: Bookmarks", "value": "321", "inline": true }
            ])
        );
        assert_eq!(
            value["components"],
            json!([{
                "type": 1,
                "components": [{
                    "type": 2,
                    "style": 5,
                    "url": "https://vrchat.com/home/launch?worldId=wrld_n&instanceId=77~group(grp_1)",
                    "label": "Launch Instance"
                }]
            }])
        );
    }

    #[test]
    fn missing_thumbnail_still_renders() {
        let instance = Instance {
            instance_id: "1".to_string(),
            world: World {
                created_at: None,
                ..make_world("wrld_t", None)
            },
        };
        let message = render(&Announcement::instance(&instance), &opts(None));
        let value = serde_json::to_value(&message).unwrap();
        let embed = &value["embeds"][0];
        assert!(embed.get("image").is_none());
        assert!(embed.get("thumbnail").is_none());
        assert_eq!(embed["fields"][0]["value"], "-");
    }

    #[test]
    fn hot_worlds_message_has_one_embed_per_world() {
        let worlds = [
            make_world("w1", Some("https://example.com/1.png")),
            make_world("w2", None),
        ];
        let message = render(&Announcement::hot_worlds(worlds.iter()), &opts(Some("x")));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["content"], HOT_WORLDS_HEADER);
        assert_eq!(value["embeds"].as_array().unwrap().len(), 2);
        assert!(value["embeds"][0].get("description").is_none());
        assert!(value["embeds"][0].get("thumbnail").is_none());
        assert_eq!(value["embeds"][1]["url"], "https://vrchat.com/home/launch?worldId=w2");
        assert!(value.get("components").is_none());
    }
}

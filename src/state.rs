use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::engine::world_url;
use crate::types::Instance;

/// Cache key of the hot-world rotation list.
pub const HOT_WORLDS_KEY: &str = "hot_worlds";

/// How long an announced instance stays recorded as seen.
pub const INSTANCE_RETENTION_DAYS: i64 = 7;

/// Format of `world_created_at` inside a seen-instance record.
const RECORD_DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Cache key marking an instance as announced.
pub fn seen_instance_key(instance_id: &str) -> String {
    format!("instance_{instance_id}")
}

/// Snapshot of an instance's world taken the first time the instance was seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenInstanceRecord {
    pub world_created_at: String,
    pub world_id: String,
    pub world_name: String,
    pub world_description: Option<String>,
    pub world_url: String,
    pub thumbnail_image_url: Option<String>,
}

impl SeenInstanceRecord {
    /// Capture the display attributes of `instance`, rendering dates in `offset`.
    pub fn capture(instance: &Instance, offset: FixedOffset) -> Self {
        let world = &instance.world;
        Self {
            world_created_at: world
                .created_at
                .map(|t| t.with_timezone(&offset).format(RECORD_DATE_FORMAT).to_string())
                .unwrap_or_default(),
            world_id: world.id.clone(),
            world_name: world.display_name().to_string(),
            world_description: world.description.clone(),
            world_url: world_url(&world.id),
            thumbnail_image_url: world.thumbnail_image_url.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize seen-instance record")
    }
}

/// One pick in the hot-world rotation: the world and when it was first picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationEntry {
    pub id: String,
    #[serde(deserialize_with = "deserialize_pick_date")]
    pub date: DateTime<Utc>,
}

/// Accepts RFC 3339 timestamps and, for older records, offset-less ISO 8601 read as UTC.
fn deserialize_pick_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Worlds picked recently, oldest first. Stored whole under [`HOT_WORLDS_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RotationList {
    pub entries: Vec<RotationEntry>,
}

impl RotationList {
    /// Decode a cached list. A missing or unreadable value starts a fresh rotation.
    pub fn from_cached(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match serde_json::from_str(raw) {
            Ok(list) => list,
            Err(e) => {
                warn!("Discarding unreadable {HOT_WORLDS_KEY} value: {e}");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize rotation list")
    }

    /// Drop picks whose cooldown has run out. Returns how many were dropped.
    pub fn purge(&mut self, now: DateTime<Utc>, cooldown: TimeDelta) -> usize {
        let cutoff = now - cooldown;
        let before = self.entries.len();
        self.entries.retain(|e| e.date > cutoff);
        before - self.entries.len()
    }

    pub fn contains(&self, world_id: &str) -> bool {
        self.entries.iter().any(|e| e.id == world_id)
    }

    pub fn push(&mut self, world_id: &str, now: DateTime<Utc>) {
        self.entries.push(RotationEntry {
            id: world_id.to_string(),
            date: now,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn record_captures_world_in_local_time() {
        let instance: Instance = serde_json::from_value(json!({
            "instanceId": "42~group(grp_1)",
            "world": {
                "id": "wrld_a",
                "name": "Sky Garden",
                "description": "quiet",
                "thumbnailImageUrl": "https://example.com/a.png",
                "created_at": "2024-05-01T20:30:00Z"
            }
        }))
        .unwrap();

        let record = SeenInstanceRecord::capture(&instance, jst());
        assert_eq!(record.world_created_at, "2024/05/02 05:30:00");
        assert_eq!(record.world_name, "Sky Garden");
        assert_eq!(record.world_url, "https://vrchat.com/home/launch?worldId=wrld_a");

        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["world_id"], "wrld_a");
        assert_eq!(value["world_description"], "quiet");
        assert_eq!(value["thumbnail_image_url"], "https://example.com/a.png");
    }

    #[test]
    fn seen_key_format() {
        assert_eq!(seen_instance_key("1~x"), "instance_1~x");
    }

    #[test]
    fn rotation_reads_legacy_naive_dates() {
        let list = RotationList::from_cached(Some(
            r#"[{"id":"w1","date":"2026-02-20T08:15:30.123456"},{"id":"w2","date":"2026-02-21T00:00:00+09:00"}]"#,
        ));
        assert_eq!(list.ids(), vec!["w1", "w2"]);
        assert_eq!(
            list.entries[0].date,
            Utc.with_ymd_and_hms(2026, 2, 20, 8, 15, 30).unwrap()
                + TimeDelta::microseconds(123_456)
        );
        assert_eq!(
            list.entries[1].date,
            Utc.with_ymd_and_hms(2026, 2, 20, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn rotation_unreadable_starts_empty() {
        assert!(RotationList::from_cached(Some("not json")).is_empty());
        assert!(RotationList::from_cached(None).is_empty());
    }

    #[test]
    fn rotation_survives_cache_text() {
        let mut list = RotationList::default();
        list.push("w1", now());
        let decoded = RotationList::from_cached(Some(&list.to_json().unwrap()));
        assert_eq!(decoded, list);
    }

    #[test]
    fn purge_drops_entries_at_or_past_cooldown() {
        let mut list = RotationList::default();
        list.push("old", now() - TimeDelta::days(31));
        list.push("edge", now() - TimeDelta::days(30));
        list.push("fresh", now() - TimeDelta::days(29));

        let dropped = list.purge(now(), TimeDelta::days(30));
        assert_eq!(dropped, 2);
        assert_eq!(list.ids(), vec!["fresh"]);
        assert!(list.contains("fresh"));
        assert!(!list.contains("old"));
    }
}

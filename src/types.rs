use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{instance_url, world_url};

/// Shown in place of a world name the API returns empty or null.
pub const UNTITLED_WORLD: &str = "(NO TITLE)";

/// Anything the dedup engine can recognise across polls by a stable id.
pub trait Entity {
    fn entity_id(&self) -> &str;
}

/// A world as returned by the worlds search and embedded in group instances.
///
/// The search endpoint returns a trimmed-down record without `description`,
/// so every display attribute except `id` is optional or defaulted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct World {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_image_url: Option<String>,
    #[serde(default, rename = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub popularity: u32,
    #[serde(default)]
    pub favorites: u32,
}

impl World {
    /// Name to show to humans, falling back to a placeholder for untitled worlds.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => UNTITLED_WORLD,
        }
    }
}

impl Entity for World {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// A live group instance. Disappears from later snapshots once it closes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: String,
    pub world: World,
}

impl Entity for Instance {
    fn entity_id(&self) -> &str {
        &self.instance_id
    }
}

/// Sort orders accepted by the worlds search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorldSort {
    Popularity,
    Heat,
    Hotness,
    Trust,
    Shuffle,
    Random,
    Favorites,
}

impl WorldSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorldSort::Popularity => "popularity",
            WorldSort::Heat => "heat",
            WorldSort::Hotness => "hotness",
            WorldSort::Trust => "trust",
            WorldSort::Shuffle => "shuffle",
            WorldSort::Random => "random",
            WorldSort::Favorites => "favorites",
        }
    }
}

/// Query for the worlds search endpoint. `None` fields are left out of the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSearch {
    pub search: Option<String>,
    pub n: Option<u32>,
    pub offset: Option<u32>,
    pub tag: Option<String>,
    pub sort: Option<WorldSort>,
}

impl WorldSearch {
    /// The query used for hot-world pickups: hottest worlds carrying `tag`.
    pub fn hot(tag: &str) -> Self {
        Self {
            sort: Some(WorldSort::Hotness),
            tag: Some(tag.to_string()),
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(search) = &self.search {
            query.push(("search", search.clone()));
        }
        if let Some(n) = self.n {
            query.push(("n", n.to_string()));
        }
        if let Some(offset) = self.offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(sort) = self.sort {
            query.push(("sort", sort.as_str().to_string()));
        }
        if let Some(tag) = &self.tag {
            query.push(("tag", tag.clone()));
        }
        query
    }
}

/// Display attributes of a world captured at announcement time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldCard {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub thumbnail_image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub popularity: u32,
    pub favorites: u32,
    pub world_url: String,
}

impl WorldCard {
    pub fn from_world(world: &World) -> Self {
        Self {
            id: world.id.clone(),
            name: world.display_name().to_string(),
            description: world.description.clone(),
            thumbnail_image_url: world.thumbnail_image_url.clone(),
            created_at: world.created_at,
            popularity: world.popularity,
            favorites: world.favorites,
            world_url: world_url(&world.id),
        }
    }
}

/// Events handed to a notifier, one variant per announcing job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum Announcement {
    InstanceAnnounced {
        world: WorldCard,
        instance_id: String,
        instance_url: String,
    },
    HotWorldsAnnounced {
        worlds: Vec<WorldCard>,
    },
}

impl Announcement {
    pub fn instance(instance: &Instance) -> Self {
        Announcement::InstanceAnnounced {
            world: WorldCard::from_world(&instance.world),
            instance_id: instance.instance_id.clone(),
            instance_url: instance_url(&instance.world.id, &instance.instance_id),
        }
    }

    pub fn hot_worlds<'a>(worlds: impl IntoIterator<Item = &'a World>) -> Self {
        Announcement::HotWorldsAnnounced {
            worlds: worlds.into_iter().map(WorldCard::from_world).collect(),
        }
    }
}

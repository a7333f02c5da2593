use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::LAUNCH_URL;
use crate::state::RotationList;
use crate::types::{Entity, World};

/// Maximum worlds announced per hot-world run.
pub const HOT_WORLD_PICKS: usize = 3;

/// Days a picked world must wait before it can be picked again.
pub const HOT_WORLD_COOLDOWN_DAYS: i64 = 30;

/// Launch page for a world.
pub fn world_url(world_id: &str) -> String {
    format!("{LAUNCH_URL}?worldId={world_id}")
}

/// Launch page that drops the visitor straight into one instance of a world.
pub fn instance_url(world_id: &str, instance_id: &str) -> String {
    format!("{}&instanceId={instance_id}", world_url(world_id))
}

/// Entities from `snapshot` that have not been announced yet, in snapshot order.
///
/// An id repeated within the snapshot is returned once.
pub fn filter_unseen<'a, E: Entity>(
    snapshot: &'a [E],
    mut has_seen: impl FnMut(&str) -> bool,
) -> Vec<&'a E> {
    let mut taken: HashSet<&str> = HashSet::new();
    let mut fresh = Vec::new();
    for entity in snapshot {
        let id = entity.entity_id();
        if has_seen(id) || !taken.insert(id) {
            continue;
        }
        fresh.push(entity);
    }
    fresh
}

/// Pick quota and cooldown for the hot-world rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub picks: usize,
    pub cooldown: TimeDelta,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            picks: HOT_WORLD_PICKS,
            cooldown: TimeDelta::days(HOT_WORLD_COOLDOWN_DAYS),
        }
    }
}

/// Result of one rotation pass.
#[derive(Debug)]
pub struct HotWorldSelection<'a> {
    /// Worlds to announce, in search order.
    pub picked: Vec<&'a World>,
    /// Purged rotation plus one entry per pick. Always persisted.
    pub rotation: RotationList,
    /// Candidates passed over because they are still cooling down.
    pub skipped: Vec<&'a str>,
    /// Entries dropped from the stored rotation because their cooldown ended.
    pub purged: usize,
}

/// Choose up to `policy.picks` worlds from `candidates` that were not picked
/// within the cooldown window, recording each pick at `now`.
///
/// Candidates are taken in the order given; when fewer are eligible than the
/// quota allows, fewer are picked.
pub fn select_hot_worlds<'a>(
    candidates: &'a [World],
    mut rotation: RotationList,
    policy: RotationPolicy,
    now: DateTime<Utc>,
) -> HotWorldSelection<'a> {
    let purged = rotation.purge(now, policy.cooldown);

    let mut picked = Vec::new();
    let mut skipped = Vec::new();
    for world in candidates {
        if picked.len() >= policy.picks {
            break;
        }
        if rotation.contains(&world.id) {
            debug!("skip {} (cooling down)", world.id);
            skipped.push(world.id.as_str());
            continue;
        }
        rotation.push(&world.id, now);
        picked.push(world);
    }

    HotWorldSelection {
        picked,
        rotation,
        skipped,
        purged,
    }
}

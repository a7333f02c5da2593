use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use tracing::{debug, error, info};

use crate::api::SourceApi;
use crate::cache::KvStore;
use crate::config::AppConfig;
use crate::engine::{RotationPolicy, filter_unseen, select_hot_worlds};
use crate::reporter::Notifier;
use crate::session::{self, Session};
use crate::state::{HOT_WORLDS_KEY, RotationList, SeenInstanceRecord, seen_instance_key};
use crate::types::{Announcement, Instance, World, WorldSearch};

/// Work a single run can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Job {
    /// Announce group instances that have not been announced yet.
    GroupInstances,
    /// Announce a few hot worlds that were not picked recently.
    HotWorlds,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::GroupInstances => f.write_str("group-instances"),
            Job::HotWorlds => f.write_str("hot-worlds"),
        }
    }
}

/// What a job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The snapshot was empty.
    NothingFound,
    /// Everything in the snapshot was already announced or cooling down.
    NothingNew,
    /// This many entities were announced.
    Announced(usize),
}

/// Everything `run` needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub username: String,
    pub group_id: String,
    pub session_retention: TimeDelta,
    pub instance_retention: TimeDelta,
    pub rotation: RotationPolicy,
    pub hot_world_query: WorldSearch,
    pub utc_offset: FixedOffset,
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let s = &config.settings;
        Ok(Self {
            username: config.vrchat.username.clone(),
            group_id: config.vrchat.group_id.clone(),
            session_retention: s.session_retention()?,
            instance_retention: s.instance_retention()?,
            rotation: s.rotation_policy()?,
            hot_world_query: WorldSearch::hot(&s.hot_world_tag),
            utc_offset: s.utc_offset()?,
        })
    }
}

/// Outcome of each job that completed, plus the error that ended the run early, if any.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<(Job, JobOutcome)>,
    pub failure: Option<String>,
}

/// Record and announce every instance in `instances` not announced before.
pub async fn notify_group_instances<C: KvStore, N: Notifier>(
    instances: &[Instance],
    cache: &C,
    notifier: &N,
    retention: TimeDelta,
    utc_offset: FixedOffset,
) -> Result<JobOutcome> {
    if instances.is_empty() {
        info!("No instances found");
        return Ok(JobOutcome::NothingFound);
    }

    let mut seen = HashSet::new();
    for instance in instances {
        if cache
            .get(&seen_instance_key(&instance.instance_id))
            .await?
            .is_some()
        {
            seen.insert(instance.instance_id.as_str());
        }
    }

    let fresh = filter_unseen(instances, |id| seen.contains(id));
    if fresh.is_empty() {
        info!("No new instances ({} already announced)", instances.len());
        return Ok(JobOutcome::NothingNew);
    }

    for instance in &fresh {
        let record = SeenInstanceRecord::capture(instance, utc_offset);
        cache
            .set(
                &seen_instance_key(&instance.instance_id),
                &record.to_json()?,
                Some(retention),
            )
            .await?;
        notifier
            .announce(&Announcement::instance(instance))
            .await
            .with_context(|| format!("failed to announce instance {}", instance.instance_id))?;
        info!(
            "Announced instance {} of \"{}\"",
            instance.instance_id, record.world_name
        );
    }

    Ok(JobOutcome::Announced(fresh.len()))
}

/// Pick hot worlds outside their cooldown, persist the rotation, and announce the picks.
pub async fn notify_hot_worlds<C: KvStore, N: Notifier>(
    worlds: &[World],
    cache: &C,
    notifier: &N,
    policy: RotationPolicy,
    now: DateTime<Utc>,
) -> Result<JobOutcome> {
    let cached = cache.get(HOT_WORLDS_KEY).await?;
    let rotation = RotationList::from_cached(cached.as_deref());
    let selection = select_hot_worlds(worlds, rotation, policy, now);
    if selection.purged > 0 {
        debug!("Purged {} expired rotation entries", selection.purged);
    }

    cache
        .set(HOT_WORLDS_KEY, &selection.rotation.to_json()?, None)
        .await?;

    if selection.picked.is_empty() {
        info!("No hot worlds found");
        return Ok(if worlds.is_empty() {
            JobOutcome::NothingFound
        } else {
            JobOutcome::NothingNew
        });
    }

    let picked = selection.picked.len();
    notifier
        .announce(&Announcement::hot_worlds(selection.picked.iter().copied()))
        .await
        .context("failed to announce hot worlds")?;
    info!(
        "Announced {picked} hot world(s), skipped {} cooling down",
        selection.skipped.len()
    );
    Ok(JobOutcome::Announced(picked))
}

/// One full pass: restore the session, run `jobs` in order, and save the session.
///
/// A failing job ends the pass early and is reported, not returned; the
/// session is persisted either way. Only cache failures around the session
/// itself surface as errors.
pub async fn run<A: SourceApi, C: KvStore, N: Notifier>(
    api: &A,
    cache: &C,
    notifier: &N,
    settings: &RunSettings,
    jobs: &[Job],
) -> Result<RunReport> {
    let mut session = session::restore(cache, &settings.username).await?;
    let mut report = RunReport::default();

    if let Err(e) = run_jobs(api, cache, notifier, settings, jobs, &mut session, &mut report).await
    {
        error!("Run failed: {e:?}");
        report.failure = Some(format!("{e:#}"));
    }

    session::persist(
        cache,
        &settings.username,
        &session,
        settings.session_retention,
    )
    .await?;
    Ok(report)
}

async fn run_jobs<A: SourceApi, C: KvStore, N: Notifier>(
    api: &A,
    cache: &C,
    notifier: &N,
    settings: &RunSettings,
    jobs: &[Job],
    session: &mut Session,
    report: &mut RunReport,
) -> Result<()> {
    for &job in jobs {
        let outcome = match job {
            Job::GroupInstances => {
                let instances = api
                    .group_instances(session, &settings.group_id)
                    .await
                    .context("failed to fetch group instances")?;
                notify_group_instances(
                    &instances,
                    cache,
                    notifier,
                    settings.instance_retention,
                    settings.utc_offset,
                )
                .await?
            }
            Job::HotWorlds => {
                let worlds = api
                    .search_worlds(session, &settings.hot_world_query)
                    .await
                    .context("failed to search hot worlds")?;
                notify_hot_worlds(&worlds, cache, notifier, settings.rotation, Utc::now()).await?
            }
        };
        report.outcomes.push((job, outcome));
    }
    Ok(())
}

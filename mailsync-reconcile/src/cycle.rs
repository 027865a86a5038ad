//! One reconciliation pass: fetch, diff, apply.
//!
//! This is the shared entrypoint used by both the `mailsync sync` command and
//! the daemon loop. A cycle is strictly linear
//! (`Fetching → Diffing → Applying → Done | Failed`) and never retries
//! internally; the caller decides when to run the next one.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use mailsync_core::types::domain_of;
use mailsync_core::{
    DesiredStateSource, DirectoryEntry, EntityKind, MutationGateway, RemoteStateLoader,
};

use crate::desired::{
    DesiredSettings, ListRepresentation, GROUP_FIELDS, MEMBER_FIELDS, USER_FIELDS,
};
use crate::error::CycleError;
use crate::reconciler::{KindQueues, Outcome, QueueCounts, Reconciler};
use crate::strategy::{AliasStrategy, DomainStrategy, FilterStrategy, MailboxStrategy};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Where a cycle ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Fetching,
    Diffing,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Fetching => "fetching",
            CyclePhase::Diffing => "diffing",
            CyclePhase::Applying => "applying",
            CyclePhase::Done => "done",
            CyclePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Queues of every kind computed by the diff phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub queues: BTreeMap<EntityKind, KindQueues>,
}

impl Plan {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindQueues> {
        self.queues.get(&kind)
    }

    pub fn counts(&self) -> BTreeMap<EntityKind, QueueCounts> {
        self.queues.iter().map(|(k, q)| (*k, q.counts())).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(KindQueues::is_empty)
    }

    /// Number of backend calls' worth of changes (one per record or id).
    pub fn total(&self) -> usize {
        self.queues.values().map(|q| q.counts().total()).sum()
    }
}

/// Outcome of one cycle, as logged by the daemon and printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub phase: CyclePhase,
    pub dry_run: bool,
    pub counts: BTreeMap<EntityKind, QueueCounts>,
    /// Mutations the backend accepted (records created or updated, ids deleted).
    pub applied: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    /// Whether the error, if any, happened after mutations may have started.
    pub failed_during_apply: bool,
    #[serde(skip_serializing_if = "Plan::is_empty")]
    pub plan: Plan,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.phase == CyclePhase::Done
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run one cycle. With `dry_run` the cycle stops after diffing and the plan
/// is returned without touching the backend.
pub fn run(
    settings: &DesiredSettings,
    directory: &mut dyn DesiredStateSource,
    loader: &dyn RemoteStateLoader,
    gateway: &dyn MutationGateway,
    dry_run: bool,
) -> CycleReport {
    let started_at = Utc::now();
    let mut report = CycleReport {
        phase: CyclePhase::Fetching,
        dry_run,
        counts: BTreeMap::new(),
        applied: 0,
        started_at,
        finished_at: started_at,
        error: None,
        failed_during_apply: false,
        plan: Plan::default(),
    };

    let result = drive(settings, directory, loader, gateway, dry_run, &mut report);
    report.finished_at = Utc::now();
    match result {
        Ok(()) => report.phase = CyclePhase::Done,
        Err(err) => {
            report.failed_during_apply = err.during_apply();
            report.error = Some(err.to_string());
            report.phase = CyclePhase::Failed;
        }
    }
    report
}

fn drive(
    settings: &DesiredSettings,
    directory: &mut dyn DesiredStateSource,
    loader: &dyn RemoteStateLoader,
    gateway: &dyn MutationGateway,
    dry_run: bool,
    report: &mut CycleReport,
) -> Result<(), CycleError> {
    report.phase = CyclePhase::Fetching;
    let plan = plan(settings, directory, loader)?;
    report.phase = CyclePhase::Diffing;
    report.counts = plan.counts();

    if plan.is_empty() {
        info!("no changes; everything up to date");
        report.plan = plan;
        return Ok(());
    }

    info!("found deltas:");
    for (kind, counts) in &report.counts {
        info!(
            "    * {}: {} to add, {} to update, {} to kill",
            kind.plural(),
            counts.adds,
            counts.updates,
            counts.kills
        );
    }

    if dry_run {
        info!("dry run; not applying");
        report.plan = plan;
        return Ok(());
    }

    report.phase = CyclePhase::Applying;
    let outcome = apply_counted(&plan, gateway, &mut report.applied);
    report.plan = plan;
    outcome
}

/// Fetch desired and remote state and compute every queue.
///
/// Fails before any mutation on directory or snapshot errors.
pub fn plan(
    settings: &DesiredSettings,
    directory: &mut dyn DesiredStateSource,
    loader: &dyn RemoteStateLoader,
) -> Result<Plan, CycleError> {
    info!("step 1: loading users and groups from the directory");
    let desired = fetch_desired(settings, directory);
    directory.end_cycle();
    let desired = desired?;

    info!("step 2: loading current data from the backend");
    let mut domains = Reconciler::new(DomainStrategy);
    domains.load_snapshot(loader.fetch_all(EntityKind::Domain)?);
    let managed_domains = domains.managed_keys();

    let mut mailboxes = Reconciler::new(MailboxStrategy::new(managed_domains.clone()));
    mailboxes.load_snapshot(loader.fetch_all(EntityKind::Mailbox)?);
    let mut aliases = Reconciler::new(AliasStrategy::new(managed_domains.clone()));
    aliases.load_snapshot(loader.fetch_all(EntityKind::Alias)?);
    let mut filters = Reconciler::new(FilterStrategy::new(managed_domains));
    filters.load_snapshot(loader.fetch_all(EntityKind::Filter)?);

    info!("step 3: calculating deltas");
    for entry in &desired.users {
        let Some(user) = settings.user(entry) else {
            continue;
        };
        let outcome = domains.declare(settings.domain_record(&user.domain), &user.domain);
        if outcome.is_foreign() {
            warn!(domain = %user.domain, user = %user.mail, "domain is not managed here; skipping user");
            continue;
        }
        if mailboxes.declare(user.mailbox, &user.mail).is_foreign() {
            warn!(mailbox = %user.mail, "mailbox is not managed here; skipping its aliases");
            continue;
        }
        for (address, alias) in user.aliases {
            let alias_domain = domain_of(&address);
            if alias_domain != user.domain {
                let outcome = domains.declare(settings.domain_record(alias_domain), alias_domain);
                if outcome.is_foreign() {
                    warn!(alias = %address, domain = %alias_domain, "alias domain is not managed here; skipping alias");
                    continue;
                }
                if outcome == Outcome::Queued {
                    warn!(alias = %address, domain = %alias_domain, "alias domain does not exist yet; creating it");
                }
            }
            if aliases.declare(alias, &address).is_foreign() {
                warn!(alias = %address, "alias is not managed here");
            }
        }
    }

    for (group, members) in &desired.lists {
        let Some(list) = settings.list(group, members) else {
            continue;
        };
        let outcome = domains.declare(settings.domain_record(&list.domain), &list.domain);
        if outcome.is_foreign() {
            warn!(domain = %list.domain, list = %list.mail, "domain is not managed here; skipping list");
            continue;
        }
        match list.delivery {
            ListRepresentation::Filter { mailbox, filter } => {
                if mailboxes.declare(mailbox, &list.mail).is_foreign() {
                    warn!(list = %list.mail, "list mailbox is not managed here; skipping its filter");
                    continue;
                }
                if filters.declare(filter, &list.mail).is_foreign() {
                    warn!(list = %list.mail, "list filter is not managed here");
                }
            }
            ListRepresentation::Alias { alias } => {
                if aliases.declare(alias, &list.mail).is_foreign() {
                    warn!(list = %list.mail, "list alias is not managed here");
                }
            }
        }
    }

    let mut plan = Plan::default();
    plan.queues.insert(EntityKind::Domain, domains.queues());
    plan.queues.insert(EntityKind::Mailbox, mailboxes.queues());
    plan.queues.insert(EntityKind::Alias, aliases.queues());
    plan.queues.insert(EntityKind::Filter, filters.queues());
    Ok(plan)
}

/// Apply a plan: deletes dependents-first, then creates and updates
/// owners-first. Stops at the first rejected mutation.
///
/// Returns the number of accepted mutations.
pub fn apply(plan: &Plan, gateway: &dyn MutationGateway) -> Result<usize, CycleError> {
    let mut applied = 0;
    apply_counted(plan, gateway, &mut applied)?;
    Ok(applied)
}

fn apply_counted(
    plan: &Plan,
    gateway: &dyn MutationGateway,
    applied: &mut usize,
) -> Result<(), CycleError> {
    info!("step 4: syncing deltas to the backend");

    for kind in EntityKind::deletion_order() {
        let Some(queues) = plan.kind(*kind) else {
            continue;
        };
        if queues.kills.is_empty() {
            continue;
        }
        info!(kind = %kind, count = queues.kills.len(), "deleting");
        gateway.delete(*kind, &queues.kills)?;
        *applied += queues.kills.len();
    }

    for kind in EntityKind::all() {
        let Some(queues) = plan.kind(*kind) else {
            continue;
        };
        for record in &queues.adds {
            gateway.create(*kind, record)?;
            *applied += 1;
        }
        for entry in &queues.updates {
            gateway.update(*kind, entry)?;
            *applied += 1;
        }
        if !queues.adds.is_empty() || !queues.updates.is_empty() {
            info!(
                kind = %kind,
                created = queues.adds.len(),
                updated = queues.updates.len(),
                "applied"
            );
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

struct DesiredInput {
    users: Vec<DirectoryEntry>,
    /// Enabled list groups with their members' addresses.
    lists: Vec<(DirectoryEntry, Vec<String>)>,
}

fn fetch_desired(
    settings: &DesiredSettings,
    directory: &mut dyn DesiredStateSource,
) -> Result<DesiredInput, CycleError> {
    let users = directory.fetch_users(&settings.user_filter, USER_FIELDS)?;
    info!(count = users.len(), "loaded users");

    let groups = directory.fetch_groups(&settings.group_filter, GROUP_FIELDS)?;
    info!(count = groups.len(), "loaded groups");

    let mut lists = Vec::new();
    for group in groups {
        if !settings.list_enabled(&group) {
            continue;
        }
        let dn = group
            .first("distinguishedName")
            .unwrap_or(group.dn.as_str())
            .to_owned();
        let members = directory
            .fetch_group_members(&settings.member_filter(&dn), MEMBER_FIELDS)?
            .iter()
            .filter_map(|member| member.first("mail").filter(|m| !m.is_empty()))
            .map(str::to_owned)
            .collect();
        lists.push((group, members));
    }
    info!(count = lists.len(), "resolved mailing lists");

    Ok(DesiredInput { users, lists })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

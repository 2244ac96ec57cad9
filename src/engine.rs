//! Step engine
//!
//! Executes a plan tree on one cooperative scheduler: sequential groups run
//! children in declared order, parallel groups run them concurrently via
//! `join_all`, and every controller call is a suspension point. The engine
//! owns the only mutable view of the tree; each node is updated by the task
//! running it.
//!
//! Interrupt protocol: the first signal stops new leaves from starting but
//! lets running ones finish (exit 130); the second cancels running leaves
//! outright (exit 137). A declined confirmation prompt behaves like the
//! first signal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use colored::Colorize;
use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{CephRelease, CharmCategory, ReleaseCatalog};
use crate::config::UpgradeContext;
use crate::error::JujuError;
use crate::juju::JujuClient;
use crate::model::Channel;
use crate::steps::{Action, FailurePolicy, Step, StepFailure, StepState};

const APT_UPGRADE_COMMAND: &str = "apt-get update && apt-get dist-upgrade \
    -o Dpkg::Options::=--force-confnew -o Dpkg::Options::=--force-confdef -y \
    && apt-get autoremove -y";

/// Terminal result of one plan execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed(StepFailure),
    /// First signal or declined prompt: running leaves finished, nothing
    /// new was started.
    CancelledSafely,
    /// Second signal: running leaves were abandoned.
    Aborted,
}

/// Confirmation gate used in interactive mode. Swappable for tests.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm(&self, description: &str) -> bool;
}

/// Reads `y`/`n` answers from stdin, asking again on anything else.
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn confirm(&self, description: &str) -> bool {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            println!(
                "{} {}",
                description.bold(),
                "Continue? (y/N):".bright_red()
            );
            match lines.next_line().await {
                Ok(Some(answer)) => match answer.trim().to_lowercase().as_str() {
                    "y" | "yes" => return true,
                    "n" | "no" | "" => return false,
                    _ => continue,
                },
                _ => return false,
            }
        }
    }
}

enum LeafError {
    Aborted,
    Failed(StepFailure),
}

pub struct Engine<'a> {
    client: &'a dyn JujuClient,
    catalog: &'a ReleaseCatalog,
    ctx: &'a UpgradeContext,
    interactive: bool,
    soft_cancel: CancellationToken,
    hard_cancel: CancellationToken,
    declined: AtomicBool,
    prompter: Box<dyn Prompter>,
}

impl<'a> Engine<'a> {
    pub fn new(
        client: &'a dyn JujuClient,
        catalog: &'a ReleaseCatalog,
        ctx: &'a UpgradeContext,
        interactive: bool,
    ) -> Engine<'a> {
        Engine {
            client,
            catalog,
            ctx,
            interactive,
            soft_cancel: CancellationToken::new(),
            hard_cancel: CancellationToken::new(),
            declined: AtomicBool::new(false),
            prompter: Box::new(StdinPrompter),
        }
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Engine<'a> {
        self.prompter = prompter;
        self
    }

    /// Tokens the signal handler cancels: first signal the soft one,
    /// second signal the hard one.
    pub fn cancellation_tokens(&self) -> (CancellationToken, CancellationToken) {
        (self.soft_cancel.clone(), self.hard_cancel.clone())
    }

    pub async fn execute(&self, plan: &mut Step) -> RunOutcome {
        if self.cancel_requested() {
            mark_skipped(plan);
            return RunOutcome::CancelledSafely;
        }

        let state = self.run_step(plan).await;

        if self.hard_cancel.is_cancelled() || state == StepState::Aborted {
            return RunOutcome::Aborted;
        }
        if self.cancel_requested() || state == StepState::Cancelled {
            return RunOutcome::CancelledSafely;
        }
        match state {
            StepState::Failed => RunOutcome::Failed(plan.first_failure().cloned().unwrap_or(
                StepFailure {
                    application: None,
                    unit: None,
                    kind: "other".to_string(),
                    message: "upgrade failed".to_string(),
                    retries: 0,
                },
            )),
            _ => RunOutcome::Completed,
        }
    }

    fn cancel_requested(&self) -> bool {
        self.soft_cancel.is_cancelled()
            || self.hard_cancel.is_cancelled()
            || self.declined.load(Ordering::Relaxed)
    }

    fn run_step<'b>(&'b self, step: &'b mut Step) -> BoxFuture<'b, StepState> {
        async move {
            if self.cancel_requested() {
                mark_skipped(step);
                return step.state;
            }

            if step.prompt && self.interactive && step.has_work() {
                let approved = tokio::select! {
                    _ = self.hard_cancel.cancelled() => false,
                    answer = self.prompter.confirm(&step.description) => answer,
                };
                if self.cancel_requested() {
                    mark_skipped(step);
                    return step.state;
                }
                if !approved {
                    info!("'{}' declined; cancelling the remaining steps", step.description);
                    self.declined.store(true, Ordering::Relaxed);
                    mark_skipped(step);
                    return step.state;
                }
            }

            step.state = StepState::Running;
            debug!("running step: {}", step.description);

            if let Some(action) = step.action.clone() {
                match self.run_leaf(&action, step).await {
                    Ok(()) => {}
                    Err(LeafError::Aborted) => {
                        step.state = StepState::Aborted;
                        for child in &mut step.children {
                            mark_skipped(child);
                        }
                        return StepState::Aborted;
                    }
                    Err(LeafError::Failed(failure)) => {
                        warn!("step '{}' failed: {}", step.description, failure);
                        step.failure = Some(failure);
                        step.state = StepState::Failed;
                        for child in &mut step.children {
                            mark_skipped(child);
                        }
                        return StepState::Failed;
                    }
                }
            }

            let state = if step.parallel {
                let states = join_all(step.children.iter_mut().map(|child| self.run_step(child)))
                    .await;
                // first non-done child, in declared order, decides
                states
                    .into_iter()
                    .find(|state| *state != StepState::Done)
                    .unwrap_or(StepState::Done)
            } else {
                self.run_sequential(&mut step.children).await
            };

            step.state = state;
            state
        }
        .boxed()
    }

    async fn run_sequential(&self, children: &mut [Step]) -> StepState {
        let mut index = 0;
        while index < children.len() {
            let state = self.run_step(&mut children[index]).await;
            match state {
                StepState::Done => index += 1,
                StepState::Failed => {
                    let policy = children[index].on_fail;
                    match policy {
                        FailurePolicy::RecordAndContinue => index += 1,
                        FailurePolicy::Abort | FailurePolicy::SkipRemaining => {
                            for child in &mut children[index + 1..] {
                                mark_skipped(child);
                            }
                            return if policy == FailurePolicy::Abort {
                                StepState::Failed
                            } else {
                                StepState::Done
                            };
                        }
                    }
                }
                other => {
                    for child in &mut children[index + 1..] {
                        mark_skipped(child);
                    }
                    return other;
                }
            }
        }
        StepState::Done
    }

    /// Run one leaf action, retrying transient controller failures with
    /// linearly growing backoff.
    async fn run_leaf(&self, action: &Action, step: &Step) -> Result<(), LeafError> {
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                _ = self.hard_cancel.cancelled() => return Err(LeafError::Aborted),
                result = self.perform(action) => result,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.ctx.settings.model_retries => {
                    attempt += 1;
                    let backoff = self.ctx.settings.retry_backoff * attempt;
                    warn!(
                        "transient controller failure ({err}); retry {attempt}/{} in {}s",
                        self.ctx.settings.model_retries,
                        backoff.as_secs()
                    );
                    tokio::select! {
                        _ = self.hard_cancel.cancelled() => return Err(LeafError::Aborted),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => {
                    return Err(LeafError::Failed(StepFailure {
                        application: step.application.clone(),
                        unit: step.unit.clone(),
                        kind: err.kind_str().to_string(),
                        message: err.message.clone(),
                        retries: attempt,
                    }))
                }
            }
        }
    }

    async fn perform(&self, action: &Action) -> Result<(), JujuError> {
        match action {
            Action::WaitIdle { scope, timeout } => {
                self.client.wait_for_idle(scope.clone(), *timeout).await
            }
            Action::SetConfig { app, key, value } => {
                self.client.set_config(app, key, value).await
            }
            Action::RefreshCharm { app } => self.client.refresh_charm(app).await,
            Action::SwitchChannel { app, channel } => {
                self.client.set_channel(app, channel).await
            }
            Action::UpgradePackages { unit } => {
                let output = self.client.run_on_unit(unit, APT_UPGRADE_COMMAND).await?;
                if output.code != 0 {
                    return Err(JujuError::unit(format!(
                        "cannot upgrade packages on '{unit}': apt exited with {}",
                        output.code
                    )));
                }
                Ok(())
            }
            Action::RunAction {
                unit,
                action,
                params,
            } => self
                .client
                .run_action(unit, action, params)
                .await
                .map(|_| ()),
            Action::VerifyWorkload {
                app,
                charm,
                units,
                target,
            } => self.verify_workload(app, charm, units.as_deref(), *target).await,
            Action::VerifyNovaAtTarget { target } => self.verify_nova_at_target(*target).await,
            Action::CheckEmptyHypervisor { unit } => self.check_empty_hypervisor(unit).await,
            Action::BackupDatabase => self.backup_database().await,
            Action::ArchiveData { batch_size } => self.archive_data(*batch_size).await,
            Action::PurgeData { before } => self.purge_data(before.as_deref()).await,
            Action::CheckVaultNotSealed => self.check_vault_not_sealed().await,
            Action::EnsureOsdRelease => self.ensure_osd_release().await,
        }
    }

    async fn verify_workload(
        &self,
        app: &str,
        charm: &str,
        units: Option<&[String]>,
        target: crate::catalog::OpenStackRelease,
    ) -> Result<(), JujuError> {
        let status = self.client.status().await?;
        let app_status = status
            .applications
            .get(app)
            .ok_or_else(|| JujuError::not_found(format!("application '{app}' not found")))?;

        // auxiliary charms do not version-track OpenStack; their channel
        // carries the compatibility statement instead
        if self.catalog.category(charm) == Some(CharmCategory::AuxiliaryPrincipal) {
            let channel: Channel = app_status
                .channel
                .as_deref()
                .unwrap_or_default()
                .parse()
                .map_err(|_| JujuError::other(format!("'{app}' reports no channel")))?;
            let series = app_status
                .series
                .as_deref()
                .unwrap_or_default()
                .parse()
                .map_err(|_| JujuError::other(format!("'{app}' reports no series")))?;
            let serves_target = self
                .catalog
                .releases_for_track(charm, series, &channel.track)
                .into_iter()
                .any(|release| release >= target);
            if !serves_target {
                return Err(JujuError::unit(format!(
                    "channel '{channel}' of '{app}' does not serve release '{target}'"
                )));
            }
            return Ok(());
        }

        let mut not_upgraded = Vec::new();
        for (unit_name, unit) in &app_status.units {
            if units.is_some_and(|scope| !scope.contains(unit_name)) {
                continue;
            }
            let upgraded = if self.catalog.is_ceph_family(charm) {
                self.catalog
                    .ceph_release_of(&unit.workload_version)
                    .is_some_and(|release| release >= CephRelease::for_openstack(target))
            } else {
                self.catalog
                    .release_of(charm, &unit.workload_version)
                    .is_some_and(|release| release >= target)
            };
            if !upgraded {
                not_upgraded.push(unit_name.clone());
            }
        }
        if not_upgraded.is_empty() {
            Ok(())
        } else {
            Err(JujuError::unit(format!(
                "cannot upgrade units '{}' to {target}",
                not_upgraded.join(", ")
            )))
        }
    }

    async fn verify_nova_at_target(
        &self,
        target: crate::catalog::OpenStackRelease,
    ) -> Result<(), JujuError> {
        let status = self.client.status().await?;
        let mut behind = Vec::new();
        for app_status in status.applications.values() {
            if app_status.charm_name.as_deref() != Some("nova-compute") {
                continue;
            }
            for (unit_name, unit) in &app_status.units {
                let at_target = self
                    .catalog
                    .release_of("nova-compute", &unit.workload_version)
                    .is_some_and(|release| release >= target);
                if !at_target {
                    behind.push(unit_name.clone());
                }
            }
        }
        if behind.is_empty() {
            Ok(())
        } else {
            Err(JujuError::unit(format!(
                "nova-compute units '{}' are not at '{target}' yet",
                behind.join(", ")
            )))
        }
    }

    async fn check_empty_hypervisor(&self, unit: &str) -> Result<(), JujuError> {
        let result = self
            .client
            .run_action(unit, "instance-count", &BTreeMap::new())
            .await?;
        let count = match result.results.get("instance-count") {
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().map_err(|_| {
                JujuError::unit(format!(
                    "no valid instance count in the result of 'instance-count' on '{unit}'"
                ))
            })?,
            _ => {
                return Err(JujuError::unit(format!(
                    "no valid instance count in the result of 'instance-count' on '{unit}'"
                )))
            }
        };
        if count > 0 {
            return Err(JujuError::unit(format!(
                "unit '{unit}' hosts {count} running VM(s); use --force to upgrade it anyway"
            )));
        }
        Ok(())
    }

    async fn backup_database(&self) -> Result<(), JujuError> {
        let unit = self.resolve_unit_by_charm("mysql-innodb-cluster").await?;
        info!("running mysqldump on '{unit}'");
        self.client
            .run_action(&unit, "mysqldump", &BTreeMap::new())
            .await
            .map(|_| ())
    }

    async fn archive_data(&self, batch_size: u32) -> Result<(), JujuError> {
        let unit = self.resolve_unit_by_charm("nova-cloud-controller").await?;
        let mut params = BTreeMap::new();
        params.insert("batch-size".to_string(), batch_size.to_string());

        // the action archives one batch per run; loop until it reports
        // nothing left
        loop {
            let result = self.client.run_action(&unit, "archive-data", &params).await?;
            let output = result.output("archive-deleted-rows").ok_or_else(|| {
                JujuError::other(
                    "expected 'archive-deleted-rows' in the archive-data action results",
                )
            })?;
            if output.contains("Nothing was archived") {
                debug!("archiving complete");
                return Ok(());
            }
            debug!("potentially more data to archive");
        }
    }

    async fn purge_data(&self, before: Option<&str>) -> Result<(), JujuError> {
        let unit = self.resolve_unit_by_charm("nova-cloud-controller").await?;
        let mut params = BTreeMap::new();
        if let Some(before) = before {
            params.insert("before".to_string(), before.to_string());
        }
        let result = self.client.run_action(&unit, "purge-data", &params).await?;
        let output = result
            .output("output")
            .ok_or_else(|| JujuError::other("expected 'output' in the purge-data action results"))?;
        if output.contains("Purging stale soft-deleted rows failed") {
            return Err(JujuError::unit(format!(
                "purge-data failed on '{unit}'; check the unit's debug log"
            )));
        }
        Ok(())
    }

    async fn check_vault_not_sealed(&self) -> Result<(), JujuError> {
        let status = self.client.status().await?;
        for app_status in status.applications.values() {
            if app_status.charm_name.as_deref() != Some("vault") {
                continue;
            }
            let state = &app_status.app_status;
            if state.current == "blocked" && state.message.contains("sealed") {
                return Err(JujuError::unit(
                    "vault is sealed; please unseal it manually before upgrading",
                ));
            }
        }
        Ok(())
    }

    async fn ensure_osd_release(&self) -> Result<(), JujuError> {
        let unit = self.resolve_unit_by_charm("ceph-mon").await?;

        let dump = self.client.run_on_unit(&unit, "ceph osd dump -f json").await?;
        let required: String = serde_json::from_str::<serde_json::Value>(&dump.stdout)
            .ok()
            .and_then(|v| v.get("require_osd_release").and_then(|r| r.as_str()).map(String::from))
            .unwrap_or_default();

        let versions = self.client.run_on_unit(&unit, "ceph versions -f json").await?;
        let osd_map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str::<serde_json::Value>(&versions.stdout)
                .ok()
                .and_then(|v| v.get("osd").and_then(|o| o.as_object()).cloned())
                .unwrap_or_default();
        if osd_map.is_empty() {
            return Err(JujuError::unit(format!(
                "cannot read the OSD release from ceph-mon unit '{unit}'"
            )));
        }
        if osd_map.len() > 1 {
            return Err(JujuError::unit(
                "OSDs are on mismatched releases; align them manually before proceeding",
            ));
        }

        // key shape: "ceph version 15.2.17 (hash) octopus (stable)"
        let running: String = osd_map
            .keys()
            .next()
            .and_then(|key| key.split_whitespace().nth(4))
            .unwrap_or_default()
            .to_string();
        if running.is_empty() {
            return Err(JujuError::unit(
                "cannot parse the OSD release from the ceph versions output",
            ));
        }

        if required != running {
            info!("aligning require-osd-release to '{running}' on '{unit}'");
            let output = self
                .client
                .run_on_unit(&unit, &format!("ceph osd require-osd-release {running}"))
                .await?;
            if output.code != 0 {
                return Err(JujuError::unit(format!(
                    "cannot set require-osd-release to '{running}' on '{unit}'"
                )));
            }
        }
        Ok(())
    }

    async fn resolve_unit_by_charm(&self, charm: &str) -> Result<String, JujuError> {
        let status = self.client.status().await?;
        status
            .applications
            .values()
            .filter(|app| app.charm_name.as_deref() == Some(charm))
            .flat_map(|app| app.units.keys())
            .next()
            .cloned()
            .ok_or_else(|| {
                JujuError::not_found(format!("no unit of charm '{charm}' found in the model"))
            })
    }
}

/// Mark a subtree cancelled without touching nodes that already terminated.
fn mark_skipped(step: &mut Step) {
    if !step.state.is_terminal() {
        step.state = StepState::Cancelled;
    }
    for child in &mut step.children {
        mark_skipped(child);
    }
}

//! Scripted in-memory controller used by the end-to-end tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use cou::config::{Settings, UpgradeContext, UpgradeGroup};
use cou::error::JujuError;
use cou::juju::{ActionResult, CommandOutput, IdleScope, JujuClient};
use cou::model::{
    ApplicationStatus, Channel, MachineStatus, ModelInfo, ModelStatus, StatusInfo, UnitStatus,
};

/// Records every call and replays scripted responses.
pub struct MockJuju {
    status: Mutex<ModelStatus>,
    configs: Mutex<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
    instance_counts: Mutex<BTreeMap<String, u64>>,
    command_outputs: Mutex<BTreeMap<String, String>>,
    /// operation key -> remaining transient failures before success
    transient_failures: Mutex<BTreeMap<String, u32>>,
    wait_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl MockJuju {
    pub fn new(status: ModelStatus) -> MockJuju {
        MockJuju {
            status: Mutex::new(status),
            configs: Mutex::new(BTreeMap::new()),
            instance_counts: Mutex::new(BTreeMap::new()),
            command_outputs: Mutex::new(BTreeMap::new()),
            transient_failures: Mutex::new(BTreeMap::new()),
            wait_delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(self, app: &str, config: BTreeMap<String, serde_json::Value>) -> Self {
        self.configs.lock().unwrap().insert(app.to_string(), config);
        self
    }

    pub fn with_instance_count(self, unit: &str, count: u64) -> Self {
        self.instance_counts
            .lock()
            .unwrap()
            .insert(unit.to_string(), count);
        self
    }

    pub fn with_command_output(self, command_prefix: &str, stdout: &str) -> Self {
        self.command_outputs
            .lock()
            .unwrap()
            .insert(command_prefix.to_string(), stdout.to_string());
        self
    }

    /// Fail the given operation key transiently `times` times, then
    /// succeed. Keys look like `set_config keystone`.
    pub fn fail_transiently(self, operation: &str, times: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), times);
        self
    }

    pub fn with_wait_delay(self, delay: Duration) -> Self {
        *self.wait_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|call| call.starts_with(prefix))
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) -> Result<(), JujuError> {
        let mut failures = self.transient_failures.lock().unwrap();
        let remaining = failures.get_mut(&call);
        self.calls.lock().unwrap().push(call.clone());
        if let Some(remaining) = remaining {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(JujuError::transient("connection reset by peer"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JujuClient for MockJuju {
    async fn status(&self) -> Result<ModelStatus, JujuError> {
        self.record("status".to_string())?;
        Ok(self.status.lock().unwrap().clone())
    }

    async fn get_config(
        &self,
        app: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, JujuError> {
        self.record(format!("get_config {app}"))?;
        Ok(self
            .configs
            .lock()
            .unwrap()
            .get(app)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_config(&self, app: &str, key: &str, value: &str) -> Result<(), JujuError> {
        self.record(format!("set_config {app} {key}={value}"))
    }

    async fn refresh_charm(&self, app: &str) -> Result<(), JujuError> {
        self.record(format!("refresh_charm {app}"))
    }

    async fn set_channel(&self, app: &str, channel: &Channel) -> Result<(), JujuError> {
        self.record(format!("set_channel {app} {channel}"))
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ActionResult, JujuError> {
        self.record(format!("run_action {unit} {action}"))?;
        let mut results = BTreeMap::new();
        match action {
            "instance-count" => {
                let count = self
                    .instance_counts
                    .lock()
                    .unwrap()
                    .get(unit)
                    .copied()
                    .unwrap_or(0);
                results.insert(
                    "instance-count".to_string(),
                    serde_json::json!(count.to_string()),
                );
            }
            "archive-data" => {
                results.insert(
                    "archive-deleted-rows".to_string(),
                    serde_json::json!("Nothing was archived"),
                );
            }
            "purge-data" => {
                results.insert(
                    "output".to_string(),
                    serde_json::json!("Purging stale soft-deleted rows and no data was deleted"),
                );
            }
            _ => {
                let _ = params;
            }
        }
        Ok(ActionResult {
            status: "completed".to_string(),
            results,
        })
    }

    async fn run_on_unit(&self, unit: &str, command: &str) -> Result<CommandOutput, JujuError> {
        self.record(format!("run_on_unit {unit} {command}"))?;
        let outputs = self.command_outputs.lock().unwrap();
        let stdout = outputs
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        Ok(CommandOutput { stdout, code: 0 })
    }

    async fn wait_for_idle(&self, scope: IdleScope, timeout: Duration) -> Result<(), JujuError> {
        let scope_name = match &scope {
            IdleScope::Application(app) => app.clone(),
            IdleScope::Model => "model".to_string(),
        };
        self.record(format!("wait_for_idle {scope_name}"))?;
        let delay = *self.wait_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay.min(timeout)).await;
        }
        Ok(())
    }
}

pub fn context(group: UpgradeGroup) -> UpgradeContext {
    UpgradeContext {
        model_name: None,
        group,
        backup: true,
        archive: true,
        archive_batch_size: 1000,
        purge: false,
        purge_before: None,
        force: false,
        skip_apps: vec![],
        machines: vec![],
        azs: vec![],
        auto_approve: true,
        settings: Settings {
            call_timeout: Duration::from_secs(10),
            model_retries: 5,
            retry_backoff: Duration::from_millis(10),
            standard_idle_timeout: Duration::from_secs(300),
            long_idle_timeout: Duration::from_secs(2400),
            juju_data: None,
            data_dir: std::env::temp_dir().join("cou-tests"),
        },
    }
}

pub fn machine(hostname: &str, az: &str) -> MachineStatus {
    MachineStatus {
        hostname: Some(hostname.to_string()),
        availability_zone: Some(az.to_string()),
    }
}

pub fn unit(machine: &str, workload_version: &str) -> UnitStatus {
    UnitStatus {
        workload_version: workload_version.to_string(),
        machine: machine.to_string(),
        instance_count: None,
    }
}

pub fn app(
    charm: &str,
    channel: &str,
    units: Vec<(&str, UnitStatus)>,
) -> ApplicationStatus {
    ApplicationStatus {
        charm_name: Some(charm.to_string()),
        channel: Some(channel.to_string()),
        series: Some("focal".to_string()),
        origin: Some("ch".to_string()),
        can_upgrade_to: Some(format!("ch:{charm}-999")),
        subordinate_to: vec![],
        units: units
            .into_iter()
            .map(|(name, unit)| (name.to_string(), unit))
            .collect(),
        app_status: StatusInfo::default(),
    }
}

pub fn subordinate(charm: &str, channel: &str, principal: &str) -> ApplicationStatus {
    let mut status = app(charm, channel, vec![]);
    status.subordinate_to = vec![principal.to_string()];
    status.can_upgrade_to = None;
    status
}

/// The minimal ussuri cloud: keystone + ldap subordinate, one hypervisor,
/// ceph-osd and an ovn subordinate.
pub fn minimal_cloud() -> ModelStatus {
    ModelStatus {
        model: ModelInfo {
            name: "test-model".to_string(),
        },
        machines: [
            ("0".to_string(), machine("host-0", "az-0")),
            ("1".to_string(), machine("host-1", "az-0")),
            ("2".to_string(), machine("host-2", "az-0")),
        ]
        .into(),
        applications: [
            (
                "keystone".to_string(),
                app(
                    "keystone",
                    "ussuri/stable",
                    vec![("keystone/0", unit("0", "17.0.1"))],
                ),
            ),
            (
                "keystone-ldap".to_string(),
                subordinate("keystone-ldap", "ussuri/stable", "keystone"),
            ),
            (
                "nova-compute".to_string(),
                app(
                    "nova-compute",
                    "ussuri/stable",
                    vec![("nova-compute/0", unit("1", "21.0.0"))],
                ),
            ),
            (
                "ceph-osd".to_string(),
                app(
                    "ceph-osd",
                    "octopus/stable",
                    vec![("ceph-osd/0", unit("2", "15.2.0"))],
                ),
            ),
            (
                "ovn-chassis".to_string(),
                subordinate("ovn-chassis", "22.03/stable", "nova-compute"),
            ),
        ]
        .into(),
    }
}

pub fn mock_for(status: ModelStatus) -> MockJuju {
    MockJuju::new(status)
        .with_config(
            "keystone",
            [
                ("openstack-origin".to_string(), serde_json::json!("distro")),
                (
                    "action-managed-upgrade".to_string(),
                    serde_json::json!(false),
                ),
            ]
            .into(),
        )
        .with_config(
            "nova-compute",
            [
                ("openstack-origin".to_string(), serde_json::json!("distro")),
                (
                    "action-managed-upgrade".to_string(),
                    serde_json::json!(true),
                ),
            ]
            .into(),
        )
        .with_config(
            "ceph-osd",
            [("source".to_string(), serde_json::json!("distro"))].into(),
        )
}

//! Juju CLI-backed controller client
//!
//! Drives the `juju` command-line client as a subprocess, the same way the
//! controller itself would be reached by an operator: credentials come from
//! `JUJU_DATA` (or the standard per-user path), the model from `--model`.
//! Output is requested as JSON and parsed into the typed status.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{JujuError, JujuErrorKind};
use crate::juju::{ActionResult, CommandOutput, IdleScope, JujuClient};
use crate::model::{Channel, ModelStatus};

pub struct JujuCliClient {
    model: Option<String>,
    juju_data: Option<PathBuf>,
    call_timeout: Duration,
}

impl JujuCliClient {
    pub fn new(
        model: Option<String>,
        juju_data: Option<PathBuf>,
        call_timeout: Duration,
    ) -> JujuCliClient {
        JujuCliClient {
            model,
            juju_data,
            call_timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, JujuError> {
        self.run_with_timeout(args, self.call_timeout).await
    }

    async fn run_with_timeout(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, JujuError> {
        let mut command = Command::new("juju");
        command.args(args);
        if let Some(model) = &self.model {
            command.arg("--model").arg(model);
        }
        if let Some(juju_data) = &self.juju_data {
            command.env("JUJU_DATA", juju_data);
        }
        command.stdin(Stdio::null());
        debug!("running: juju {}", args.join(" "));

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                JujuError::timeout(format!(
                    "'juju {}' did not complete within {}s",
                    args.join(" "),
                    timeout.as_secs()
                ))
            })?
            .map_err(|err| JujuError::other(format!("failed to spawn juju: {err}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Err(classify(&stderr, output.status.code()))
    }
}

/// Map juju CLI failures onto the façade's error kinds by the shape of the
/// failure message.
fn classify(stderr: &str, code: Option<i32>) -> JujuError {
    let lowered = stderr.to_lowercase();
    let kind = if lowered.contains("connection refused")
        || lowered.contains("connection reset")
        || lowered.contains("unable to connect")
        || lowered.contains("websocket")
        || lowered.contains("temporarily unavailable")
    {
        JujuErrorKind::TransientConnection
    } else if lowered.contains("timed out") || lowered.contains("timeout") {
        JujuErrorKind::Timeout
    } else if lowered.contains("permission denied") || lowered.contains("unauthorized") {
        JujuErrorKind::Permission
    } else if lowered.contains("not found") {
        JujuErrorKind::NotFound
    } else {
        JujuErrorKind::Other
    };
    JujuError::new(
        kind,
        format!(
            "juju exited with {}: {}",
            code.map_or("signal".to_string(), |c| c.to_string()),
            stderr.trim()
        ),
    )
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, JujuError> {
    serde_json::from_str(raw)
        .map_err(|err| JujuError::other(format!("cannot parse {what} output: {err}")))
}

#[async_trait]
impl JujuClient for JujuCliClient {
    async fn status(&self) -> Result<ModelStatus, JujuError> {
        let raw = self.run(&["status", "--format", "json"]).await?;
        parse_json(&raw, "status")
    }

    async fn get_config(
        &self,
        app: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, JujuError> {
        let raw = self.run(&["config", app, "--format", "json"]).await?;
        let parsed: serde_json::Value = parse_json(&raw, "config")?;

        // `juju config` nests each option as {value, default, ...}; flatten
        // to the effective values.
        let mut config = BTreeMap::new();
        if let Some(settings) = parsed.get("settings").and_then(|s| s.as_object()) {
            for (key, option) in settings {
                if let Some(value) = option.get("value") {
                    config.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(config)
    }

    async fn set_config(&self, app: &str, key: &str, value: &str) -> Result<(), JujuError> {
        let setting = format!("{key}={value}");
        self.run(&["config", app, &setting]).await?;
        Ok(())
    }

    async fn refresh_charm(&self, app: &str) -> Result<(), JujuError> {
        self.run(&["refresh", app]).await?;
        Ok(())
    }

    async fn set_channel(&self, app: &str, channel: &Channel) -> Result<(), JujuError> {
        let channel = channel.to_string();
        self.run(&["refresh", app, "--channel", &channel]).await?;
        Ok(())
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ActionResult, JujuError> {
        let mut args: Vec<String> = vec![
            "run".into(),
            unit.into(),
            action.into(),
            "--format".into(),
            "json".into(),
        ];
        for (key, value) in params {
            args.push(format!("{key}={value}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        // Action runtime is bounded by the action itself, not the call
        // timeout; give it generous room.
        let raw = self
            .run_with_timeout(&arg_refs, Duration::from_secs(600))
            .await?;
        let parsed: serde_json::Value = parse_json(&raw, "action")?;

        // `juju run` keys the result by unit name.
        let entry = parsed
            .get(unit)
            .cloned()
            .unwrap_or_else(|| parsed.clone());
        let status = entry
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("completed")
            .to_string();
        let results = entry
            .get("results")
            .and_then(|r| r.as_object())
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_default();

        if status == "failed" {
            return Err(JujuError::unit(format!(
                "action '{action}' on '{unit}' failed: {entry}"
            )));
        }
        Ok(ActionResult { status, results })
    }

    async fn run_on_unit(&self, unit: &str, command: &str) -> Result<CommandOutput, JujuError> {
        let raw = self
            .run_with_timeout(
                &["exec", "--unit", unit, "--format", "json", "--", command],
                Duration::from_secs(600),
            )
            .await?;
        let parsed: serde_json::Value = parse_json(&raw, "exec")?;
        let entry = parsed.get(unit).cloned().unwrap_or(parsed);
        let stdout = entry
            .get("stdout")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string();
        let code = entry
            .get("return-code")
            .and_then(|c| c.as_i64())
            .unwrap_or(0) as i32;
        Ok(CommandOutput { stdout, code })
    }

    async fn wait_for_idle(&self, scope: IdleScope, timeout: Duration) -> Result<(), JujuError> {
        let timeout_arg = format!("{}s", timeout.as_secs());
        let result = match &scope {
            IdleScope::Application(app) => {
                self.run_with_timeout(
                    &[
                        "wait-for",
                        "application",
                        app,
                        "--query",
                        "status=='active'",
                        "--timeout",
                        &timeout_arg,
                    ],
                    timeout + Duration::from_secs(10),
                )
                .await
            }
            IdleScope::Model => {
                self.run_with_timeout(
                    &[
                        "wait-for",
                        "model",
                        "--query",
                        "life=='alive'",
                        "--timeout",
                        &timeout_arg,
                    ],
                    timeout + Duration::from_secs(10),
                )
                .await
            }
        };

        result.map(|_| ()).map_err(|err| {
            if err.kind == JujuErrorKind::Timeout {
                JujuError::timeout(format!(
                    "{} did not reach the idle state within {}s",
                    match scope {
                        IdleScope::Application(app) => format!("application '{app}'"),
                        IdleScope::Model => "model".to_string(),
                    },
                    timeout.as_secs()
                ))
            } else {
                err
            }
        })
    }
}

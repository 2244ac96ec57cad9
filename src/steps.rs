//! Plan step tree
//!
//! A plan is a tree of [`Step`] nodes built by the planner and consumed
//! once by the engine. Steps are plain data: every leaf carries an
//! [`Action`] describing what to do, never how to do it, so plans can be
//! rendered, compared and tested without touching the controller.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::catalog::OpenStackRelease;
use crate::juju::IdleScope;
use crate::model::Channel;

/// The effect a leaf step performs when executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Wait until an application or the whole model is idle.
    WaitIdle { scope: IdleScope, timeout: Duration },
    /// Set one application config option.
    SetConfig {
        app: String,
        key: String,
        value: String,
    },
    /// Refresh the charm within its current channel.
    RefreshCharm { app: String },
    /// Switch the charm to a new channel.
    SwitchChannel { app: String, channel: Channel },
    /// apt update + dist-upgrade on one unit.
    UpgradePackages { unit: String },
    /// Run a charm action on a unit.
    RunAction {
        unit: String,
        action: String,
        params: BTreeMap<String, String>,
    },
    /// Assert the application's units report workloads at or past the
    /// target release. `units` restricts the check to a subset.
    VerifyWorkload {
        app: String,
        charm: String,
        units: Option<Vec<String>>,
        target: OpenStackRelease,
    },
    /// Assert every nova-compute unit in the model reached the target.
    VerifyNovaAtTarget { target: OpenStackRelease },
    /// Fail when the nova-compute unit still hosts instances.
    CheckEmptyHypervisor { unit: String },
    /// Run the mysqldump action on the cloud database application.
    BackupDatabase,
    /// Loop the archive-data action until nothing is left to archive.
    ArchiveData { batch_size: u32 },
    /// Purge shadow tables, optionally only rows older than `before`.
    PurgeData { before: Option<String> },
    /// Fail when the vault application reports a sealed status.
    CheckVaultNotSealed,
    /// Align ceph-mon's require-osd-release option with the running OSDs.
    EnsureOsdRelease,
}

/// Lifecycle of a plan node.
///
/// ```text
/// pending -> running -> done | failed | cancelled | aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
    /// Soft-cancelled: never started, or allowed to finish then skipped.
    Cancelled,
    /// Hard-cancelled while running.
    Aborted,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Done | StepState::Failed | StepState::Cancelled | StepState::Aborted
        )
    }
}

/// What a failing leaf does to its sequential siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Skip the remaining siblings and propagate the failure. The default.
    #[default]
    Abort,
    /// Skip the remaining siblings but report the parent as done.
    SkipRemaining,
    /// Record the failure and carry on with the next sibling.
    RecordAndContinue,
}

/// Structured record of a failed leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub application: Option<String>,
    pub unit: Option<String>,
    pub kind: String,
    pub message: String,
    pub retries: u32,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(app) = &self.application {
            write!(f, "[{app}] ")?;
        }
        if let Some(unit) = &self.unit {
            write!(f, "[{unit}] ")?;
        }
        write!(f, "{} ({})", self.message, self.kind)?;
        if self.retries > 0 {
            write!(f, " after {} retries", self.retries)?;
        }
        Ok(())
    }
}

/// One node of the plan tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub description: String,
    /// Direct children run concurrently when set.
    pub parallel: bool,
    /// Ask the operator before entering this subtree in interactive mode.
    pub prompt: bool,
    pub action: Option<Action>,
    pub on_fail: FailurePolicy,
    pub application: Option<String>,
    pub unit: Option<String>,
    pub state: StepState,
    pub failure: Option<StepFailure>,
    pub children: Vec<Step>,
}

impl Step {
    pub fn leaf(description: impl Into<String>, action: Action) -> Step {
        Step {
            description: description.into(),
            parallel: false,
            prompt: false,
            action: Some(action),
            on_fail: FailurePolicy::default(),
            application: None,
            unit: None,
            state: StepState::default(),
            failure: None,
            children: Vec::new(),
        }
    }

    pub fn group(description: impl Into<String>) -> Step {
        Step {
            description: description.into(),
            parallel: false,
            prompt: false,
            action: None,
            on_fail: FailurePolicy::default(),
            application: None,
            unit: None,
            state: StepState::default(),
            failure: None,
            children: Vec::new(),
        }
    }

    pub fn parallel_group(description: impl Into<String>) -> Step {
        let mut step = Step::group(description);
        step.parallel = true;
        step
    }

    pub fn prompted(mut self) -> Step {
        self.prompt = true;
        self
    }

    pub fn for_app(mut self, app: impl Into<String>) -> Step {
        self.application = Some(app.into());
        self
    }

    pub fn for_unit(mut self, unit: impl Into<String>) -> Step {
        self.unit = Some(unit.into());
        self
    }

    pub fn on_fail(mut self, policy: FailurePolicy) -> Step {
        self.on_fail = policy;
        self
    }

    pub fn with_children(mut self, children: Vec<Step>) -> Step {
        self.children = children;
        self
    }

    pub fn add(&mut self, step: Step) {
        self.children.push(step);
    }

    /// True when the subtree contains at least one action.
    pub fn has_work(&self) -> bool {
        self.action.is_some() || self.children.iter().any(Step::has_work)
    }

    /// All nodes, depth first, left to right.
    pub fn walk(&self) -> Vec<&Step> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.walk());
        }
        nodes
    }

    /// True once every descendant has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.state.is_terminal() && self.children.iter().all(Step::all_terminal)
    }

    /// First failure in execution order, if any.
    pub fn first_failure(&self) -> Option<&StepFailure> {
        self.walk().into_iter().find_map(|step| step.failure.as_ref())
    }

    /// Render the plan as an indented tree.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, indent: usize) {
        out.push_str(&"\t".repeat(indent));
        out.push_str(&self.description);
        out.push('\n');
        for child in &self.children {
            child.render_into(out, indent + 1);
        }
    }
}

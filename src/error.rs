//! Centralized error types for cou
//!
//! Uses thiserror for typed errors that can be matched on. The top-level
//! `CouError` carries the process exit code: configuration and
//! consistency problems exit 1, upgrade failures exit 2, cancellation
//! exits 130/137.

use thiserror::Error;

/// Top-level error type for cou operations
#[derive(Error, Debug)]
pub enum CouError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("Controller error: {0}")]
    Controller(#[from] JujuError),

    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("charmed-openstack-upgrader has been stopped safely")]
    Cancelled,

    #[error("charmed-openstack-upgrader has been terminated without waiting")]
    Aborted,
}

impl CouError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CouError::Config(_)
            | CouError::Catalog(_)
            | CouError::Model(_)
            | CouError::Analysis(_)
            | CouError::Plan(_)
            | CouError::Controller(_) => 1,
            CouError::UpgradeFailed(_) => 2,
            CouError::Cancelled => 130,
            CouError::Aborted => 137,
        }
    }
}

/// Release catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unknown OpenStack release: '{0}'")]
    UnknownRelease(String),

    #[error("Series '{0}' is not an Ubuntu LTS series supported by this tool")]
    UnsupportedSeries(String),

    #[error("Malformed {table} table: {detail}")]
    MalformedTable { table: String, detail: String },

    #[error("Cannot find a channel track for charm '{charm}' on series '{series}' at release '{release}'")]
    NoTrack {
        charm: String,
        series: String,
        release: String,
    },

    #[error("Charm '{0}' is not present in the shipped lookup tables")]
    UnknownCharm(String),
}

/// Topology construction errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Application '{application}' is missing required status field '{field}'")]
    MissingField { application: String, field: String },

    #[error("Unit '{unit}' of application '{application}' reports an empty workload version")]
    EmptyWorkloadVersion { application: String, unit: String },

    #[error("Application '{application}' runs on unsupported series '{series}'")]
    UnsupportedSeries { application: String, series: String },

    #[error("Invalid charm channel: '{0}'")]
    InvalidChannel(String),
}

/// Configuration errors, reported before any controller call
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--machine and --availability-zone are mutually exclusive")]
    MutuallyExclusiveFilters,

    #[error("--machine and --availability-zone are only valid with the 'hypervisors' group")]
    FilterRequiresHypervisors,

    #[error("Cannot skip application '{0}': only {1} may be skipped")]
    SkipAppNotAllowed(String, String),

    #[error("Invalid --purge-before-date '{0}': expected YYYY-MM-DD[ HH:mm[:ss]]")]
    InvalidPurgeDate(String),

    #[error("--purge-before-date requires --purge")]
    PurgeBeforeWithoutPurge,

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnvVar { name: String, value: String },
}

/// Cloud inconsistency errors, reported after analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Application '{application}' uses charm '{charm}' which is not supported; pass it via --skip-apps or remove it")]
    UnknownCharm { application: String, charm: String },

    #[error("Unit '{unit}' of '{application}' with workload version {version} has no compatible OpenStack release")]
    UnknownWorkloadVersion {
        application: String,
        unit: String,
        version: String,
    },

    #[error("Units of application '{application}' are running mixed OpenStack releases: {detail}")]
    MixedReleases { application: String, detail: String },

    #[error("Cloud is inconsistent: '{application}' is at '{release}' which is more than one release ahead of the cloud minimum '{current}'")]
    InconsistentCloud {
        application: String,
        release: String,
        current: String,
    },

    #[error("No upgrades available for OpenStack {release} on Ubuntu {series}; newer releases may be available after a series upgrade")]
    AlreadyAtFinalRelease { release: String, series: String },

    #[error("Cannot determine the current OpenStack release; is this a valid OpenStack cloud?")]
    NoOpenStackApplications,

    #[error("Applications span multiple Ubuntu series ({0}); upgrade the series first")]
    MixedSeries(String),
}

/// Planning errors
#[derive(Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Machines {0} do not exist or host no hypervisor")]
    UnknownMachines(String),

    #[error("Availability zones {0} do not exist or host no hypervisor")]
    UnknownAvailabilityZones(String),

    #[error("Please upgrade the control plane before the data plane")]
    ControlPlaneNotUpgraded,

    #[error("Cannot find data-plane applications; is this a valid OpenStack cloud?")]
    NoDataPlane,
}

/// Kinds the controller façade classifies its failures into. Retryability
/// policy lives in the step engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JujuErrorKind {
    TransientConnection,
    UnitError,
    Timeout,
    Permission,
    NotFound,
    Other,
}

/// Controller façade errors
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct JujuError {
    pub kind: JujuErrorKind,
    pub message: String,
}

impl JujuError {
    pub fn new(kind: JujuErrorKind, message: impl Into<String>) -> JujuError {
        JujuError {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> JujuError {
        JujuError::new(JujuErrorKind::TransientConnection, message)
    }

    pub fn unit(message: impl Into<String>) -> JujuError {
        JujuError::new(JujuErrorKind::UnitError, message)
    }

    pub fn timeout(message: impl Into<String>) -> JujuError {
        JujuError::new(JujuErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> JujuError {
        JujuError::new(JujuErrorKind::NotFound, message)
    }

    pub fn other(message: impl Into<String>) -> JujuError {
        JujuError::new(JujuErrorKind::Other, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == JujuErrorKind::TransientConnection
    }

    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            JujuErrorKind::TransientConnection => "transient-connection",
            JujuErrorKind::UnitError => "unit-error",
            JujuErrorKind::Timeout => "timeout",
            JujuErrorKind::Permission => "permission",
            JujuErrorKind::NotFound => "not-found",
            JujuErrorKind::Other => "other",
        }
    }
}

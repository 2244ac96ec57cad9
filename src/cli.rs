//! CLI definitions for cou
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{Settings, UpgradeContext, UpgradeGroup};
use crate::error::ConfigError;

#[derive(Parser)]
#[command(
    name = "cou",
    version,
    about = "Charmed OpenStack Upgrader",
    long_about = "Charmed OpenStack Upgrader (cou) upgrades a Canonical distribution of \
Charmed OpenStack.\nIt auto-detects the release of the running cloud and drives the \
upgrade to the next one."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase logging verbosity on stdout (up to -vvvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Disable output on stdout
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the steps the upgrade would take, without running anything
    Plan {
        #[command(flatten)]
        options: CommonOptions,
    },

    /// Run the cloud upgrade
    Upgrade {
        #[command(flatten)]
        options: CommonOptions,

        /// Continue with each step without prompting
        #[arg(long)]
        auto_approve: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GroupArg {
    ControlPlane,
    DataPlane,
    Hypervisors,
}

#[derive(Args)]
pub struct CommonOptions {
    /// Restrict the upgrade to one group; the whole cloud when omitted
    #[arg(value_enum)]
    pub group: Option<GroupArg>,

    /// Model to operate on; the active model when omitted
    #[arg(long)]
    pub model: Option<String>,

    /// Back up the cloud database before upgrading (default)
    #[arg(long, overrides_with = "no_backup")]
    pub backup: bool,

    /// Skip the database backup
    #[arg(long)]
    pub no_backup: bool,

    /// Archive old database data before upgrading (default)
    #[arg(long, overrides_with = "no_archive")]
    pub archive: bool,

    /// Skip the database archiving
    #[arg(long)]
    pub no_archive: bool,

    /// Batch size for the archive-data action
    #[arg(long, default_value_t = 1000)]
    pub archive_batch_size: u32,

    /// Purge shadow tables before upgrading
    #[arg(long)]
    pub purge: bool,

    /// Only purge data older than this date: YYYY-MM-DD[ HH:mm[:ss]]
    #[arg(long)]
    pub purge_before_date: Option<String>,

    /// Include hypervisors hosting VMs and skip the empty-hypervisor check
    #[arg(long)]
    pub force: bool,

    /// Applications to leave out of the upgrade (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub skip_apps: Vec<String>,

    /// Machine ids to upgrade (hypervisors group only)
    #[arg(long = "machine", short = 'm', value_delimiter = ',')]
    pub machines: Vec<String>,

    /// Availability zones to upgrade (hypervisors group only)
    #[arg(long = "availability-zone", value_delimiter = ',')]
    pub availability_zones: Vec<String>,
}

impl CommonOptions {
    /// Merge the parsed options with the environment into the validated
    /// per-invocation context.
    pub fn into_context(self, auto_approve: bool) -> Result<UpgradeContext, ConfigError> {
        let ctx = UpgradeContext {
            model_name: self.model,
            group: match self.group {
                None => UpgradeGroup::Whole,
                Some(GroupArg::ControlPlane) => UpgradeGroup::ControlPlane,
                Some(GroupArg::DataPlane) => UpgradeGroup::DataPlane,
                Some(GroupArg::Hypervisors) => UpgradeGroup::Hypervisors,
            },
            backup: !self.no_backup,
            archive: !self.no_archive,
            archive_batch_size: self.archive_batch_size,
            purge: self.purge,
            purge_before: self.purge_before_date,
            force: self.force,
            skip_apps: self.skip_apps,
            machines: self.machines,
            azs: self.availability_zones,
            auto_approve,
            settings: Settings::from_env()?,
        };
        ctx.validate()?;
        Ok(ctx)
    }
}

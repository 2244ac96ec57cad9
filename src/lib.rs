//! Charmed OpenStack Upgrader
//!
//! Plans and runs the sequenced upgrade of a Juju-managed OpenStack cloud:
//! reads the live topology, derives the current release, builds a
//! hierarchical plan of steps to the next release, and executes it with
//! controlled concurrency, confirmation gates and safe interruption.

pub mod analyze;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod juju;
pub mod logging;
pub mod model;
pub mod plan;
pub mod steps;
pub mod strategy;
pub mod ui;

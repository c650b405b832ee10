//! Connects every shard of a Discord bot's gateway fleet, waits until each shard
//! has delivered its full guild list, and reports aggregate guild statistics.

pub mod aggregate;
pub mod config;
pub mod fleet;
pub mod gateway;
pub mod ui;

pub use {
    aggregate::{GuildAggregate, GuildSnapshot},
    config::{Cli, ConfigError, OutputMode, RuntimeConfig},
    fleet::{FleetConfig, FleetError, FleetPlan, FleetRun},
};

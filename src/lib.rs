//! Township - workspace orchestrator for multi-agent towns

pub mod beads;
pub mod commands;
pub mod cost_tier;
pub mod doctor;
pub mod doltserver;
pub mod error;
pub mod fsutil;
pub mod git;
pub mod molecule;
pub mod paths;
pub mod procutil;
pub mod rigs;
pub mod session;
pub mod stepdrift;
pub mod subprocess;
pub mod telemetry;
pub mod tmux;
pub mod witness;
pub mod workers;

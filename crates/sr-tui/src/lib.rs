//! superray-tui: terminal front end for the SuperRay proxy client
//!
//! Provides the `superray-tui` binary: an interactive screen for
//! connecting, probing and switching routing modes, plus headless
//! subcommands for listing servers and managing configuration.

pub mod commands;
pub mod output;
pub mod ui;

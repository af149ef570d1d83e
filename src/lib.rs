//! # evse-engine - Energy EVSE state machine and valve controller
//!
//! The control core of an EV supply equipment device: the charger state
//! machine, session accounting, current-limit resolution, enable-window
//! scheduling and charging targets, plus a valve configuration and control
//! cluster built on the same conventions.
//!
//! ## Features
//!
//! - **Synchronous core**: every transition runs to completion on one owner
//! - **Injected time**: wall clock and timers are traits, so tests drive time
//! - **Async driver**: a Tokio runtime serializes commands, hardware inputs
//!   and timer expiries and publishes snapshots and updates
//! - **Persistence**: writable attributes and targets survive restarts
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `clock`, `timer`: Time sources and one-shot timers
//! - `evse`: EVSE state machine, cluster surface and supporting pieces
//! - `valve`: Valve configuration and control cluster
//! - `persistence`: Durable key-value attribute store
//! - `runtime`: Async driver and handle
//! - `script`: Simulation scripts for the `evse-sim` binary

pub mod clock;
pub mod config;
pub mod error;
pub mod evse;
pub mod logging;
pub mod persistence;
pub mod runtime;
pub mod script;
pub mod timer;
pub mod valve;

// Re-export commonly used types
pub use config::Config;
pub use error::{CommandError, EvseError, Result};
pub use evse::{EnergyEvseCluster, EvseStateMachine};
pub use runtime::{EvseHandle, EvseRuntime};
pub use valve::ValveController;

//! printmon-rs: connection and print-state watchdog for an OctoPrint-style
//! printer host.
//!
//! The watchdog polls the host's HTTP API, reconnects the printer's serial
//! link when it drops, and never does so while a print might be running. The
//! "might be running" decision is persisted in a small lock file so it
//! survives crashes and restarts.

pub mod client;
pub mod config;
pub mod detector;
pub mod lock;
pub mod logging;
pub mod supervisor;

pub use client::{ConnectionState, ConnectionStatus, PrinterApi, PrinterStatusClient, PrinterTelemetry, StatusError};
pub use config::{Config, ConfigError, load_config};
pub use detector::{DetectionSettings, PrintingReason, decide};
pub use lock::PrintStateLock;
pub use supervisor::{IterationReport, ReconnectSupervisor, Sleeper, SupervisorSettings, TokioSleeper};

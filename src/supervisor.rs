//! Reconnect supervisor: the watchdog's control loop.
//!
//! Each pass re-derives everything from the lock file and the host API:
//!
//! 1. read the print lock
//! 2. query the connection state (failure: connect-phase sleep, nothing else)
//! 3. reconnect only when the lock is clear and the link is `Closed`
//! 4. when no connect was issued and the link has settled, poll the printer,
//!    decide and persist the lock
//! 5. sleep: connect-phase while connecting or idle, print-phase while printing
//!
//! No error leaves the loop; every failure is logged and retried next pass.

use async_trait::async_trait;
use std::time::Duration;

use crate::client::{ConnectionState, PrinterApi};
use crate::config::{Config, ConfigError};
use crate::detector::{self, DetectionSettings};
use crate::lock::PrintStateLock;

/// Sleep between passes. Swapped out in tests to avoid real waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    pub serial_port: String,
    pub baud_rate: u32,
    pub connect_interval: Duration,
    pub print_interval: Duration,
    pub detection: DetectionSettings,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            serial_port: config.octoprint.serial_port.clone(),
            baud_rate: config.octoprint.baud,
            connect_interval: config.connect_interval()?,
            print_interval: config.print_interval()?,
            detection: config.detection(),
        })
    }
}

/// What one pass observed and decided.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    /// Lock state at the start of the pass.
    pub was_printing: bool,
    /// `None` when the connection query failed.
    pub connection: Option<ConnectionState>,
    pub connect_attempted: bool,
    pub connect_accepted: bool,
    pub telemetry_polled: bool,
    /// Belief at the end of the pass.
    pub printing: bool,
    pub sleep: Duration,
}

pub struct ReconnectSupervisor<A, S = TokioSleeper> {
    api: A,
    lock: PrintStateLock,
    settings: SupervisorSettings,
    sleeper: S,
    // A `true` decision whose lock write failed.
    unpersisted_printing: bool,
}

impl<A: PrinterApi, S: Sleeper> ReconnectSupervisor<A, S> {
    pub fn new(api: A, lock: PrintStateLock, settings: SupervisorSettings, sleeper: S) -> Self {
        Self {
            api,
            lock,
            settings,
            sleeper,
            unpersisted_printing: false,
        }
    }

    /// Run forever. Only process termination stops the watchdog.
    pub async fn run(&mut self) {
        tracing::info!(
            lock = %self.lock.path().display(),
            temp_detect = self.settings.detection.is_enabled(),
            "Reconnect supervisor started"
        );
        loop {
            self.step().await;
        }
    }

    /// Run `count` passes, sleeping after each, and return their reports.
    pub async fn run_iterations(&mut self, count: usize) -> Vec<IterationReport> {
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            reports.push(self.step().await);
        }
        reports
    }

    async fn step(&mut self) -> IterationReport {
        let report = self.run_iteration().await;
        tracing::debug!("Sleeping for {:.1} seconds", report.sleep.as_secs_f64());
        self.sleeper.sleep(report.sleep).await;
        report
    }

    /// One pass of the loop without the trailing sleep.
    pub async fn run_iteration(&mut self) -> IterationReport {
        let mut is_printing = self.lock.read().await;
        if self.unpersisted_printing && !is_printing {
            tracing::warn!("Print lock on disk is stale, keeping the unpersisted printing state");
            is_printing = true;
        }

        let mut report = IterationReport {
            was_printing: is_printing,
            connection: None,
            connect_attempted: false,
            connect_accepted: false,
            telemetry_polled: false,
            printing: is_printing,
            sleep: self.settings.connect_interval,
        };

        let status = match self.api.connection_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("Failed to query connection state, server may not be up yet: {}", e);
                return report;
            }
        };
        tracing::info!(state = %status.state, port = ?status.port, "Connection state");
        report.connection = Some(status.state.clone());

        if status.state == ConnectionState::Closed {
            if is_printing {
                tracing::info!("Print lock held, not reconnecting");
            } else {
                report.connect_attempted = true;
                report.connect_accepted = self.request_connect().await;
            }
        }

        if !report.connect_attempted && status.state.allows_status_poll() {
            report.telemetry_polled = true;
            is_printing = self.check_printing().await;
        }

        report.printing = is_printing;
        report.sleep = if !report.connect_attempted && is_printing {
            self.settings.print_interval
        } else {
            self.settings.connect_interval
        };
        report
    }

    async fn request_connect(&self) -> bool {
        let port = &self.settings.serial_port;
        let baud = self.settings.baud_rate;
        tracing::info!("Connecting on port {} with baud rate {}", port, baud);
        match self.api.request_connect(port, baud).await {
            Ok(()) => {
                tracing::info!("Connect request successful");
                true
            }
            Err(e) => {
                tracing::error!("Connect request failed: {}", e);
                false
            }
        }
    }

    /// Poll the printer, decide, and persist the decision.
    async fn check_printing(&mut self) -> bool {
        let telemetry = self.api.printer_telemetry().await;
        match &telemetry {
            Ok(t) => tracing::debug!(
                printing = t.printing,
                paused = t.paused,
                extruder_actual = t.extruder.actual,
                extruder_target = t.extruder.target,
                bed_actual = t.bed.actual,
                bed_target = t.bed.target,
                "Printer status"
            ),
            Err(e) if e.is_unparseable() => {
                tracing::error!("Error reading print status, assuming printing: {}", e)
            }
            Err(e) => tracing::error!("Failed to get print status, assuming printing: {}", e),
        }

        let reason = detector::evaluate(&telemetry, &self.settings.detection);
        let printing = reason.is_some();
        match &reason {
            Some(reason) => tracing::info!(%reason, "Printing"),
            None => tracing::info!("Not printing"),
        }

        match self.lock.write(printing).await {
            Ok(()) => self.unpersisted_printing = false,
            Err(e) => {
                tracing::error!("{}", e);
                self.unpersisted_printing = printing;
            }
        }
        printing
    }
}

//! Decides whether the printer must be treated as busy.
//!
//! Any telemetry failure or heating indicator counts as printing; only a
//! provably idle printer yields `false`.

use std::fmt;

use crate::client::{PrinterTelemetry, StatusError};

/// Temperature heuristic thresholds in °C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureThresholds {
    pub extruder: i64,
    pub bed: i64,
}

/// `thresholds == None` disables temperature detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionSettings {
    pub thresholds: Option<TemperatureThresholds>,
}

impl DetectionSettings {
    pub fn disabled() -> Self {
        Self { thresholds: None }
    }

    pub fn enabled(extruder: i64, bed: i64) -> Self {
        Self {
            thresholds: Some(TemperatureThresholds { extruder, bed }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.thresholds.is_some()
    }
}

/// First condition that made the printer count as printing.
#[derive(Debug, Clone, PartialEq)]
pub enum PrintingReason {
    TelemetryUnavailable,
    Printing,
    Paused,
    ExtruderTarget(f64),
    BedTarget(f64),
    ExtruderAboveThreshold { actual: f64, threshold: i64 },
    BedAboveThreshold { actual: f64, threshold: i64 },
}

impl fmt::Display for PrintingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintingReason::TelemetryUnavailable => write!(f, "printer status unavailable, assuming printing"),
            PrintingReason::Printing => write!(f, "printing flag set"),
            PrintingReason::Paused => write!(f, "paused flag set"),
            PrintingReason::ExtruderTarget(t) => write!(f, "extruder target {:.1}", t),
            PrintingReason::BedTarget(t) => write!(f, "bed target {:.1}", t),
            PrintingReason::ExtruderAboveThreshold { actual, threshold } => {
                write!(f, "extruder at {:.1} above threshold {}", actual, threshold)
            }
            PrintingReason::BedAboveThreshold { actual, threshold } => {
                write!(f, "bed at {:.1} above threshold {}", actual, threshold)
            }
        }
    }
}

/// Returns why the printer should be locked, or `None` when it is provably idle.
///
/// Any error counts, including a non-200 status. The host answers
/// `/api/printer` with 409 while the link sits in an error state, so an
/// errored printer ends up locked and stays disconnected once the link
/// closes. Clearing that takes a manual reconnect or removing the lock file.
pub fn evaluate(
    telemetry: &Result<PrinterTelemetry, StatusError>,
    settings: &DetectionSettings,
) -> Option<PrintingReason> {
    let telemetry = match telemetry {
        Ok(t) => t,
        Err(_) => return Some(PrintingReason::TelemetryUnavailable),
    };

    if telemetry.printing {
        return Some(PrintingReason::Printing);
    }
    if telemetry.paused {
        return Some(PrintingReason::Paused);
    }
    if telemetry.extruder.target > 0.0 {
        return Some(PrintingReason::ExtruderTarget(telemetry.extruder.target));
    }
    if telemetry.bed.target > 0.0 {
        return Some(PrintingReason::BedTarget(telemetry.bed.target));
    }
    if let Some(thresholds) = settings.thresholds {
        if telemetry.extruder.actual > thresholds.extruder as f64 {
            return Some(PrintingReason::ExtruderAboveThreshold {
                actual: telemetry.extruder.actual,
                threshold: thresholds.extruder,
            });
        }
        if telemetry.bed.actual > thresholds.bed as f64 {
            return Some(PrintingReason::BedAboveThreshold {
                actual: telemetry.bed.actual,
                threshold: thresholds.bed,
            });
        }
    }
    None
}

/// `true` when the printer must be considered printing.
pub fn decide(telemetry: &Result<PrinterTelemetry, StatusError>, settings: &DetectionSettings) -> bool {
    evaluate(telemetry, settings).is_some()
}

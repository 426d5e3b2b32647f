//! Sample export for offline analysis (JSON and CSV).

use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use swarm_domain::TrajectorySample;

use crate::error::{PersistenceError, Result};

/// CSV column order.
pub const CSV_HEADER: &str = "t,x,y,z,vx,vy,vz,battery,status,droneId";

/// Supported export encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for ExportFormat {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(PersistenceError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Serialize)]
struct SampleDocument<'a> {
    samples: &'a [TrajectorySample],
}

/// `{"samples": [...]}` document.
pub fn to_json(samples: &[TrajectorySample]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&SampleDocument { samples })?)
}

/// One header line plus one row per sample, in input order.
#[must_use]
pub fn to_csv(samples: &[TrajectorySample]) -> String {
    let mut out = String::with_capacity(64 * (samples.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    for s in samples {
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{}",
            s.t,
            s.position.x,
            s.position.y,
            s.position.z,
            s.velocity.x,
            s.velocity.y,
            s.velocity.z,
            s.battery,
            s.status,
            s.vehicle_id,
        );
    }
    out
}

/// Encode `samples` in `format`.
pub fn encode(samples: &[TrajectorySample], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => to_json(samples),
        ExportFormat::Csv => Ok(to_csv(samples)),
    }
}

/// Write samples to `path`, choosing the format from its extension.
pub fn write_file(path: &Path, samples: &[TrajectorySample]) -> Result<ExportFormat> {
    let format = ExportFormat::from_path(path)?;
    std::fs::write(path, encode(samples, format)?)?;
    tracing::info!(path = %path.display(), samples = samples.len(), "Exported trajectory log");
    Ok(format)
}

//! Terminal rendering and exit status.

use std::fmt::Write;
use verdict_reputation::{ScanResult, ScanStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Format {
    Text,
    /// One JSON object per line.
    Json,
}

/// Running totals across every result printed.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Tally {
    pub clean: usize,
    pub threats: usize,
    pub errors: usize,
}

impl Tally {
    pub fn record(&mut self, result: &ScanResult) {
        if result.has_threats() {
            self.threats += 1;
        } else if result.is_error() {
            self.errors += 1;
        } else {
            self.clean += 1;
        }
    }

    /// 2 if anything failed, else 1 if anything was flagged, else 0.
    pub fn exit_status(&self) -> u8 {
        if self.errors > 0 {
            2
        } else if self.threats > 0 {
            1
        } else {
            0
        }
    }
}

pub(crate) fn render(result: &ScanResult, format: Format) -> String {
    match format {
        Format::Json => serde_json::to_string(result).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Could not serialise result");
            String::from("{}")
        }),
        Format::Text => render_text(result),
    }
}

fn render_text(result: &ScanResult) -> String {
    let path = result.file_path.display();
    let mut out = match result.status {
        ScanStatus::Clean => format!("{path}: clean ({} engines)", result.total_engines),
        ScanStatus::Detected => format!(
            "{path}: DETECTED by {}/{} engines",
            result.detections, result.total_engines
        ),
        ScanStatus::NotFound => format!("{path}: unknown to the service"),
        ScanStatus::Error | ScanStatus::RateLimited | ScanStatus::FileTooLarge => {
            format!("{path}: error: {}", result.error_message.as_deref().unwrap_or("unknown error"))
        },
    };
    for detection in &result.detection_details {
        let _ = write!(out, "\n    {}: {}", detection.engine_name, detection.category);
        if let Some(name) = &detection.result {
            let _ = write!(out, " ({name})");
        }
    }
    if let Some(permalink) = &result.permalink {
        let _ = write!(out, "\n    {permalink}");
    }
    out
}

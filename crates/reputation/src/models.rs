//! Scan verdict models.
//!
//! These are the values handed to presentation layers: a [`ScanResult`] is
//! built once per scan attempt and never mutated afterwards.

use crate::digest::Sha256;
use crate::error::ErrorKind;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Terminal outcome of one scan attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// No engine flagged the file.
    Clean,
    /// At least one engine reported malicious or suspicious.
    Detected,
    /// The service has no record of this digest.
    NotFound,
    Error,
    RateLimited,
    FileTooLarge,
}

/// A single engine's malicious/suspicious verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub engine_name: String,
    /// One of the service's categories, e.g. `malicious` or `suspicious`.
    pub category: String,
    /// Named threat, if the engine reported one.
    pub result: Option<String>,
}

/// The verdict for one file.
///
/// Exactly one of [`is_clean`](Self::is_clean),
/// [`has_threats`](Self::has_threats) and [`is_error`](Self::is_error) holds
/// for any result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    pub file_path: PathBuf,
    /// Engines reporting malicious or suspicious.
    pub detections: u32,
    /// Engines that returned any verdict.
    pub total_engines: u32,
    /// Malicious/suspicious entries only.
    pub detection_details: Vec<Detection>,
    /// Report page URL; present whenever the digest is known, regardless of
    /// whether the lookup itself succeeded.
    pub permalink: Option<String>,
    /// Only set for [`Error`](ScanStatus::Error),
    /// [`RateLimited`](ScanStatus::RateLimited) and
    /// [`FileTooLarge`](ScanStatus::FileTooLarge).
    pub error_message: Option<String>,
}

impl ScanResult {
    fn new(status: ScanStatus, file_path: impl Into<PathBuf>) -> Self {
        Self {
            status,
            file_path: file_path.into(),
            detections: 0,
            total_engines: 0,
            detection_details: Vec::new(),
            permalink: None,
            error_message: None,
        }
    }

    /// Build a verdict from engine counts and the flagged entries.
    ///
    /// Status is [`Detected`](ScanStatus::Detected) when `detections > 0`,
    /// [`Clean`](ScanStatus::Clean) otherwise.
    pub fn verdict(
        file_path: impl Into<PathBuf>,
        detections: u32,
        total_engines: u32,
        detection_details: Vec<Detection>,
    ) -> Self {
        let status = if detections > 0 { ScanStatus::Detected } else { ScanStatus::Clean };
        Self {
            detections,
            total_engines,
            detection_details,
            ..Self::new(status, file_path)
        }
    }

    /// The service has never seen this file.
    pub fn not_found(file_path: impl Into<PathBuf>) -> Self {
        Self::new(ScanStatus::NotFound, file_path)
    }

    /// Fold an error into a result; the status family comes from
    /// [`ErrorKind::status`] and the message from its `Display`.
    pub fn failed(file_path: impl Into<PathBuf>, kind: &ErrorKind) -> Self {
        Self {
            error_message: Some(kind.to_string()),
            ..Self::new(kind.status(), file_path)
        }
    }

    /// Attach the report URL for `digest`.
    pub fn with_permalink(mut self, gui_url: &str, digest: &Sha256) -> Self {
        self.permalink = Some(digest.permalink(gui_url));
        self
    }

    /// Re-home a result produced for another path (e.g. a lookup by digest).
    pub fn with_file_path(mut self, file_path: impl AsRef<Path>) -> Self {
        self.file_path = file_path.as_ref().to_path_buf();
        self
    }

    pub fn is_clean(&self) -> bool {
        matches!(self.status, ScanStatus::Clean | ScanStatus::NotFound)
    }

    pub fn has_threats(&self) -> bool {
        self.status == ScanStatus::Detected
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, ScanStatus::Error | ScanStatus::RateLimited | ScanStatus::FileTooLarge)
    }
}

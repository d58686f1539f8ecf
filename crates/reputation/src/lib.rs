//! File reputation client.
//!
//! Hashes local files, looks the digest up against a VirusTotal-compatible
//! API, uploads files the service has never seen and waits for their
//! analysis. Every scan produces a [`ScanResult`]; nothing here panics or
//! returns an error to the caller for a failed scan.

mod analysis;
pub mod cancel;
mod client;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod limiter;
mod lookup;
mod models;
mod scan;
mod settings;
pub mod transport;

pub use crate::cancel::CancelHandle;
pub use crate::client::{Client, CredentialSource};
pub use crate::digest::{FileHasher, Sha256, Sha256Hasher};
pub use crate::dispatch::{ChannelScheduler, Completion, CompletionScheduler, Completions, channel};
pub use crate::models::{Detection, ScanResult, ScanStatus};
pub use crate::settings::{DEFAULT_API_URL, DEFAULT_GUI_URL, Settings};

//! Local media capture and teardown
//!
//! - `track`: the shared local stream and its tracks
//! - `capture`: camera/microphone providers
//! - `controller`: acquisition with degradation, toggles and the two-phase release

pub mod capture;
pub mod controller;
pub mod track;

pub use capture::{CaptureConstraints, CaptureProvider, CapturedMedia, DeviceHandle, SyntheticCapture};
pub use controller::MediaSessionController;
pub use track::{LocalStream, LocalTrack, ReleasePhase};

use std::error::Error;
use std::fmt;

/// Capture-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused access
    PermissionDenied(String),
    /// No such device
    DeviceUnavailable(String),
    /// Capture failed after the device opened
    Capture(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::PermissionDenied(what) => write!(f, "Permission denied: {}", what),
            MediaError::DeviceUnavailable(what) => write!(f, "Device unavailable: {}", what),
            MediaError::Capture(msg) => write!(f, "Capture error: {}", msg),
        }
    }
}

impl Error for MediaError {}

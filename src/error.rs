use thiserror::Error;

/// Failures of the two acquisition paths.
///
/// Only `PermissionDenied` and `TotalAcquisitionFailure` ever reach the
/// presenter; the other two are absorbed by the arbiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    #[error("remote control-plane unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("unexpected control-plane message: {0}")]
    ProtocolMismatch(String),

    #[error("no audio source could be acquired: {0}")]
    TotalAcquisitionFailure(String),
}

impl AcquisitionError {
    /// Stable identifier sent to the display process.
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::PermissionDenied(_) => "permission_denied",
            AcquisitionError::RemoteUnavailable(_) => "remote_unavailable",
            AcquisitionError::ProtocolMismatch(_) => "protocol_mismatch",
            AcquisitionError::TotalAcquisitionFailure(_) => "total_acquisition_failure",
        }
    }
}

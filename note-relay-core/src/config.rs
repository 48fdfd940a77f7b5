use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::Visibility;
use crate::error::RelayError;

/// How every note is published. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteView {
    pub visibility: Visibility,
    pub local_only: bool,
}

/// What the relay does with a failed upload, note or reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and keep relaying.
    #[default]
    LogAndContinue,
    /// Stop the relay loop with the failure.
    Propagate,
}

impl FailurePolicy {
    /// Applies the policy to the outcome of one step. `Ok(None)` means the step
    /// failed and the failure was swallowed; the step itself has already logged
    /// it with full context.
    pub fn settle<T>(self, result: Result<T, RelayError>) -> Result<Option<T>, RelayError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => match self {
                FailurePolicy::LogAndContinue => {
                    debug!(error = %e, "Continuing after failed relay step");
                    Ok(None)
                }
                FailurePolicy::Propagate => Err(e),
            },
        }
    }
}

/// Settings the relay loop consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Name of the drive folder that receives attachments.
    pub upload_folder: String,
    pub view: NoteView,
    /// Appended to every note after a blank line.
    #[serde(default)]
    pub footer: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl RelayConfig {
    pub fn trace_loaded(&self) {
        info!(
            upload_folder = %self.upload_folder,
            visibility = %self.view.visibility,
            local_only = self.view.local_only,
            failure_policy = ?self.failure_policy,
            "Loaded RelayConfig"
        );
        debug!(?self, "RelayConfig loaded (full debug)");
    }
}

use thiserror::Error;

/// Failure classes a scenario step can end with.
///
/// Library code returns `anyhow::Result` and wraps these, so callers classify a
/// failure with [`HarnessError::find`] instead of matching on message text.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unable to find an available port after {attempts} attempts")]
    AllocationExhausted { attempts: usize },

    #[error("failed to run agent container: {0}")]
    ContainerStartFailure(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("{method} {url} failed with status={status} (expected {expected}): {body}")]
    UnexpectedStatus {
        method: String,
        url: String,
        status: u16,
        expected: u16,
        body: String,
    },

    #[error("namespace {namespace} references unknown {kind} {target}")]
    DanglingReference {
        namespace: String,
        kind: &'static str,
        target: String,
    },

    #[error("assertion failed: {0}")]
    AssertionFailure(String),
}

impl HarnessError {
    pub fn find(err: &anyhow::Error) -> Option<&HarnessError> {
        err.chain().find_map(|cause| cause.downcast_ref::<HarnessError>())
    }

    pub fn is_container_not_found(err: &anyhow::Error) -> bool {
        matches!(Self::find(err), Some(HarnessError::ContainerNotFound(_)))
    }

    pub fn unexpected_status(err: &anyhow::Error) -> Option<u16> {
        match Self::find(err) {
            Some(HarnessError::UnexpectedStatus { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

//! Reconcile error taxonomy: only `Transient` is ever returned
//! up to the controller runtime to trigger a requeue. `User` and `Fatal`
//! outcomes are written to `status.message` by the caller and then
//! swallowed so the runtime does not retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("transient failure, will requeue: {0}")]
    Transient(String),

    #[error("invalid request: {0}")]
    User(String),

    #[error("unrecoverable: {0}")]
    Fatal(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Registry(#[from] automotive_build_registry::RegistryError),
}

impl ReconcileError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Kube(err) => is_transient_kube_error(err),
            Self::Registry(err) => err.is_transient(),
            Self::User(_) | Self::Fatal(_) => false,
        }
    }

    /// The message written verbatim to `status.message`.
    #[must_use]
    pub fn status_message(&self) -> String {
        self.to_string()
    }
}

fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code >= 500 || resp.code == 429,
        kube::Error::Service(_) | kube::Error::HyperError(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_fatal_are_distinguished() {
        assert!(ReconcileError::Transient("timeout".into()).is_transient());
        assert!(!ReconcileError::Fatal("owned by another resource".into()).is_transient());
        assert!(!ReconcileError::User("bad manifest".into()).is_transient());
    }
}

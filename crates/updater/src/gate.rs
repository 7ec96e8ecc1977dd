//! Operator authorization in front of the pipeline.

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::UpdateError;
use crate::pipeline::UpdatePipeline;
use crate::record::{PendingUpdate, RollbackOutcome, UploadedFile};
use crate::scanner::ValidationVerdict;
use crate::store::UpdateStore;
use crate::tree::LiveTree;
use extractor::ProgressCallback;

/// Decides whether an operator session token is valid right now.
pub trait SessionGate: Send + Sync {
    fn is_authorized(&self, token: &str) -> bool;
}

/// Accepts a single configured token, optionally until an expiry.
#[derive(Debug, Clone)]
pub struct StaticTokenGate {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl StaticTokenGate {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: Some(token.into()),
            expires_at,
        }
    }

    /// Gate built from the configured operator token. With no token
    /// configured nothing is authorized.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            token: config.operator_token.clone().filter(|t| !t.is_empty()),
            expires_at: config.token_expires_at,
        }
    }
}

impl SessionGate for StaticTokenGate {
    fn is_authorized(&self, token: &str) -> bool {
        let Some(expected) = &self.token else {
            return false;
        };
        if self.expires_at.is_some_and(|at| Utc::now() >= at) {
            return false;
        }
        expected.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

/// The pipeline's mutating operations behind a [`SessionGate`].
pub struct UpdateService<S: UpdateStore, T: LiveTree, G: SessionGate> {
    pipeline: UpdatePipeline<S, T>,
    gate: G,
}

impl<S: UpdateStore, T: LiveTree, G: SessionGate> UpdateService<S, T, G> {
    pub fn new(pipeline: UpdatePipeline<S, T>, gate: G) -> Self {
        Self { pipeline, gate }
    }

    pub fn pipeline(&self) -> &UpdatePipeline<S, T> {
        &self.pipeline
    }

    fn authorize(&self, token: &str, operation: &str) -> Result<(), UpdateError> {
        if self.gate.is_authorized(token) {
            Ok(())
        } else {
            warn!(target: "security", operation, "Unauthorized operator request");
            Err(UpdateError::Unauthorized)
        }
    }

    pub fn scan(&self, file: &UploadedFile) -> ValidationVerdict {
        self.pipeline.scan(file)
    }

    pub fn upload(
        &self,
        token: &str,
        file: &UploadedFile,
        version: Option<String>,
        description: Option<String>,
    ) -> Result<PendingUpdate, UpdateError> {
        self.authorize(token, "upload")?;
        self.pipeline.create_pending_update(file, version, description)
    }

    pub fn apply(&self, token: &str, id: Uuid) -> Result<PendingUpdate, UpdateError> {
        self.authorize(token, "apply")?;
        self.pipeline.apply(id)
    }

    pub fn apply_with_progress(
        &self,
        token: &str,
        id: Uuid,
        progress_cb: &ProgressCallback,
    ) -> Result<PendingUpdate, UpdateError> {
        self.authorize(token, "apply")?;
        self.pipeline.apply_with_progress(id, progress_cb)
    }

    pub fn rollback(&self, token: &str) -> Result<RollbackOutcome, UpdateError> {
        self.authorize(token, "rollback")?;
        self.pipeline.rollback()
    }

    pub fn delete(&self, token: &str, id: Uuid) -> Result<(), UpdateError> {
        self.authorize(token, "delete")?;
        self.pipeline.delete(id)
    }

    pub fn list_updates(&self) -> Result<Vec<PendingUpdate>, UpdateError> {
        self.pipeline.list_updates()
    }

    pub fn get(&self, id: Uuid) -> Result<PendingUpdate, UpdateError> {
        self.pipeline.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_static_token() {
        let gate = StaticTokenGate::new("s3cret", None);
        assert!(gate.is_authorized("s3cret"));
        assert!(!gate.is_authorized("s3cre"));
        assert!(!gate.is_authorized(""));
    }

    #[test]
    fn test_expired_token() {
        let past = StaticTokenGate::new("s3cret", Some(Utc::now() - Duration::minutes(1)));
        assert!(!past.is_authorized("s3cret"));

        let future = StaticTokenGate::new("s3cret", Some(Utc::now() + Duration::hours(1)));
        assert!(future.is_authorized("s3cret"));
    }

    #[test]
    fn test_unconfigured_gate_denies_everything() {
        let gate = StaticTokenGate::from_config(&PipelineConfig::default());
        assert!(!gate.is_authorized(""));
        assert!(!gate.is_authorized("anything"));
    }
}

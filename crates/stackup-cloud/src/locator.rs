//! Resource lookup by stable name

use crate::error::Result;
use crate::provider::CloudProvider;
use crate::resource::{Located, ResourceSpec};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Finds existing resources by kind and stable name.
///
/// "Not found" becomes `None`. A failed query (auth, malformed filter,
/// throttling that outlasted the retries) stays an error so it is never
/// mistaken for absence.
#[derive(Clone)]
pub struct ResourceLocator {
    provider: Arc<dyn CloudProvider>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ResourceLocator {
    pub fn new(provider: Arc<dyn CloudProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop retrying lookups once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn locate(&self, spec: &ResourceSpec) -> Result<Option<Located>> {
        let key = spec.key();
        match self
            .retry
            .run(&key, &self.cancel, || self.provider.locate(spec))
            .await
        {
            Ok(found) => {
                tracing::debug!(
                    resource = %key,
                    found = found.is_some(),
                    "Located resource"
                );
                Ok(found)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(resource = %key, "Resource not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Every resource carrying the spec's name, including ones `locate`
    /// would not reuse (stopped or duplicate instances)
    pub async fn locate_all(&self, spec: &ResourceSpec) -> Result<Vec<Located>> {
        let key = spec.key();
        match self
            .retry
            .run(&key, &self.cancel, || self.provider.locate_all(spec))
            .await
        {
            Ok(found) => {
                if found.len() > 1 {
                    tracing::warn!(resource = %key, count = found.len(), "Several resources share one name");
                }
                Ok(found)
            }
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

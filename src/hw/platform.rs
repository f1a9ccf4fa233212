use std::fmt::Debug;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::HeartRateError;

/// Adapter readiness and permission checks performed before any transport call.
#[async_trait]
pub trait PlatformManager: Send + Sync + Debug {
    /// Fails with `NotSupported` or `NotEnabled` when the adapter is unusable.
    async fn validate_adapter_state(&self) -> Result<(), HeartRateError>;

    /// Fails with `PermissionDenied` when the user refuses Bluetooth access.
    async fn check_and_request_permissions(&self) -> Result<(), HeartRateError>;
}

/// Runs both platform checks in order.
#[instrument(skip(platform), level = "debug")]
pub(crate) async fn ensure_ready(platform: &dyn PlatformManager) -> Result<(), HeartRateError> {
    platform.validate_adapter_state().await?;
    platform.check_and_request_permissions().await?;
    debug!("platform checks passed");
    Ok(())
}

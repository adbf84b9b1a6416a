use std::sync::Arc;

use tracing::info;

use super::btleplug_backend::BtleplugPlatform;
use super::fake_backend::{FakePlatform, FakePlatformConfig};
use super::platform::{BlePlatform, PlatformEventSink};
use crate::error::InteractionError;

/// Runtime BLE backend selection.
#[derive(Debug)]
pub enum PlatformBackend {
    Real,
    Fake(FakePlatformConfig),
}

/// Builds the platform binding for the selected backend, wired to `sink`.
///
/// # Errors
///
/// Returns an error when the real backend finds no usable adapter.
pub async fn platform_from_backend(
    backend: PlatformBackend,
    sink: PlatformEventSink,
) -> Result<Arc<dyn BlePlatform>, InteractionError> {
    let platform: Arc<dyn BlePlatform> = match backend {
        PlatformBackend::Real => Arc::new(BtleplugPlatform::new(sink).await?),
        PlatformBackend::Fake(config) => {
            info!("using fake BLE backend");
            Arc::new(FakePlatform::scripted(config, sink))
        }
    };

    Ok(platform)
}

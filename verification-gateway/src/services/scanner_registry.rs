use std::sync::Arc;

use dashmap::DashMap;

use crate::services::camera::CameraProvider;
use crate::services::decoder::FrameDecoder;
use crate::services::scanner::{ScannerController, ScannerOptions};
use crate::services::verification_store::VerificationBackends;

/// The live scanner of each signed-in user. A scanner exists only while its
/// user is on the scan surface.
pub struct ScannerRegistry {
    scanners: DashMap<String, ScannerController>,
    cameras: Arc<dyn CameraProvider>,
    decoder: Arc<dyn FrameDecoder>,
    verification: VerificationBackends,
    options: ScannerOptions,
}

impl ScannerRegistry {
    pub fn new(
        cameras: Arc<dyn CameraProvider>,
        decoder: Arc<dyn FrameDecoder>,
        verification: VerificationBackends,
        options: ScannerOptions,
    ) -> Self {
        Self {
            scanners: DashMap::new(),
            cameras,
            decoder,
            verification,
            options,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<ScannerController> {
        self.scanners.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn get_or_create(&self, user_id: &str) -> ScannerController {
        self.scanners
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(user_id, "Creating scanner");
                ScannerController::new(
                    self.cameras.camera_for(user_id),
                    self.decoder.clone(),
                    self.verification.store_for(user_id),
                    self.options.clone(),
                )
            })
            .value()
            .clone()
    }

    /// Unmount: drops the user's scanner after forcing it back to `Ready`.
    pub fn teardown(&self, user_id: &str) {
        if let Some((_, scanner)) = self.scanners.remove(user_id) {
            tracing::debug!(user_id, state = scanner.state().name(), "Tearing down scanner");
            scanner.teardown();
        }
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

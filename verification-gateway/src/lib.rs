pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use std::sync::Arc;

use config::Settings;
use services::{
    access::{AccessGuard, GuardRoutes},
    backend_client::BackendClient,
    camera::{CameraProvider, RelayHub},
    decoder::{FrameDecoder, QrFrameDecoder},
    kv_store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore},
    scanner::ScannerOptions,
    scanner_registry::ScannerRegistry,
    verification_store::VerificationBackends,
};

/// The hardware-facing collaborators. Production wires the browser relay,
/// the QR decoder and a file-backed durable store; tests swap in fakes.
pub struct Platform {
    pub durable: Arc<dyn KeyValueStore>,
    pub relay: Arc<RelayHub>,
    pub cameras: Arc<dyn CameraProvider>,
    pub decoder: Arc<dyn FrameDecoder>,
}

impl Platform {
    pub fn production(settings: &Settings) -> anyhow::Result<Self> {
        let durable = FileKeyValueStore::open(&settings.storage.durable_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to open durable store {}: {}",
                settings.storage.durable_path.display(),
                e
            )
        })?;
        let relay = Arc::new(RelayHub::new());
        Ok(Self {
            durable: Arc::new(durable),
            cameras: relay.clone(),
            relay,
            decoder: Arc::new(QrFrameDecoder::new()),
        })
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub backend: Arc<BackendClient>,
    pub guard: Arc<AccessGuard>,
    pub verification: VerificationBackends,
    pub scanners: Arc<ScannerRegistry>,
    pub relay: Arc<RelayHub>,
}

impl AppState {
    pub fn new(settings: Settings, platform: Platform) -> anyhow::Result<Self> {
        let backend = Arc::new(
            BackendClient::new(settings.backend.clone())
                .map_err(|e| anyhow::anyhow!("Failed to build backend client: {}", e))?,
        );

        let verification = VerificationBackends::new(
            platform.durable,
            Arc::new(MemoryKeyValueStore::new()),
            settings.storage.verification_key_prefix.clone(),
        );

        let guard = Arc::new(AccessGuard::new(
            GuardRoutes::from_settings(&settings.routes),
            verification.clone(),
            backend.clone(),
        ));

        let scanners = Arc::new(ScannerRegistry::new(
            platform.cameras,
            platform.decoder,
            verification.clone(),
            ScannerOptions::from_settings(&settings.scanner, &settings.routes),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            backend,
            guard,
            verification,
            scanners,
            relay: platform.relay,
        })
    }

    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let platform = Platform::production(&settings)?;
        Self::new(settings, platform)
    }
}

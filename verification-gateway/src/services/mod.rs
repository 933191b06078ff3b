pub mod access;
pub mod backend_client;
pub mod camera;
pub mod decoder;
pub mod kv_store;
pub mod metrics;
pub mod scanner;
pub mod scanner_registry;
pub mod verification_store;

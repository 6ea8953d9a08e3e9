//! Beem Energy Library
//!
//! This library polls the Beem cloud API for battery and BeemBox telemetry and
//! turns every refresh into sensor values, including sign-split power readings
//! and integrated energy totals.

pub mod beem_api;
pub mod config;
pub mod coordinator;
pub mod derived;
pub mod energy_integrator;
pub mod errors;
pub mod models;
pub mod sensor;
pub mod setup;
pub mod snapshot;
pub mod storage;

// Re-export commonly used types for easier access
pub use beem_api::BeemApiClient;
pub use coordinator::{CoordinatorHandle, CoordinatorTask, UpdateCoordinator};
pub use derived::SplitMode;
pub use energy_integrator::EnergyIntegrator;
pub use errors::{BeemError, BeemResult, UpdateFailed};
pub use sensor::{BeemSensor, EntityRegistry, SensorSet};
pub use setup::{setup_entry, BeemEntry};
pub use snapshot::Snapshot;
pub use storage::{JsonFileStore, MemoryStore, OptionsStore, SecretStore};

//! agrisense-alert: Farm metadata enrichment and alert delivery.
//!
//! This crate holds everything on the network side of a report:
//!
//! - [`settings`]: environment-driven configuration.
//! - [`metadata`]: inline metadata and the farm registry lookup.
//! - [`advisory`]: the alert payload and its advisory text.
//! - [`dispatch`]: retrying delivery on a detached task.
//!
//! The NDVI computation itself lives in `agrisense-ndvi` and has no
//! network dependencies.

pub mod advisory;
pub mod dispatch;
pub mod error;
pub mod metadata;
pub mod settings;

pub use advisory::AlertPayload;
pub use dispatch::{AlertTransport, DeliveryOutcome, Dispatcher, HttpTransport, RetryPolicy};
pub use error::{AlertError, SettingsError, TransportError};
pub use metadata::{
    FarmMetadata, FarmRegistry, HttpFarmRegistry, InlineMetadata, MetadataEnricher, Owner,
    RegistryRecord,
};
pub use settings::{AlertSettings, RegistrySettings};

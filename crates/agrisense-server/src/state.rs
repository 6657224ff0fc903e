//! Shared, immutable application state.

use std::sync::Arc;

use agrisense_alert::{AlertError, Dispatcher, MetadataEnricher};
use agrisense_ndvi::PipelineConfig;

use crate::config::Settings;

/// Everything a request handler needs. Built once at startup and never
/// mutated.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: PipelineConfig,
    pub enricher: MetadataEnricher,
    pub dispatcher: Dispatcher,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire up the pipeline, registry client, and dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an [`AlertError`] if the registry URL is invalid or an HTTP
    /// client cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self, AlertError> {
        let pipeline = PipelineConfig {
            engine: settings.engine,
            ..PipelineConfig::default()
        };
        Ok(Self {
            pipeline,
            enricher: MetadataEnricher::from_settings(&settings.registry)?,
            dispatcher: Dispatcher::from_settings(&settings.alert)?,
        })
    }
}

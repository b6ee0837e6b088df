//! # Application State Management
//!
//! Shared state handed to every HTTP handler and, through them, to every
//! media-stream connection.
//!
//! ## Arc Pattern:
//! - **AppConfig** is read-only after startup, so a plain `Arc` is enough
//! - **CallServices** holds the collaborators as `Arc<dyn Trait>` and the
//!   call registry, which does its own locking
//! - Cloning `AppState` is cheap; actix clones it per worker

use crate::call::{
    CallEventSink, CallRegistry, CallServices, FunctionExecutor, TracingEventSink, UnavailableFunctions,
};
use crate::config::AppConfig;
use crate::model::{ModelConnector, ModelSessionOptions, WebSocketConnector};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: CallServices,
    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    /// Build state with explicit collaborators.
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn ModelConnector>,
        events: Arc<dyn CallEventSink>,
        functions: Arc<dyn FunctionExecutor>,
    ) -> Self {
        let services = CallServices {
            connector,
            events,
            functions,
            registry: Arc::new(CallRegistry::new(config.calls.max_concurrent_calls)),
            calls: config.calls.clone(),
        };
        Self {
            config: Arc::new(config),
            services,
            start_time: Instant::now(),
        }
    }

    /// Build state for the shipped binary: a real model connection, calls
    /// reported to the log, and no business functions.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let options = ModelSessionOptions {
            model: config.model.model.clone(),
            voice: config.model.voice.clone(),
            language_code: config.model.language_code.clone(),
            system_instruction: config.model.system_instruction.clone(),
            greeting_prompt: config.model.greeting_prompt.clone(),
            greeting_delay: config.model.greeting_delay(),
            function_declarations: config.model.load_function_declarations()?,
        };
        let connector = Arc::new(WebSocketConnector::new(config.model.connect_url(), options));

        Ok(Self::new(
            config,
            connector,
            Arc::new(TracingEventSink),
            Arc::new(UnavailableFunctions),
        ))
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

//! Model backends
//!
//! Every backend turns a normalized request into a report, answers follow-up
//! questions and optionally synthesizes speech. Backends make exactly one
//! upstream call per operation: retries and timeouts belong to the gateway.

pub mod common;
pub mod demo;
pub mod hosted;
pub mod local;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{BackendKind, GatewayConfig, ServiceConfig};
use crate::error::Result;
use crate::report::Report;
use crate::request::{AnalyzeRequest, FollowUpRequest};

pub use demo::DemoBackend;
pub use hosted::HostedBackend;
pub use local::LocalBackend;

/// Result of a speech request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutput {
    Audio { mime_type: String, bytes: Vec<u8> },
    /// The backend has no speech capability
    Unsupported { reason: String },
}

/// A model provider the gateway can dispatch to
#[async_trait]
pub trait Backend: Send + Sync {
    /// `"<provider>:<model>"`, part of every cache key
    fn identity(&self) -> &str;

    /// Produce a report for a normalized request
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Report>;

    /// Answer a question about a previously produced report
    async fn follow_up(&self, request: &FollowUpRequest) -> Result<String>;

    /// Synthesize speech for already-bounded text
    async fn speak(&self, text: &str) -> Result<SpeechOutput>;
}

/// Build the backend selected by configuration
pub fn from_config(config: &GatewayConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Demo => Arc::new(DemoBackend::new()),
        BackendKind::Hosted => {
            config.hosted.validate()?;
            Arc::new(HostedBackend::new(config.hosted.clone())?)
        }
        BackendKind::Local => {
            config.local.validate()?;
            Arc::new(LocalBackend::new(config.local.clone())?)
        }
    };

    info!(backend = %backend.identity(), "Model backend selected");
    Ok(backend)
}

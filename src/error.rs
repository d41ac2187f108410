// Error taxonomy
//
// Typed root causes raised inside the backend. They travel wrapped in
// anyhow so call sites keep `.context(..)` chains, and the facade can
// still downcast to decide between a sentinel handle, `false`, or abort.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GfxError {
    /// No usable adapter, missing layer/extension/queue family. Fatal to startup.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Shader, buffer, pipeline, render pass or framebuffer could not be built.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),

    /// Submit or present reported an error. The frame is dropped.
    #[error("submission failed: {0}")]
    Submission(String),

    /// Object used outside its documented lifecycle (double destroy, use after shutdown).
    #[error("lifecycle violation: {0}")]
    Lifecycle(String),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl GfxError {
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::ResourceCreation(msg.into())
    }

    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }
}

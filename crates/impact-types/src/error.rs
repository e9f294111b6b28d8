// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Error
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImpactError {
    /// User supplied an inconsistent configuration. Raised synchronously
    /// at build-up time, never from the hot loop.
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),

    /// A derived quantity became non-finite. Surfaced from the next
    /// step's validity check; the step that produced it is the culprit.
    #[error("Numeric failure in '{quantity}': {message}")]
    NumericFailure { quantity: String, message: String },

    /// Allocation or thread-pool failure.
    #[error("Resource failure: {0}")]
    ResourceFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ImpactResult<T> = Result<T, ImpactError>;

impl ImpactError {
    pub fn invalid_setup(message: impl Into<String>) -> Self {
        ImpactError::InvalidSetup(message.into())
    }

    pub fn numeric(quantity: impl Into<String>, message: impl Into<String>) -> Self {
        ImpactError::NumericFailure {
            quantity: quantity.into(),
            message: message.into(),
        }
    }
}

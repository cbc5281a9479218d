use thiserror::Error;

use crate::catalog::{ImportError, StoreError};
use crate::delivery::DeliveryError;
use crate::extract::ExtractionError;
use crate::record::ValidationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ExtractionError),

    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("Catalog error: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),
}

impl Error {
    /// Errors that must stop the process instead of being contained per event.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Delivery(e) => e.is_fatal(),
            Self::Validation(_) | Self::Store(_) | Self::Import(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! # Error Types
//!
//! This module defines error types used throughout the folio engine.
//!
//! The variants follow how a failure is surfaced to the user:
//!
//! | Variant | Raised by | Effect |
//! |---------|-----------|--------|
//! | `Validation` | workflow transitions | transition blocked, shown inline |
//! | `Persistence` | any store call | transient notice, local state unchanged or reverted |
//! | `Lookup` | geography service | downstream options cleared, form stays usable |
//! | `Extraction` | PDF value extraction | notice, other values untouched |
//! | `Conflict` | export while status disallows it | action blocked with explanation |

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for folio operations
#[derive(Debug, Error)]
pub enum FolioError {
    /// A required field is missing before a transition
    #[error("Validation error: {0}")]
    Validation(String),

    /// A store call failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Geography lookup failed
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// PDF value extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The action is not allowed in the report's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Image decoding, encoding or editing error
    #[error("Image error: {0}")]
    Image(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for FolioError {
    fn from(e: image::ImageError) -> Self {
        FolioError::Image(e.to_string())
    }
}

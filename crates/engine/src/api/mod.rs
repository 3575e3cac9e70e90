//! Market data vendor clients

pub mod yahoo;

use thiserror::Error;

/// Vendor failures the adapter needs to tell apart from plain transport errors
#[derive(Error, Debug)]
pub enum VendorError {
    #[error("symbol not found: {0}")]
    NotFound(String),
}

//! Shared types: the error taxonomy and cooperative cancellation

mod cancel;
mod error;

pub use cancel::CancelFlag;
pub use error::{DatastoreError, Result};

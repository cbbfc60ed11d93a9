//! Small shared helpers.
//!
//! - [`backoff`] - Exponential delay computation for retrying failed reconciles

pub mod backoff;

pub use backoff::exponential_backoff_delay;

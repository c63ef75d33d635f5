//! HTTP request handlers.
//!
//! - [`sessions`]: open, inspect, stage files into, and finish media modal sessions
//!
//! Handlers return [`crate::errors::Result`]; errors render through
//! [`crate::errors::Error`]'s `IntoResponse`.

pub mod sessions;

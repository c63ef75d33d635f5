//! API request and response data models.
//!
//! - [`sessions`]: session creation overrides, session snapshots, selection and event payloads

pub mod sessions;

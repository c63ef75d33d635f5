//! HTTP surface for the media modal.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response bodies
//!
//! All session routes live under `/api/v1/sessions`. A session is opened, a file is staged
//! and metadata entered, then `create` or `cancel` returns the events for the editor and
//! discards the session.

pub mod handlers;
pub mod models;

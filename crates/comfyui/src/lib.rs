//! ComfyUI REST client library.
//!
//! Provides the HTTP wrapper for workflow submission and history
//! retrieval, plus the typed history model used to locate a finished
//! prompt's output images.

pub mod api;
pub mod history;

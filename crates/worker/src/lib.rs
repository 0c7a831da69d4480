//! Job dispatcher for the head-swap ComfyUI workflow.
//!
//! A job carries two base64 images. The [`dispatcher::Dispatcher`] stages
//! them in ComfyUI's input directory, binds them into a private copy of the
//! workflow template by node title, submits the graph, polls history until
//! the output image appears, and returns it base64-encoded. Every file the
//! job created is removed when the job ends, whatever the outcome.
//!
//! The HTTP surface (`POST /run`, `GET /health`) is a thin axum layer over
//! the dispatcher; see [`router::build_app_router`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod router;
pub mod routes;
pub mod staging;
pub mod state;

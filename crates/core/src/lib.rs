//! Domain logic shared by the provisioner and the job dispatcher.
//!
//! Everything in this crate is independent of the HTTP stack: artifact
//! descriptions and their on-disk layout, the structured-tensor header
//! check, disk probing, retry policy, the workflow template, and the job
//! input/output schema.

pub mod artifact;
pub mod config;
pub mod disk;
pub mod error;
pub mod job;
pub mod manifest;
pub mod retry;
pub mod safetensors;
pub mod workflow;

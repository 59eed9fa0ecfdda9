//! stem-split — orchestration service for music source separation.
//!
//! Clients submit audio and a model; independently deployed inference
//! workers (one process per model family) do the separation and report
//! back. This crate is the coordination layer in between: job state
//! machine, worker registry and dispatch, and job-addressed artifact
//! storage with retrieval and cleanup.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod intake;
pub mod job;
pub mod model;
pub mod registry;
pub mod retrieval;
pub mod store;
pub mod submit;

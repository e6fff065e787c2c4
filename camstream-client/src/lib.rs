//! # camstream-client
//!
//! Command-line client: drives a [`SessionController`] with a synthetic
//! camera and prints the analyzer's result.
//!
//! [`SessionController`]: camstream_core::stream::SessionController

pub mod camera;
pub mod config;
pub mod sink;

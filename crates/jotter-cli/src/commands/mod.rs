//! Command handlers

pub mod config;
pub mod daemon;
pub mod note;
pub mod queue;
pub mod status;
pub mod sync;

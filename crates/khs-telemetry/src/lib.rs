//! Structured logging for the coordinator and its background workers.

pub mod logging;

//! Common observability utilities.
//!
//! This module provides the tools for tracing and logging used throughout
//! the application.
//!
pub mod logging;

//! # Utility Modules
//!
//! Supporting utilities shared by both roles.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup for embedding applications
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Timeout defaults and async timeout wrappers

pub mod logging;
pub mod metrics;
pub mod timeout;

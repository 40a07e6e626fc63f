//! # Transport Layer
//!
//! Socket plumbing shared by both roles.
//!
//! ## Components
//! - **IoContext**: the single-threaded runtime each role drives its sockets on
//! - **TCP**: resolution, connect and listen

pub mod io_context;
pub mod tcp;

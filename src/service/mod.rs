//! # Roles
//!
//! The two ends of a conversation.
//!
//! ## Components
//! - **Server**: accepts peers, keeps validated ones in a registry, dispatches their messages
//! - **Client**: one outbound connection with its own inbound queue
//! - **Registry**: id-indexed connection arena backing the server

pub mod client;
pub mod registry;
pub mod server;

pub use client::Client;
pub use server::{Server, ServerHandler};

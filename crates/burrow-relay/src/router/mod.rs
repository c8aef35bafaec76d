//! Request routing from the public frontend to tunnel clients.

pub mod forwarder;

pub use forwarder::{RequestRouter, RouterError};

//! Burrow Tunnel Agent Library
//!
//! The privately located half of the tunnel: maintains one outbound
//! connection to the relay, receives request frames, forwards each to a
//! local HTTP service, and returns signed response frames.

pub mod tunnel;

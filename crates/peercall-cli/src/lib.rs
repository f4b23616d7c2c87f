//! Peercall client library: gateway HTTP client and the outgoing call flow.

#![forbid(unsafe_code)]

pub mod client;
pub mod dial;

pub use client::GatewayClient;
pub use dial::place_call;

//! HTTP surface.
//!
//! - [`api`]: Routes, shared state and request/response types
//! - [`cors`]: CORS layer built from the configured allow-list
//! - [`streaming`]: Relay from provider fragments to SSE events

pub mod api;
pub mod cors;
pub mod streaming;

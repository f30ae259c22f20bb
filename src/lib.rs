//! llm-sse-relay: stream hosted-LLM answers to browsers over Server-Sent Events.
//!
//! A prompt posted to `/ask` is forwarded to the configured model; every text
//! fragment the provider streams back is written to the client as a `data:`
//! event, followed by a `data: [DONE]` sentinel. Runs can optionally be traced
//! to LangSmith.

pub mod config;
pub mod provider;
pub mod server;
pub mod telemetry;

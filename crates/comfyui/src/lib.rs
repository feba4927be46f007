//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, WebSocket connection handling, HTTP
//! API wrappers, workflow template injection, and [`provider::ComfyUIProvider`],
//! the [`mayagen_core::provider::GenerationProvider`] backed by a ComfyUI
//! server.

pub mod api;
pub mod client;
pub mod messages;
pub mod processor;
pub mod provider;
pub mod workflow;

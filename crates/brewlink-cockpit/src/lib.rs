//! `brewlink-cockpit` – the HTTP surface.
//!
//! Serves a single-page chat UI, a read-only status query and the chat
//! endpoint that drives the [`Dispatcher`][brewlink_runtime::Dispatcher].
//! Built on `axum` with a permissive CORS layer so the page can also be
//! opened from another origin during development.

pub mod server;

pub use server::{ChatRequest, ChatResponse, CockpitServer, DEFAULT_PORT, DeviceReport};

//! `brewlink-runtime` – from chat text to device command.
//!
//! # Modules
//!
//! - [`interpreter`] – [`CommandInterpreter`][interpreter::CommandInterpreter]:
//!   deterministic phrase matching from free text to a
//!   [`CommandIntent`][brewlink_types::CommandIntent]. An ordered rule list,
//!   first match wins.
//! - [`chat_driver`] – [`ChatDriver`][chat_driver::ChatDriver]: async client
//!   for the external conversational service (`POST /chat-messages`, blocking
//!   response mode).
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: the per-message
//!   entry point. Gets the conversational reply, classifies the text,
//!   publishes the command and records the optimistic state change.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, with an optional OTLP span exporter when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod chat_driver;
pub mod dispatcher;
pub mod interpreter;
pub mod telemetry;

pub use chat_driver::{ChatDriver, ChatError, Conversation, ConversationReply};
pub use dispatcher::{CommandOutcome, Dispatcher};
pub use interpreter::{CommandInterpreter, CommandRule};
pub use telemetry::{TracerProviderGuard, init_tracing};

// Proxy module - HTTP relay between chat callers and the upstream model
//
// A caller POSTs `{ api_key?, messages }` to the chat route. The relay
// validates it, opens a streaming completion upstream, and forwards each
// text delta to the caller as it arrives. Every request is recorded in the
// daily chat log (INPUT, then OUTPUT or ERROR).

pub mod error;
pub mod handlers;
pub mod server;
pub mod sse;
pub mod state;
pub mod upstream;
pub mod validate;

pub use server::{shutdown_signal, start_relay};

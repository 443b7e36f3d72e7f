//! Completion client module
//!
//! One chat session talking to one provider endpoint:
//! - `config`: endpoint, auth, shape, and limits for the session
//! - `transport`: the HTTP seam (reqwest in production, mocks in tests)
//! - `core`: the send-cycle state machine

pub mod config;
pub mod core;
pub mod transport;

pub use config::{ClientConfig, ClientError};
pub use core::{ClientState, CompletionClient, SendOutcome, SessionView};
pub use transport::{
    HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError, TransportErrorKind,
};

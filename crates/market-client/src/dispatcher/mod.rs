//! Request building, sending and credential recovery.
//!
//! - [`ApiRequest`]: a replayable request description
//! - [`HttpTransport`]: one attempt, classified into an [`Outcome`]
//! - [`RequestDispatcher`]: attaches the session credential and replays once
//!   after a refresh

mod request;
mod service;
mod transport;

pub use request::{ApiRequest, FormPart, RequestBody};
pub use service::RequestDispatcher;
pub use transport::{HttpTransport, Outcome};

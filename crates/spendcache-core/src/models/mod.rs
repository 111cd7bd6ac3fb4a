//! Data models for the offline cache.
//!
//! - `Request`, `RequestKey`: what the page asked for and how it is keyed
//! - `StoredResponse`: a captured response (status, headers, body)
//! - `FetchOutcome`, `ResponseSource`: the result of routing one request
//! - `Notification`: the payload shown for a push event

pub mod notification;
pub mod request;
pub mod response;

pub use notification::Notification;
pub use request::{Destination, Request, RequestKey, RequestMode};
pub use response::{FetchOutcome, ResponseSource, StoredResponse};

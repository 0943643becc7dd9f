//! Outbound delivery of user messages to the reply automation.
//!
//! The automation answers asynchronously by writing agent messages into the backend store;
//! delivery only confirms that the request was accepted.

mod client;
mod dispatcher;
mod error;

pub use client::{WebhookClient, WebhookConfig, WebhookPayload};
pub use dispatcher::{BoxFuture, ReplyDispatcher};
pub use error::{WebhookError, WebhookResult};

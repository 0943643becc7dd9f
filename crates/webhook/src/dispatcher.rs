use std::future::Future;
use std::pin::Pin;

use parley_storage::SessionId;

use super::error::WebhookResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Hands a user message to whatever produces the agent's reply.
///
/// Success means the message was accepted, not that a reply exists yet.
pub trait ReplyDispatcher: Send + Sync {
    fn dispatch(&self, session_id: SessionId, message: String) -> BoxFuture<'_, WebhookResult<()>>;
}

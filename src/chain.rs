//! The middleware chain that sequences query-intercepting handlers.
//!
//! Each handler inspects the single question of the inbound query and either
//! delegates to the next handler via [`Chain::next`] or writes exactly one
//! reply and terminates the chain via [`Chain::cancel`]. Request cancellation
//! is carried by dropping the per-request future; the chain itself holds no
//! deadline.

use async_trait::async_trait;
use hickory_proto::op::Message;
use std::sync::Arc;

use crate::error::Error;

/// A chain member that may answer a query locally.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable handler name, used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Inspect the query; delegate with `chain.next().await` or write a reply
    /// and call `chain.cancel()`. Exactly one of the two, never both.
    async fn handle(&self, chain: &mut Chain<'_>);
}

/// Sink for the single reply message a handler may produce.
pub trait ResponseWriter: Send {
    /// Send one reply message to the client.
    fn write_msg(&mut self, msg: Message) -> Result<(), Error>;
}

/// A [`ResponseWriter`] that buffers the reply in memory.
///
/// The UDP front end drives the chain with one of these and serializes the
/// captured reply afterwards; tests inspect it directly.
#[derive(Debug, Default)]
pub struct BufferedWriter {
    reply: Option<Message>,
}

impl BufferedWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The captured reply, if a handler wrote one.
    pub fn reply(&self) -> Option<&Message> {
        self.reply.as_ref()
    }

    /// Take the captured reply out of the writer.
    pub fn take_reply(&mut self) -> Option<Message> {
        self.reply.take()
    }
}

impl ResponseWriter for BufferedWriter {
    fn write_msg(&mut self, msg: Message) -> Result<(), Error> {
        self.reply = Some(msg);
        Ok(())
    }
}

/// One in-flight pass of a query through the handler list.
pub struct Chain<'a> {
    handlers: &'a [Arc<dyn Handler>],
    pos: usize,
    cancelled: bool,

    /// The inbound query. Only `Question[0]` is inspected by handlers.
    pub request: &'a Message,

    /// Writer for the single reply message.
    pub writer: &'a mut dyn ResponseWriter,
}

impl<'a> Chain<'a> {
    /// Create a chain over the given handlers for one request.
    pub fn new(
        handlers: &'a [Arc<dyn Handler>],
        request: &'a Message,
        writer: &'a mut dyn ResponseWriter,
    ) -> Self {
        Self {
            handlers,
            pos: 0,
            cancelled: false,
            request,
            writer,
        }
    }

    /// Advance to the next handler. A no-op once the chain is cancelled or
    /// exhausted.
    pub async fn next(&mut self) {
        if self.cancelled {
            return;
        }
        let Some(handler) = self.handlers.get(self.pos).cloned() else {
            return;
        };
        self.pos += 1;
        handler.handle(self).await;
    }

    /// Terminate the chain; no further handler runs.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Whether a handler has terminated the chain.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

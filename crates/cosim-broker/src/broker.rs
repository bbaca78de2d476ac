//! Broker adapter contract

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use cosim_core::CosimResult;

/// Name of the implicit exchange that routes by queue name
pub const DEFAULT_EXCHANGE: &str = "";

/// A message handed to a queue consumer
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Encoded envelope
    pub payload: Bytes,
    /// Queue the receiver should answer to, if the publisher asked for one
    pub reply_to: Option<String>,
    /// Exchange the message was published on
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
}

/// Per-queue message stream
pub type DeliveryReceiver = mpsc::UnboundedReceiver<Delivery>;

/// Publish/subscribe transport the runtime is written against.
///
/// Exchanges route by exact routing-key match to every bound queue. The
/// default exchange (`""`) routes to the queue whose name equals the
/// routing key. Publishing is fire-and-forget: unroutable messages are
/// dropped without error.
pub trait Broker: Send + Sync {
    /// Declare a queue (idempotent)
    fn declare_queue(&self, name: &str) -> CosimResult<()>;

    /// Declare an exchange (idempotent)
    fn declare_exchange(&self, name: &str) -> CosimResult<()>;

    /// Route messages published on `exchange` with `routing_key` to `queue`
    fn bind(&self, exchange: &str, routing_key: &str, queue: &str) -> CosimResult<()>;

    /// Publish a message
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        reply_to: Option<&str>,
    ) -> CosimResult<()>;

    /// Attach the single consumer of a queue
    fn consume(&self, queue: &str) -> CosimResult<DeliveryReceiver>;
}

impl<B: Broker + ?Sized> Broker for Arc<B> {
    fn declare_queue(&self, name: &str) -> CosimResult<()> {
        (**self).declare_queue(name)
    }

    fn declare_exchange(&self, name: &str) -> CosimResult<()> {
        (**self).declare_exchange(name)
    }

    fn bind(&self, exchange: &str, routing_key: &str, queue: &str) -> CosimResult<()> {
        (**self).bind(exchange, routing_key, queue)
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        reply_to: Option<&str>,
    ) -> CosimResult<()> {
        (**self).publish(exchange, routing_key, payload, reply_to)
    }

    fn consume(&self, queue: &str) -> CosimResult<DeliveryReceiver> {
        (**self).consume(queue)
    }
}

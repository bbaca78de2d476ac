//! In-process broker
//!
//! Queues are unbounded tokio channels. A queue buffers messages from the
//! moment it is declared, so publishes that happen before the consumer
//! attaches are delivered once it does.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use cosim_core::{CosimError, CosimResult};

use crate::{Broker, Delivery, DeliveryReceiver, DEFAULT_EXCHANGE};

struct Queue {
    tx: mpsc::UnboundedSender<Delivery>,
    /// Taken by the first consumer
    rx: Option<DeliveryReceiver>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Queue { tx, rx: Some(rx) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Binding {
    routing_key: String,
    queue: String,
}

#[derive(Clone, Debug, Default)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub unroutable: u64,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    exchanges: HashMap<String, Vec<Binding>>,
    stats: BrokerStats,
}

/// In-process broker shared by every participant of a run
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::default()
    }

    pub fn stats(&self) -> BrokerStats {
        self.state.lock().stats.clone()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }

    /// The default exchange always exists
    pub fn has_exchange(&self, name: &str) -> bool {
        name == DEFAULT_EXCHANGE || self.state.lock().exchanges.contains_key(name)
    }

    /// Queues bound to `exchange` under `routing_key`
    pub fn bound_queues(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        self.state
            .lock()
            .exchanges
            .get(exchange)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|b| b.routing_key == routing_key)
                    .map(|b| b.queue.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl BrokerState {
    fn deliver(&mut self, queue: &str, delivery: Delivery) {
        let Some(q) = self.queues.get(queue) else {
            tracing::trace!(queue, "no such queue, dropping delivery");
            self.stats.unroutable += 1;
            return;
        };
        if q.tx.send(delivery).is_ok() {
            self.stats.delivered += 1;
        } else {
            tracing::debug!(queue, "consumer gone, dropping delivery");
        }
    }
}

impl Broker for MemoryBroker {
    fn declare_queue(&self, name: &str) -> CosimResult<()> {
        self.state
            .lock()
            .queues
            .entry(name.to_string())
            .or_insert_with(Queue::new);
        Ok(())
    }

    fn declare_exchange(&self, name: &str) -> CosimResult<()> {
        if name == DEFAULT_EXCHANGE {
            return Ok(());
        }
        self.state
            .lock()
            .exchanges
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    fn bind(&self, exchange: &str, routing_key: &str, queue: &str) -> CosimResult<()> {
        let mut state = self.state.lock();

        if !state.queues.contains_key(queue) {
            return Err(CosimError::QueueNotFound(queue.to_string()));
        }
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| CosimError::ExchangeNotFound(exchange.to_string()))?;

        let binding = Binding {
            routing_key: routing_key.to_string(),
            queue: queue.to_string(),
        };
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        reply_to: Option<&str>,
    ) -> CosimResult<()> {
        let mut state = self.state.lock();

        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            vec![routing_key.to_string()]
        } else {
            state
                .exchanges
                .get(exchange)
                .ok_or_else(|| CosimError::ExchangeNotFound(exchange.to_string()))?
                .iter()
                .filter(|b| b.routing_key == routing_key)
                .map(|b| b.queue.clone())
                .collect()
        };

        state.stats.published += 1;
        if targets.is_empty() {
            tracing::trace!(exchange, routing_key, "unroutable message dropped");
            state.stats.unroutable += 1;
            return Ok(());
        }

        for queue in targets {
            let delivery = Delivery {
                payload: payload.clone(),
                reply_to: reply_to.map(str::to_string),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            };
            state.deliver(&queue, delivery);
        }
        Ok(())
    }

    fn consume(&self, queue: &str) -> CosimResult<DeliveryReceiver> {
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| CosimError::QueueNotFound(queue.to_string()))?;
        q.rx
            .take()
            .ok_or_else(|| CosimError::QueueAlreadyConsumed(queue.to_string()))
    }
}

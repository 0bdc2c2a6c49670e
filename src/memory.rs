// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! A [`BrokerChannel`] that keeps exchanges, queues and bindings in process
//! memory. It routes with the same rules as a real node (direct, fanout and
//! topic exchanges), buffers messages for queues nobody consumes yet,
//! round-robins deliveries across the subscribers of a queue and records every
//! acknowledgment, which makes it suitable to exercise the consumer, publisher
//! and dispatcher without a running broker.
//!
//! Clones share the same state, so a test can keep a handle for inspection
//! while the runtime owns another.

use crate::{
    broker::{BrokerChannel, DeliveryStream, Envelope, MessageHeaders},
    errors::WorkerError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
    routing,
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::debug;

type Subscriber = mpsc::UnboundedSender<Envelope>;

/// A message accepted by [`InMemoryBroker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content: Vec<u8>,
    pub headers: MessageHeaders,
}

#[derive(Default)]
struct MemoryExchange {
    kind: ExchangeKind,
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct MemoryQueue {
    pending: VecDeque<Envelope>,
    subscribers: Vec<Subscriber>,
    next_subscriber: usize,
}

impl MemoryQueue {
    fn deliver(&mut self, mut envelope: Envelope) {
        while !self.subscribers.is_empty() {
            let idx = self.next_subscriber % self.subscribers.len();
            match self.subscribers[idx].send(envelope) {
                Ok(()) => {
                    self.next_subscriber = idx + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // subscriber went away, try the next one
                    self.subscribers.remove(idx);
                    envelope = returned;
                }
            }
        }

        self.pending.push_back(envelope);
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, MemoryExchange>,
    queues: HashMap<String, MemoryQueue>,
    next_tag: u64,
    unacked: HashSet<u64>,
    acks: HashMap<u64, usize>,
    published: Vec<PublishedMessage>,
    prefetch: Option<u16>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of acknowledgments received for a delivery tag, including
    /// refused ones.
    pub fn ack_count(&self, delivery_tag: u64) -> usize {
        self.state
            .lock()
            .acks
            .get(&delivery_tag)
            .copied()
            .unwrap_or_default()
    }

    /// Number of delivered or buffered messages not acknowledged yet.
    pub fn unacked(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Every message accepted so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    /// Messages waiting in a queue that has no subscriber.
    pub fn pending(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or_default()
    }

    pub fn prefetch(&self) -> Option<u16> {
        self.state.lock().prefetch
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl BrokerChannel for InMemoryBroker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), WorkerError> {
        let mut state = self.state.lock();

        match state.exchanges.get(&def.name) {
            Some(existing) if existing.kind != def.kind => {
                Err(WorkerError::DeclareExchangeError(def.name.clone()))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    def.name.clone(),
                    MemoryExchange {
                        kind: def.kind,
                        bindings: vec![],
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), WorkerError> {
        self.state.lock().queues.entry(def.name.clone()).or_default();
        Ok(())
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), WorkerError> {
        let mut state = self.state.lock();

        if !state.queues.contains_key(&binding.queue_name) {
            return Err(WorkerError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ));
        }

        let Some(exchange) = state.exchanges.get_mut(&binding.exchange_name) else {
            return Err(WorkerError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ));
        };

        let entry = (binding.routing_key.clone(), binding.queue_name.clone());
        if !exchange.bindings.contains(&entry) {
            exchange.bindings.push(entry);
        }

        Ok(())
    }

    async fn qos(&self, prefetch_count: u16) -> Result<(), WorkerError> {
        self.state.lock().prefetch = Some(prefetch_count);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<(), WorkerError> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(WorkerError::PublishingError(exchange.to_owned()));
        }

        let Some(target) = state.exchanges.get(exchange) else {
            return Err(WorkerError::PublishingError(exchange.to_owned()));
        };

        // a queue receives one copy even when several of its bindings match
        let queues: BTreeSet<String> = target
            .bindings
            .iter()
            .filter(|(pattern, _)| routing::routes(target.kind, pattern, routing_key))
            .map(|(_, queue)| queue.clone())
            .collect();

        debug!(
            exchange,
            routing_key,
            queues = queues.len(),
            "routing message"
        );

        state.published.push(PublishedMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            content: payload.to_vec(),
            headers: headers.clone(),
        });

        for queue in queues {
            state.next_tag += 1;
            let delivery_tag = state.next_tag;
            state.unacked.insert(delivery_tag);

            if let Some(q) = state.queues.get_mut(&queue) {
                q.deliver(Envelope {
                    delivery_tag,
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    content: payload.to_vec(),
                    headers: headers.clone(),
                });
            }
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, WorkerError> {
        let mut state = self.state.lock();

        let Some(q) = state.queues.get_mut(queue) else {
            return Err(WorkerError::ConsumerDeclarationError(queue.to_owned()));
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        while let Some(envelope) = q.pending.pop_front() {
            // the receiver is alive in this scope
            let _ = tx.send(envelope);
        }
        q.subscribers.push(tx);

        Ok(stream::poll_fn(move |cx| {
            rx.poll_recv(cx)
                .map(|next| next.map(Ok::<Envelope, WorkerError>))
        })
        .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), WorkerError> {
        let mut state = self.state.lock();

        *state.acks.entry(delivery_tag).or_default() += 1;

        if state.unacked.remove(&delivery_tag) {
            Ok(())
        } else {
            Err(WorkerError::AckMessageError(delivery_tag))
        }
    }

    async fn close(&self) -> Result<(), WorkerError> {
        let mut state = self.state.lock();
        state.closed = true;
        // dropping the senders ends every delivery stream
        for queue in state.queues.values_mut() {
            queue.subscribers.clear();
        }
        Ok(())
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Interface
//!
//! The consumer, publisher and dispatcher only talk to the broker through
//! [`BrokerChannel`]. [`crate::channel::AmqpChannel`] implements it on top of a
//! lapin channel; [`crate::memory::InMemoryBroker`] implements it without I/O.

use crate::{
    errors::WorkerError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;

#[cfg(test)]
use mockall::automock;

/// Text headers carried next to a message body (trace context, mostly).
pub type MessageHeaders = BTreeMap<String, String>;

/// Stream of deliveries of one subscription.
pub type DeliveryStream = BoxStream<'static, Result<Envelope, WorkerError>>;

/// A message delivered by the broker. The delivery tag is the handle used to
/// acknowledge it on the channel it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub content: Vec<u8>,
    pub headers: MessageHeaders,
}

/// Operations the worker runtime needs from a broker channel.
///
/// Declarations are idempotent: declaring an existing exchange or queue with
/// the same options is a no-op.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), WorkerError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), WorkerError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), WorkerError>;

    /// Caps the number of unacknowledged deliveries the broker sends to this channel.
    async fn qos(&self, prefetch_count: u16) -> Result<(), WorkerError>;

    /// Publishes without waiting for a broker confirmation.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<(), WorkerError>;

    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, WorkerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), WorkerError>;

    /// Releases the channel and its connection.
    async fn close(&self) -> Result<(), WorkerError>;
}

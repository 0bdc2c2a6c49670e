// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Task Publisher
//!
//! Publishes JSON payloads to exchanges of the binding table. The target
//! exchange is resolved and declared before every publish; publication is
//! fire-and-forget and no broker confirmation is awaited.

use crate::{
    broker::BrokerChannel, errors::WorkerError, otel, topology::BindingTable,
};
use opentelemetry::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Exchange receiving the results produced by workers.
pub const STORE_EXCHANGE: &str = "store";

/// Exchange receiving new audit tasks.
pub const AUDIT_EXCHANGE: &str = "audit";

/// Publisher sharing the process-wide broker channel.
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn BrokerChannel>,
    topology: Arc<BindingTable>,
}

impl Publisher {
    pub fn new(channel: Arc<dyn BrokerChannel>, topology: Arc<BindingTable>) -> Publisher {
        Publisher { channel, topology }
    }

    /// Publishes `payload` as JSON to `exchange_name` with `routing_key`.
    ///
    /// # Parameters
    /// * `exchange_name` - Exchange of the binding table to publish to
    /// * `routing_key` - Routing key of the message, may be empty
    /// * `payload` - Any serializable value, sent as pretty-printed JSON
    ///
    /// # Returns
    /// Ok(()) once the broker accepted the message. An exchange missing from
    /// the binding table yields `PublishError` and nothing is sent.
    pub async fn publish<T>(
        &self,
        exchange_name: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), WorkerError>
    where
        T: Serialize + ?Sized,
    {
        self.publish_in(&Context::current(), exchange_name, routing_key, payload)
            .await
    }

    /// Same as [`Publisher::publish`], propagating the trace context `cx`.
    async fn publish_in<T>(
        &self,
        cx: &Context,
        exchange_name: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), WorkerError>
    where
        T: Serialize + ?Sized,
    {
        debug!(
            exchange = exchange_name,
            routing_key, "publishing message"
        );

        let Some(exchange) = self.topology.exchange(exchange_name) else {
            error!(exchange = exchange_name, "unknown exchange");
            return Err(WorkerError::PublishError(exchange_name.to_owned()));
        };

        self.channel.declare_exchange(exchange).await?;

        let data = serde_json::to_vec_pretty(payload).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize payload");
            WorkerError::PublishingError(exchange_name.to_owned())
        })?;

        let headers = otel::inject_context(cx);

        self.channel
            .publish(&exchange.name, routing_key, &data, &headers)
            .await?;

        info!(exchange = exchange_name, bytes = data.len(), "published message");
        Ok(())
    }

    /// Publishes a task to the `audit` exchange.
    pub async fn publish_audit_task<T>(&self, task: &T) -> Result<(), WorkerError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(AUDIT_EXCHANGE, "", task).await
    }

    /// Publishes a worker result to the `store` exchange, under the span of
    /// the delivery that produced it.
    pub(crate) async fn publish_store_task<T>(
        &self,
        cx: &Context,
        result: &T,
    ) -> Result<(), WorkerError>
    where
        T: Serialize + ?Sized,
    {
        self.publish_in(cx, STORE_EXCHANGE, "", result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{broker::MockBrokerChannel, exchange::ExchangeDefinition};
    use mockall::predicate::eq;
    use serde_json::json;

    fn topology() -> Arc<BindingTable> {
        Arc::new(
            BindingTable::builder()
                .exchange(ExchangeDefinition::new(STORE_EXCHANGE).fanout())
                .exchange(ExchangeDefinition::new(AUDIT_EXCHANGE).topic())
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn unknown_exchange_sends_nothing() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_declare_exchange().never();
        channel.expect_publish().never();

        let publisher = Publisher::new(Arc::new(channel), topology());
        let result = publisher.publish("ddddd", "routing.key", &json!("test")).await;

        assert_eq!(result, Err(WorkerError::PublishError("ddddd".to_owned())));
    }

    #[tokio::test]
    async fn declares_then_publishes_json() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_declare_exchange()
            .withf(|def| def.name() == AUDIT_EXCHANGE)
            .times(1)
            .returning(|_| Ok(()));
        channel
            .expect_publish()
            .with(
                eq(AUDIT_EXCHANGE),
                eq(""),
                mockall::predicate::function(|payload: &[u8]| {
                    serde_json::from_slice::<serde_json::Value>(payload).unwrap()
                        == json!({"url": "https://example.org"})
                }),
                mockall::predicate::always(),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let publisher = Publisher::new(Arc::new(channel), topology());
        let result = publisher
            .publish_audit_task(&json!({"url": "https://example.org"}))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn broker_failures_are_returned() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_declare_exchange().returning(|_| Ok(()));
        channel
            .expect_publish()
            .returning(|exchange, _, _, _| Err(WorkerError::PublishingError(exchange.to_owned())));

        let publisher = Publisher::new(Arc::new(channel), topology());
        let result = publisher
            .publish_store_task(&Context::new(), &json!({"score": 1}))
            .await;

        assert_eq!(
            result,
            Err(WorkerError::PublishingError(STORE_EXCHANGE.to_owned()))
        );
    }
}

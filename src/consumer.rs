// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Consumer
//!
//! Subscribes to a named work queue and hands every delivery to a
//! [`DeliveryHandler`]. Before subscribing, the queue's binding is resolved
//! from the binding table and the exchange, the queue and the binding between
//! them are declared (declarations are idempotent).
//!
//! Deliveries are processed concurrently, each on its own task and with no
//! ordering between them. The number of deliveries in flight is capped by
//! `max_in_flight`, which is also sent to the broker as the channel prefetch.
//! A shutdown signal stops pulling deliveries and waits for the in-flight
//! handlers to finish.

use crate::{
    broker::{BrokerChannel, DeliveryStream, Envelope},
    errors::WorkerError,
    topology::BindingTable,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::{
    sync::{watch, Semaphore},
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Receives the deliveries of a consumed queue, or the error that prevented
/// consuming it. The channel is handed over so that the handler owns the
/// acknowledgment of the message.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(
        &self,
        channel: Arc<dyn BrokerChannel>,
        delivery: Result<Envelope, WorkerError>,
    );
}

pub struct Consumer {
    channel: Arc<dyn BrokerChannel>,
    topology: Arc<BindingTable>,
    max_in_flight: Option<u16>,
}

impl Consumer {
    /// Creates a consumer with no in-flight cap.
    ///
    /// # Parameters
    /// * `channel` - Broker channel shared by the process
    /// * `topology` - Binding table queues are resolved against
    ///
    /// # Returns
    /// A new Consumer instance
    pub fn new(channel: Arc<dyn BrokerChannel>, topology: Arc<BindingTable>) -> Self {
        Consumer {
            channel,
            topology,
            max_in_flight: None,
        }
    }

    /// Caps the number of deliveries processed at once; `0` removes the cap.
    pub fn max_in_flight(mut self, max: u16) -> Self {
        self.max_in_flight = (max > 0).then_some(max);
        self
    }

    /// Resolves the queue binding, declares the exchange, the queue and the
    /// binding, then subscribes to the queue.
    ///
    /// # Parameters
    /// * `queue_name` - Name of a queue present in the binding table
    ///
    /// # Returns
    /// The stream of deliveries, or the error of the first step that failed
    /// (`UnknownBindingError` for a queue missing from the table)
    pub async fn subscribe(&self, queue_name: &str) -> Result<DeliveryStream, WorkerError> {
        let binding = self.topology.queue_binding(queue_name)?;

        self.channel.declare_exchange(binding.exchange).await?;
        self.channel.declare_queue(binding.queue).await?;
        self.channel.bind_queue(&binding.queue_binding()).await?;

        if let Some(max) = self.max_in_flight {
            self.channel.qos(max).await?;
        }

        let consumer_tag = format!("{}-{}", queue_name, Uuid::new_v4());
        let deliveries = self.channel.consume(&binding.queue.name, &consumer_tag).await?;

        info!(queue = queue_name, "waiting for messages");
        Ok(deliveries)
    }

    /// Consumes `queue_name` until the delivery stream ends or `shutdown`
    /// turns true, then drains the handlers still running.
    ///
    /// # Parameters
    /// * `queue_name` - Queue to consume
    /// * `handler` - Receives every delivery, each on its own task
    /// * `shutdown` - Stops the consumer once it holds `true`
    ///
    /// # Returns
    /// Ok(()) once the consumer stopped and every handler finished. A failure
    /// to subscribe is handed to `handler` and returned.
    pub async fn consume(
        &self,
        queue_name: &str,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        let mut deliveries = match self.subscribe(queue_name).await {
            Ok(deliveries) => deliveries,
            Err(err) => {
                error!(error = err.to_string(), queue = queue_name, "failure to consume");
                handler.handle(self.channel.clone(), Err(err.clone())).await;
                return Err(err);
            }
        };

        let limiter = self
            .max_in_flight
            .map(|max| Arc::new(Semaphore::new(usize::from(max))));
        let mut in_flight = JoinSet::new();
        let mut shutdown_dropped = false;

        loop {
            if *shutdown.borrow() {
                info!(queue = queue_name, "shutdown requested, no longer pulling messages");
                break;
            }

            // a delivery is only pulled once a slot is free
            let permit = match &limiter {
                Some(limiter) => tokio::select! {
                    acquired = limiter.clone().acquire_owned() => {
                        Some(acquired.map_err(|_| WorkerError::InternalError)?)
                    }

                    changed = shutdown.changed(), if !shutdown_dropped => {
                        // without a sender the signal can never fire
                        shutdown_dropped = changed.is_err();
                        continue;
                    }

                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        log_aborted(joined);
                        continue;
                    }
                },
                None => None,
            };

            tokio::select! {
                changed = shutdown.changed(), if !shutdown_dropped => {
                    shutdown_dropped = changed.is_err();
                }

                next = deliveries.next() => {
                    let Some(delivery) = next else {
                        info!(queue = queue_name, "delivery stream closed");
                        break;
                    };

                    debug!(queue = queue_name, "received message");
                    let handler = handler.clone();
                    let channel = self.channel.clone();
                    in_flight.spawn(async move {
                        handler.handle(channel, delivery).await;
                        drop(permit);
                    });
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_aborted(joined);
                }
            }
        }

        debug!(queue = queue_name, in_flight = in_flight.len(), "draining handlers");
        while let Some(joined) = in_flight.join_next().await {
            log_aborted(joined);
        }

        Ok(())
    }
}

fn log_aborted(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        error!(error = err.to_string(), "message handler aborted");
    }
}

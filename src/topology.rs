// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Resolution
//!
//! This module holds the static binding table of the workers: which exchanges
//! exist, and to which exchange and routing pattern every work queue is bound.
//! The table is loaded once at startup from an ordered list of exchange
//! entries:
//!
//! ```json
//! [
//!   {
//!     "exchange": "audit",
//!     "type": "topic",
//!     "options": { "durable": true },
//!     "bindings": [
//!       { "destination": { "queue": "audit-performance-gpsi" }, "routingPattern": "#" }
//!     ]
//!   }
//! ]
//! ```
//!
//! After construction the table is immutable; it is shared behind an `Arc` and
//! only exposes read accessors, so concurrent message handlers may query it
//! freely.

use crate::{
    errors::WorkerError,
    exchange::{ExchangeDefinition, ExchangeKind, ExchangeOptions},
    queue::{QueueBinding, QueueDefinition, QueueOptions},
};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};
use tracing::{debug, error};

/// One exchange entry of the topology configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeEntry {
    pub exchange: String,
    #[serde(rename = "type")]
    pub kind: ExchangeKind,
    #[serde(default)]
    pub options: ExchangeOptions,
    #[serde(default)]
    pub bindings: Vec<BindingEntry>,
}

/// A queue bound to the enclosing exchange entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingEntry {
    pub destination: Destination,
    #[serde(default)]
    pub routing_pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Destination {
    pub queue: String,
    #[serde(default)]
    pub options: QueueOptions,
}

/// A queue's resolved binding: the exchange it is bound to, its own
/// definition and the routing key (or pattern) of the binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedBinding<'t> {
    pub exchange: &'t ExchangeDefinition,
    pub queue: &'t QueueDefinition,
    pub routing_key: &'t str,
}

impl ResolvedBinding<'_> {
    pub fn queue_binding(&self) -> QueueBinding {
        QueueBinding::new(&self.queue.name)
            .exchange(&self.exchange.name)
            .routing_key(self.routing_key)
    }
}

#[derive(Debug, Clone)]
struct QueueEntry {
    exchange: String,
    routing_key: String,
    definition: QueueDefinition,
}

/// Immutable mapping of exchange names to their definitions and of queue
/// names to their binding.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    exchanges: HashMap<String, ExchangeDefinition>,
    queues: HashMap<String, QueueEntry>,
}

impl BindingTable {
    pub fn builder() -> BindingTableBuilder {
        BindingTableBuilder::default()
    }

    /// Builds the table from parsed configuration entries.
    pub fn from_entries(entries: Vec<ExchangeEntry>) -> Result<BindingTable, WorkerError> {
        let mut builder = BindingTable::builder();

        for entry in entries {
            let exchange = ExchangeDefinition::new(&entry.exchange)
                .kind(entry.kind)
                .with_options(entry.options);
            builder = builder.exchange(exchange);

            for binding in entry.bindings {
                let queue = QueueDefinition::new(&binding.destination.queue)
                    .with_options(binding.destination.options);
                builder = builder.queue(queue, &entry.exchange, &binding.routing_pattern);
            }
        }

        builder.build()
    }

    /// Parses a JSON topology document.
    pub fn from_json_str(raw: &str) -> Result<BindingTable, WorkerError> {
        let entries: Vec<ExchangeEntry> = serde_json::from_str(raw).map_err(|err| {
            error!(error = err.to_string(), "failure to parse topology");
            WorkerError::TopologyConfigError(err.to_string())
        })?;

        BindingTable::from_entries(entries)
    }

    /// Reads and parses a JSON topology file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<BindingTable, WorkerError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading topology");

        let raw = fs::read_to_string(path).map_err(|err| {
            error!(error = err.to_string(), path = %path.display(), "failure to read topology");
            WorkerError::TopologyConfigError(format!("{}: {}", path.display(), err))
        })?;

        BindingTable::from_json_str(&raw)
    }

    /// Resolves the exchange, queue definition and routing key a queue is
    /// bound with.
    ///
    /// # Parameters
    /// * `queue_name` - Name of the queue to resolve
    ///
    /// # Returns
    /// The resolved binding, or `UnknownBindingError` for an empty or
    /// unknown name
    pub fn queue_binding(&self, queue_name: &str) -> Result<ResolvedBinding<'_>, WorkerError> {
        if queue_name.is_empty() {
            return Err(WorkerError::UnknownBindingError(queue_name.to_owned()));
        }

        let entry = self
            .queues
            .get(queue_name)
            .ok_or_else(|| WorkerError::UnknownBindingError(queue_name.to_owned()))?;

        // the builder refuses bindings to undeclared exchanges
        let exchange = self
            .exchanges
            .get(&entry.exchange)
            .ok_or_else(|| WorkerError::UnknownBindingError(queue_name.to_owned()))?;

        Ok(ResolvedBinding {
            exchange,
            queue: &entry.definition,
            routing_key: &entry.routing_key,
        })
    }

    /// Looks an exchange up by name; unknown names are not an error.
    pub fn exchange(&self, exchange_name: &str) -> Option<&ExchangeDefinition> {
        self.exchanges.get(exchange_name)
    }
}

/// Accumulates exchanges and queue bindings, then checks that every queue
/// resolves to exactly one declared exchange.
#[derive(Debug, Default)]
pub struct BindingTableBuilder {
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<(QueueDefinition, String, String)>,
}

impl BindingTableBuilder {
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    pub fn queue(mut self, def: QueueDefinition, exchange: &str, routing_key: &str) -> Self {
        self.queues
            .push((def, exchange.to_owned(), routing_key.to_owned()));
        self
    }

    pub fn build(self) -> Result<BindingTable, WorkerError> {
        let mut table = BindingTable::default();

        for exchange in self.exchanges {
            if exchange.name.is_empty() {
                return Err(WorkerError::TopologyConfigError(
                    "exchange name must not be empty".to_owned(),
                ));
            }
            if table.exchanges.contains_key(&exchange.name) {
                return Err(WorkerError::TopologyConfigError(format!(
                    "exchange `{}` declared twice",
                    exchange.name
                )));
            }
            table.exchanges.insert(exchange.name.clone(), exchange);
        }

        for (definition, exchange, routing_key) in self.queues {
            if definition.name.is_empty() {
                return Err(WorkerError::TopologyConfigError(format!(
                    "binding on exchange `{}` has an empty queue name",
                    exchange
                )));
            }
            if !table.exchanges.contains_key(&exchange) {
                return Err(WorkerError::TopologyConfigError(format!(
                    "queue `{}` is bound to undeclared exchange `{}`",
                    definition.name, exchange
                )));
            }
            if table.queues.contains_key(&definition.name) {
                return Err(WorkerError::TopologyConfigError(format!(
                    "queue `{}` is bound more than once",
                    definition.name
                )));
            }

            debug!(
                "queue: {} bound to exchange: {} with the key: {}",
                definition.name, exchange, routing_key
            );

            table.queues.insert(
                definition.name.clone(),
                QueueEntry {
                    exchange,
                    routing_key,
                    definition,
                },
            );
        }

        Ok(table)
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Descriptors
//!
//! This module provides the types describing a work queue and its binding to an
//! exchange. A queue's declaration options come from the `destination` entry of
//! the topology configuration; broker-specific `x-*` arguments are rendered by
//! [`QueueDefinition::queue_arguments`].

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify the idle time before a queue is deleted
pub const AMQP_HEADERS_EXPIRES: &str = "x-expires";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Declaration options of a queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub message_ttl: Option<i32>,
    pub expires: Option<i32>,
    pub max_length: Option<i32>,
    pub max_length_bytes: Option<i32>,
    pub arguments: BTreeMap<String, Value>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            passive: false,
            message_ttl: None,
            expires: None,
            max_length: None,
            max_length_bytes: None,
            arguments: BTreeMap::default(),
        }
    }
}

/// Definition of a queue with its configuration parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) options: QueueOptions,
}

impl QueueDefinition {
    /// Creates a new durable queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            options: QueueOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Replaces every declaration option at once.
    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.options.message_ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: i32) -> Self {
        self.options.max_length = Some(max);
        self
    }

    /// Renders the declaration arguments: the free-form `arguments` map
    /// overlaid with the typed limits.
    pub fn queue_arguments(&self) -> BTreeMap<String, Value> {
        let mut args = self.options.arguments.clone();

        let limits = [
            (AMQP_HEADERS_MESSAGE_TTL, self.options.message_ttl),
            (AMQP_HEADERS_EXPIRES, self.options.expires),
            (AMQP_HEADERS_MAX_LENGTH, self.options.max_length),
            (AMQP_HEADERS_MAX_LENGTH_BYTES, self.options.max_length_bytes),
        ];

        for (header, value) in limits {
            if let Some(value) = value {
                args.insert(header.to_owned(), Value::from(value));
            }
        }

        args
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue, with an empty
    /// exchange name and routing key.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key (or pattern) for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_limits_override_free_form_arguments() {
        let def = QueueDefinition::new("audit-performance-gpsi")
            .ttl(60_000)
            .max_length(100)
            .with_options(QueueOptions {
                message_ttl: Some(1_000),
                arguments: BTreeMap::from([
                    (AMQP_HEADERS_MESSAGE_TTL.to_owned(), json!(5)),
                    ("x-queue-mode".to_owned(), json!("lazy")),
                ]),
                ..QueueOptions::default()
            });

        let args = def.queue_arguments();

        assert_eq!(args.get(AMQP_HEADERS_MESSAGE_TTL), Some(&json!(1_000)));
        assert_eq!(args.get("x-queue-mode"), Some(&json!("lazy")));
        assert!(!args.contains_key(AMQP_HEADERS_MAX_LENGTH));
    }

    #[test]
    fn options_are_read_with_camel_case_names() {
        let opts: QueueOptions = serde_json::from_value(json!({
            "exclusive": true,
            "maxLengthBytes": 2048
        }))
        .unwrap();

        assert!(opts.durable);
        assert!(opts.exclusive);
        assert_eq!(opts.max_length_bytes, Some(2048));
    }

    #[test]
    fn binding_builder() {
        let binding = QueueBinding::new("worker-x").exchange("tasks").routing_key("x.#");

        assert_eq!(binding.queue_name(), "worker-x");
        assert_eq!(binding.exchange_name(), "tasks");
        assert_eq!(binding.key(), "x.#");
    }
}

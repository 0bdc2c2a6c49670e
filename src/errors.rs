// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Worker Runtime
//!
//! This module provides the error type shared by every stage of the worker
//! runtime. `WorkerError` covers broker plumbing (connection, channel,
//! declarations, publishing, acknowledgment), topology resolution and the
//! per-message task lifecycle (parsing, schema validation, processor lookup
//! and processing).
//!
//! None of these errors is fatal to a running consumer: they are logged and
//! handed to the caller's error reporter, and the message they belong to is
//! acknowledged and dropped.

use thiserror::Error;

/// Represents errors that can occur while consuming, dispatching and publishing tasks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the broker node
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The queue name is empty or not present in the binding table
    #[error("unknown binding for queue `{0}`")]
    UnknownBindingError(String),

    /// The static topology configuration is malformed or inconsistent
    #[error("invalid topology configuration: {0}")]
    TopologyConfigError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error receiving a delivery from the broker
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// The message body is not valid JSON
    #[error("failure to parse payload: {0}")]
    ParseError(String),

    /// A task schema document could not be compiled
    #[error("failure to compile schema `{0}`")]
    SchemaCompileError(String),

    /// The task does not satisfy the worker's schema
    #[error("task rejected by schema: {0}")]
    SchemaValidationError(String),

    /// No processor is registered under the worker name
    #[error("no processor registered for worker `{0}`")]
    WorkerLoadError(String),

    /// The processor reported a failure
    #[error("worker failure: {0}")]
    WorkerProcessingError(String),

    /// The target exchange is not present in the binding table
    #[error("unknown exchange `{0}`")]
    PublishError(String),

    /// The broker refused the publish
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Missing or invalid runtime configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Task Dispatcher
//!
//! Runs one named worker: every delivery of the worker's queue goes through
//!
//! ```text
//! Received -> Parsed -> Validated -> Dispatched -> (ResultPublished)? -> Acknowledged
//! ```
//!
//! Any failure along the way is reported to the caller's [`ErrorReporter`] and
//! ends the pipeline for that message, which is then acknowledged anyway.
//! A message is acknowledged exactly once and never requeued, so failures are
//! terminal.

use crate::{
    broker::{BrokerChannel, Envelope},
    channel,
    config::WorkerConfig,
    consumer::{Consumer, DeliveryHandler},
    errors::WorkerError,
    otel,
    processor::{Environment, ProcessorRegistry, Task},
    publisher::Publisher,
    schema::SchemaRegistry,
    topology::BindingTable,
};
use async_trait::async_trait;
use opentelemetry::{
    global,
    trace::{Status, TraceContextExt},
    Context,
};
use serde_json::Value;
use std::{borrow::Cow, path::Path, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Callback receiving every error met while running a worker.
pub type ErrorReporter = Arc<dyn Fn(&WorkerError) + Send + Sync>;

/// Category a worker's results are filed under: everything after the first
/// hyphen of its name (`audit-performance-gpsi` -> `performance-gpsi`).
///
/// # Parameters
/// * `worker_name` - Name of the worker, which is also the name of its queue
///
/// # Returns
/// The category, or `None` when the second hyphen-delimited segment is empty
/// (`audit`, `audit-`, `audit--x`)
pub fn category_for(worker_name: &str) -> Option<&str> {
    worker_name
        .split_once('-')
        .map(|(_, category)| category)
        .filter(|category| !category.is_empty() && !category.starts_with('-'))
}

/// Handles the deliveries of one worker's queue.
pub struct TaskDispatcher {
    worker_name: String,
    processors: ProcessorRegistry,
    schemas: SchemaRegistry,
    publisher: Publisher,
    environment: Environment,
    on_error: ErrorReporter,
}

impl TaskDispatcher {
    pub fn new(
        worker_name: &str,
        processors: ProcessorRegistry,
        schemas: SchemaRegistry,
        publisher: Publisher,
        environment: Environment,
        on_error: ErrorReporter,
    ) -> Self {
        TaskDispatcher {
            worker_name: worker_name.to_owned(),
            processors,
            schemas,
            publisher,
            environment,
            on_error,
        }
    }

    fn report(&self, err: &WorkerError) {
        (self.on_error)(err);
    }

    /// Parse, validate, process and publish. Returns the error that ended
    /// the pipeline, if any.
    async fn run(&self, cx: &Context, content: &[u8]) -> Result<(), WorkerError> {
        let task: Task = serde_json::from_slice(content).map_err(|err| {
            warn!(
                error = err.to_string(),
                worker = %self.worker_name,
                "dropping task: invalid json"
            );
            WorkerError::ParseError(err.to_string())
        })?;

        if let Err(err) = self.schemas.validate(&self.worker_name, &task) {
            warn!(
                error = err.to_string(),
                worker = %self.worker_name,
                "dropping task: schema validation failed"
            );
            return Err(err);
        }

        let Some(processor) = self.processors.get(&self.worker_name) else {
            error!(worker = %self.worker_name, "no processor registered");
            return Err(WorkerError::WorkerLoadError(self.worker_name.clone()));
        };

        let result = processor
            .process(&self.environment, task)
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    worker = %self.worker_name,
                    "failure to process task"
                );
                WorkerError::WorkerProcessingError(err.to_string())
            })?;

        let Some(mut result) = result else {
            debug!(worker = %self.worker_name, "task processed, nothing to store");
            return Ok(());
        };

        if let Some(category) = category_for(&self.worker_name) {
            result.insert("category".to_owned(), Value::from(category));
        }

        // the message is acknowledged whether or not the result could be stored
        if let Err(err) = self.publisher.publish_store_task(cx, &result).await {
            error!(
                error = err.to_string(),
                worker = %self.worker_name,
                "failure to publish result"
            );
            cx.span().record_error(&err);
            self.report(&err);
        }

        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for TaskDispatcher {
    async fn handle(
        &self,
        channel: Arc<dyn BrokerChannel>,
        delivery: Result<Envelope, WorkerError>,
    ) {
        let envelope = match delivery {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = err.to_string(), worker = %self.worker_name, "delivery failure");
                self.report(&err);
                return;
            }
        };

        let tracer = global::tracer("task-workers");
        let (ctx, span) = otel::new_span(&envelope.headers, &tracer, &self.worker_name);
        let cx = ctx.with_span(span);

        debug!(
            worker = %self.worker_name,
            exchange = %envelope.exchange,
            routing_key = %envelope.routing_key,
            delivery_tag = envelope.delivery_tag,
            "received task"
        );

        match self.run(&cx, &envelope.content).await {
            Ok(()) => cx.span().set_status(Status::Ok),
            Err(err) => {
                cx.span().record_error(&err);
                cx.span().set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });
                self.report(&err);
            }
        }

        if let Err(err) = channel.ack(envelope.delivery_tag).await {
            error!(
                error = err.to_string(),
                delivery_tag = envelope.delivery_tag,
                "failure to ack message"
            );
            cx.span().record_error(&err);
            self.report(&err);
            return;
        }

        debug!(
            worker = %self.worker_name,
            delivery_tag = envelope.delivery_tag,
            "message acknowledged"
        );
    }
}

/// Everything a process needs to run workers: one shared broker channel, the
/// binding table and the registries filled at startup.
pub struct WorkerRuntime {
    channel: Arc<dyn BrokerChannel>,
    topology: Arc<BindingTable>,
    processors: ProcessorRegistry,
    schemas: SchemaRegistry,
    environment: Environment,
    max_in_flight: u16,
}

impl WorkerRuntime {
    pub fn new(
        channel: Arc<dyn BrokerChannel>,
        topology: Arc<BindingTable>,
        processors: ProcessorRegistry,
        schemas: SchemaRegistry,
    ) -> Self {
        WorkerRuntime {
            channel,
            topology,
            processors,
            schemas,
            environment: Environment::default(),
            max_in_flight: 0,
        }
    }

    /// Environment handed to processors. Empty unless set.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Caps the deliveries processed at once; `0` removes the cap.
    pub fn max_in_flight(mut self, max: u16) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.channel.clone(), self.topology.clone())
    }

    pub fn dispatcher(&self, worker_name: &str, on_error: ErrorReporter) -> TaskDispatcher {
        TaskDispatcher::new(
            worker_name,
            self.processors.clone(),
            self.schemas.clone(),
            self.publisher(),
            self.environment.clone(),
            on_error,
        )
    }

    /// Consumes the queue named `worker_name` until the deliveries stop or
    /// `shutdown` turns true. In-flight tasks are drained before returning.
    pub async fn create_worker(
        &self,
        worker_name: &str,
        on_error: ErrorReporter,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        if !self.processors.contains(worker_name) {
            warn!(
                worker = worker_name,
                registered = ?self.processors.worker_names(),
                "no processor registered, every task will be dropped"
            );
        }

        let dispatcher = Arc::new(self.dispatcher(worker_name, on_error));

        info!(worker = worker_name, max_in_flight = self.max_in_flight, "starting worker");

        Consumer::new(self.channel.clone(), self.topology.clone())
            .max_in_flight(self.max_in_flight)
            .consume(worker_name, dispatcher, shutdown)
            .await
    }
}

/// Loads the topology and the schemas named by `config`, connects to the
/// broker and runs the worker `worker_name` until `shutdown`. The connection
/// is closed before returning.
pub async fn create_worker(
    config: &WorkerConfig,
    worker_name: &str,
    processors: ProcessorRegistry,
    on_error: ErrorReporter,
    shutdown: watch::Receiver<bool>,
) -> Result<(), WorkerError> {
    let topology = BindingTable::from_file(&config.topology_path)
        .map_err(|err| report_startup(&on_error, err))?;
    let schemas =
        load_schemas(&config.schemas_dir).map_err(|err| report_startup(&on_error, err))?;

    let channel: Arc<dyn BrokerChannel> = Arc::new(
        channel::connect(&config.url_amqp, &config.connection_name)
            .await
            .map_err(|err| report_startup(&on_error, err))?,
    );

    let runtime = WorkerRuntime::new(channel.clone(), Arc::new(topology), processors, schemas)
        .environment(Environment::from_process())
        .max_in_flight(config.worker_max_in_flight);

    let result = runtime.create_worker(worker_name, on_error, shutdown).await;

    if let Err(err) = channel.close().await {
        error!(error = err.to_string(), "failure to close the broker connection");
    }

    result
}

fn report_startup(on_error: &ErrorReporter, err: WorkerError) -> WorkerError {
    error!(error = err.to_string(), "failure to start the worker");
    on_error(&err);
    err
}

fn load_schemas(dir: &str) -> Result<SchemaRegistry, WorkerError> {
    if Path::new(dir).is_dir() {
        SchemaRegistry::load_dir(dir)
    } else {
        warn!(path = dir, "schema directory not found, using the built-in schema");
        SchemaRegistry::builtin()
    }
}

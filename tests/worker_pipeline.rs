// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use task_workers::{
    broker::{BrokerChannel, MessageHeaders},
    consumer::Consumer,
    dispatcher::{ErrorReporter, WorkerRuntime},
    errors::WorkerError,
    exchange::ExchangeDefinition,
    memory::InMemoryBroker,
    processor::{EchoProcessor, FnProcessor, ProcessingError, ProcessorRegistry, Task},
    publisher::{Publisher, STORE_EXCHANGE},
    queue::QueueDefinition,
    schema::SchemaRegistry,
    topology::BindingTable,
};
use tokio::sync::watch;

fn scenario_topology() -> Arc<BindingTable> {
    Arc::new(
        BindingTable::builder()
            .exchange(ExchangeDefinition::new("tasks").topic())
            .exchange(ExchangeDefinition::new(STORE_EXCHANGE).direct())
            .queue(QueueDefinition::new("worker-x"), "tasks", "x.#")
            .build()
            .unwrap(),
    )
}

fn bundled_topology() -> Arc<BindingTable> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/rabbitmq.config.json");
    Arc::new(BindingTable::from_file(path).unwrap())
}

/// Declares the queue's exchange, the queue and its binding, so that messages
/// published before the worker subscribes are buffered.
async fn declare(broker: &InMemoryBroker, topology: &BindingTable, queue: &str) {
    let binding = topology.queue_binding(queue).unwrap();
    broker.declare_exchange(binding.exchange).await.unwrap();
    broker.declare_queue(binding.queue).await.unwrap();
    broker.bind_queue(&binding.queue_binding()).await.unwrap();
}

fn collecting_reporter() -> (ErrorReporter, Arc<Mutex<Vec<WorkerError>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    (
        Arc::new(move |err: &WorkerError| sink.lock().push(err.clone())),
        errors,
    )
}

fn counting_echo(worker: &str, calls: Arc<AtomicUsize>) -> ProcessorRegistry {
    ProcessorRegistry::new().register(
        worker,
        FnProcessor::new(move |_, task: Task| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProcessingError>(task.as_object().cloned())
            }
        }),
    )
}

async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn store_results(broker: &InMemoryBroker) -> Vec<Value> {
    broker
        .published()
        .into_iter()
        .filter(|msg| msg.exchange == STORE_EXCHANGE)
        .map(|msg| serde_json::from_slice(&msg.content).unwrap())
        .collect()
}

#[tokio::test]
async fn published_payload_reaches_the_bound_consumer() {
    let broker = InMemoryBroker::new();
    let channel: Arc<dyn BrokerChannel> = Arc::new(broker.clone());
    let topology = scenario_topology();

    let mut deliveries = Consumer::new(channel.clone(), topology.clone())
        .subscribe("worker-x")
        .await
        .unwrap();

    let payload = json!({"url": "https://example.org", "runs": [1, 2, 3]});
    Publisher::new(channel, topology)
        .publish("tasks", "x.run", &payload)
        .await
        .unwrap();

    let envelope = deliveries.next().await.unwrap().unwrap();
    assert_eq!(envelope.routing_key, "x.run");
    assert_eq!(
        serde_json::from_slice::<Value>(&envelope.content).unwrap(),
        payload
    );
}

#[tokio::test]
async fn unknown_exchange_publishes_nothing() {
    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(Arc::new(broker.clone()), scenario_topology());

    let result = publisher.publish("missing", "x.run", &json!({})).await;

    assert_eq!(result, Err(WorkerError::PublishError("missing".to_owned())));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn unmatched_routing_keys_are_not_delivered() {
    let broker = InMemoryBroker::new();
    let topology = scenario_topology();
    declare(&broker, &topology, "worker-x").await;

    Publisher::new(Arc::new(broker.clone()), topology)
        .publish("tasks", "y.run", &json!({}))
        .await
        .unwrap();

    assert_eq!(broker.published().len(), 1);
    assert_eq!(broker.pending("worker-x"), 0);
    assert_eq!(broker.unacked(), 0);
}

#[tokio::test]
async fn valid_task_is_processed_stored_and_acked() {
    let broker = InMemoryBroker::new();
    let topology = scenario_topology();
    declare(&broker, &topology, "worker-x").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = WorkerRuntime::new(
        Arc::new(broker.clone()),
        topology,
        counting_echo("worker-x", calls.clone()),
        SchemaRegistry::builtin().unwrap(),
    )
    .max_in_flight(2);

    runtime
        .publisher()
        .publish("tasks", "x.run", &json!({"url": "https://example.org"}))
        .await
        .unwrap();

    let (on_error, errors) = collecting_reporter();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move {
        runtime.create_worker("worker-x", on_error, shutdown_rx).await
    });

    wait_until(|| broker.ack_count(1) == 1).await;
    shutdown_tx.send_replace(true);
    worker.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(errors.lock().is_empty());
    assert_eq!(broker.unacked(), 0);
    assert_eq!(broker.prefetch(), Some(2));
    assert_eq!(
        store_results(&broker),
        vec![json!({"url": "https://example.org", "category": "x"})]
    );
}

#[tokio::test]
async fn invalid_json_is_acked_without_processing() {
    let broker = InMemoryBroker::new();
    let topology = scenario_topology();
    declare(&broker, &topology, "worker-x").await;

    broker
        .publish("tasks", "x.run", b"{not json", &MessageHeaders::new())
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = WorkerRuntime::new(
        Arc::new(broker.clone()),
        topology,
        counting_echo("worker-x", calls.clone()),
        SchemaRegistry::builtin().unwrap(),
    );

    let (on_error, errors) = collecting_reporter();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move {
        runtime.create_worker("worker-x", on_error, shutdown_rx).await
    });

    wait_until(|| broker.ack_count(1) == 1).await;
    shutdown_tx.send_replace(true);
    worker.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(errors.lock()[..], [WorkerError::ParseError(_)]));
    assert!(store_results(&broker).is_empty());
}

#[tokio::test]
async fn results_are_filed_under_the_worker_category() {
    let broker = InMemoryBroker::new();
    let topology = bundled_topology();
    declare(&broker, &topology, "audit-performance-gpsi").await;

    let schemas_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/schemas");
    let schemas = SchemaRegistry::load_dir(schemas_dir).unwrap();
    let runtime = WorkerRuntime::new(
        Arc::new(broker.clone()),
        topology,
        ProcessorRegistry::new().register("audit-performance-gpsi", EchoProcessor),
        schemas,
    );

    runtime
        .publisher()
        .publish_audit_task(&json!({"url": "https://example.org"}))
        .await
        .unwrap();

    let (on_error, errors) = collecting_reporter();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move {
        runtime
            .create_worker("audit-performance-gpsi", on_error, shutdown_rx)
            .await
    });

    wait_until(|| broker.ack_count(1) == 1).await;
    shutdown_tx.send_replace(true);
    worker.await.unwrap().unwrap();

    assert!(errors.lock().is_empty());
    assert_eq!(
        store_results(&broker),
        vec![json!({"url": "https://example.org", "category": "performance-gpsi"})]
    );
}

#[tokio::test]
async fn every_message_is_acked_once_under_load() {
    let broker = InMemoryBroker::new();
    let topology = scenario_topology();
    declare(&broker, &topology, "worker-x").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = WorkerRuntime::new(
        Arc::new(broker.clone()),
        topology,
        counting_echo("worker-x", calls.clone()),
        SchemaRegistry::builtin().unwrap(),
    )
    .max_in_flight(3);

    let publisher = runtime.publisher();
    for n in 0..20 {
        publisher
            .publish("tasks", "x.batch", &json!({ "n": n }))
            .await
            .unwrap();
    }

    let (on_error, _errors) = collecting_reporter();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move {
        runtime.create_worker("worker-x", on_error, shutdown_rx).await
    });

    wait_until(|| broker.unacked() == 0).await;
    shutdown_tx.send_replace(true);
    worker.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 20);
    assert!((1..=20).all(|tag| broker.ack_count(tag) == 1));
    assert_eq!(store_results(&broker).len(), 20);
}

#[tokio::test]
async fn unknown_worker_queue_is_reported() {
    let broker = InMemoryBroker::new();
    let runtime = WorkerRuntime::new(
        Arc::new(broker),
        scenario_topology(),
        ProcessorRegistry::new(),
        SchemaRegistry::builtin().unwrap(),
    );

    let (on_error, errors) = collecting_reporter();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = runtime.create_worker("worker-y", on_error, shutdown_rx).await;

    assert_eq!(
        result,
        Err(WorkerError::UnknownBindingError("worker-y".to_owned()))
    );
    assert_eq!(
        *errors.lock(),
        vec![WorkerError::UnknownBindingError("worker-y".to_owned())]
    );
}

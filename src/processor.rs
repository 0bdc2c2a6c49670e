// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Task Processors
//!
//! A worker's business logic is a [`TaskProcessor`]. Processors are registered
//! under their worker name in a [`ProcessorRegistry`] when the process starts;
//! the dispatcher looks them up by the name of the queue it consumes.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::{collections::HashMap, env, future::Future, marker::PhantomData, sync::Arc};

/// A task: the JSON document carried by a message.
pub type Task = Value;

/// A result produced by a processor, published to the `store` exchange.
pub type TaskResult = Map<String, Value>;

/// Error type returned by processors.
pub type ProcessingError = Box<dyn std::error::Error + Send + Sync>;

/// Environment variables of the process, captured once and handed to every
/// processor call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn from_process() -> Self {
        Environment {
            vars: env::vars().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Environment {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Processing contract of a worker unit. `Ok(None)` means the task produced
/// nothing to store.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(
        &self,
        env: &Environment,
        task: Task,
    ) -> Result<Option<TaskResult>, ProcessingError>;
}

/// Adapts an async closure into a [`TaskProcessor`].
pub struct FnProcessor<F, Fut> {
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnProcessor<F, Fut>
where
    F: Fn(Environment, Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<TaskResult>, ProcessingError>> + Send,
{
    pub fn new(func: F) -> Self {
        FnProcessor {
            func,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskProcessor for FnProcessor<F, Fut>
where
    F: Fn(Environment, Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<TaskResult>, ProcessingError>> + Send,
{
    async fn process(
        &self,
        env: &Environment,
        task: Task,
    ) -> Result<Option<TaskResult>, ProcessingError> {
        (self.func)(env.clone(), task).await
    }
}

/// Returns the task itself as its result. Handy to check a deployment end to
/// end.
pub struct EchoProcessor;

#[async_trait]
impl TaskProcessor for EchoProcessor {
    async fn process(
        &self,
        _env: &Environment,
        task: Task,
    ) -> Result<Option<TaskResult>, ProcessingError> {
        match task {
            Value::Object(map) => Ok(Some(map)),
            other => Err(format!("expected an object, got `{}`", other).into()),
        }
    }
}

/// Processors by worker name, filled at startup and read-only afterwards.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `processor` under `worker_name`, replacing any previous one.
    pub fn register<P>(mut self, worker_name: &str, processor: P) -> Self
    where
        P: TaskProcessor + 'static,
    {
        self.processors
            .insert(worker_name.to_owned(), Arc::new(processor));
        self
    }

    pub fn get(&self, worker_name: &str) -> Option<Arc<dyn TaskProcessor>> {
        self.processors.get(worker_name).cloned()
    }

    pub fn contains(&self, worker_name: &str) -> bool {
        self.processors.contains_key(worker_name)
    }

    pub fn worker_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

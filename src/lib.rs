// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod memory;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod schema;
pub mod telemetry;
pub mod topology;

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels between publishers and workers in the message
//! headers. This module injects the current context into outgoing headers,
//! extracts it from incoming ones and opens the consumer span every delivery
//! is processed under.

use crate::broker::MessageHeaders;
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;

/// Adapter exposing message headers to the OpenTelemetry propagators.
pub(crate) struct HeaderCarrier<'a> {
    headers: &'a mut MessageHeaders,
}

impl<'a> HeaderCarrier<'a> {
    pub(crate) fn new(headers: &'a mut MessageHeaders) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), value);
    }
}

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Writes the trace context of `ctx` into a fresh header map.
pub(crate) fn inject_context(ctx: &Context) -> MessageHeaders {
    let mut headers = MessageHeaders::new();

    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderCarrier::new(&mut headers))
    });

    headers
}

/// Creates the consumer span of a delivery, parented to the context found in
/// its headers.
pub(crate) fn new_span(
    headers: &MessageHeaders,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = headers.clone();
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderCarrier::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

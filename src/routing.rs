// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Routing Key Matching
//!
//! Decides whether a published routing key reaches a queue bound with a given
//! pattern. Topic patterns are dot-delimited: a literal segment matches
//! itself, `*` matches exactly one segment and `#` matches zero or more.

use crate::exchange::ExchangeKind;

/// Returns true when a message published with `key` to an exchange of `kind`
/// is routed through a binding declared with `pattern`.
pub fn routes(kind: ExchangeKind, pattern: &str, key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => pattern == key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(pattern, key),
        // headers exchanges ignore the routing key entirely
        ExchangeKind::Headers => false,
    }
}

/// Matches a routing key against a topic pattern.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = split_segments(pattern);
    let key: Vec<&str> = split_segments(key);
    match_segments(&pattern, &key)
}

// An empty routing key has no segments, so `#` matches it and `*` does not.
fn split_segments(value: &str) -> Vec<&str> {
    if value.is_empty() {
        vec![]
    } else {
        value.split('.').collect()
    }
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_segments(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_segments(rest, &key[1..]),
        Some((literal, rest)) => {
            key.first() == Some(literal) && match_segments(rest, &key[1..])
        }
    }
}

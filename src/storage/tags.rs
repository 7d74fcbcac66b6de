//! Tag tokens for the search index.
//!
//! Every attribute of a span (its own tags, its process tags and the fields
//! of its log events) becomes one `key=value` token. Identical tokens from
//! different sources collapse into one and the result is sorted, so the
//! persisted token list never depends on map iteration order.

use crate::core::{KeyValue, Span};
use std::collections::BTreeSet;

/// Returns the deduplicated, lexicographically sorted tag tokens of a span.
pub fn unique_tags_for_span(span: &Span) -> Vec<String> {
    let log_fields = span.logs.iter().flat_map(|log| log.fields.iter());

    span.tags
        .iter()
        .chain(span.process.tags.iter())
        .chain(log_fields)
        .map(tag_token)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Formats one attribute as an index token.
pub fn tag_token(kv: &KeyValue) -> String {
    token(&kv.key, &kv.value.as_string())
}

/// Formats a query filter the same way attributes are indexed.
pub fn token(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

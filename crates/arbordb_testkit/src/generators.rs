//! Property-based test generators using proptest.
//!
//! Provides strategies for paths, lifecycle events and trigger declarations
//! that stay inside the shapes the pipeline accepts.

use crate::fixtures::TriggerSpec;
use arbordb_core::{DbPath, LifecycleEvent};
use proptest::prelude::*;

/// Strategy for a single path segment.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,7}")
        .expect("Invalid regex")
        .prop_filter("Segment must not shadow the system collection", |s| s != "system")
}

/// Strategy for collection paths below `/db`, at most `max_depth` levels
/// deep.
pub fn collection_path_strategy(max_depth: usize) -> impl Strategy<Value = DbPath> {
    prop::collection::vec(segment_strategy(), 0..=max_depth).prop_map(|segments| {
        let raw = std::iter::once("db".to_owned())
            .chain(segments)
            .collect::<Vec<_>>()
            .join("/");
        DbPath::parse(&format!("/{raw}")).expect("Generated path must be valid")
    })
}

/// Strategy for document paths below `/db`.
pub fn document_path_strategy(max_depth: usize) -> impl Strategy<Value = DbPath> {
    (collection_path_strategy(max_depth), segment_strategy()).prop_map(|(collection, name)| {
        collection
            .join(&format!("{name}.xml"))
            .expect("Generated path must be valid")
    })
}

/// Strategy for one lifecycle event.
pub fn event_strategy() -> impl Strategy<Value = LifecycleEvent> {
    prop::sample::select(LifecycleEvent::ALL.to_vec())
}

/// Strategy for a non-empty event list.
pub fn event_list_strategy() -> impl Strategy<Value = Vec<LifecycleEvent>> {
    prop::sample::subsequence(LifecycleEvent::ALL.to_vec(), 1..=LifecycleEvent::ALL.len())
}

/// Strategy for trigger declarations running program `p<n>`.
///
/// Roughly a fifth of the generated triggers are catch-all.
pub fn trigger_spec_strategy() -> impl Strategy<Value = (String, TriggerSpec)> {
    (
        0u16..1000,
        prop::option::weighted(0.8, event_list_strategy()),
        prop::bool::ANY,
    )
        .prop_map(|(n, events, use_url)| {
            let program = format!("p{n}");
            let spec = if use_url {
                TriggerSpec::url(&program)
            } else {
                TriggerSpec::query(&program)
            };
            let spec = match events {
                Some(events) => {
                    let list = events
                        .iter()
                        .map(|e| e.name())
                        .collect::<Vec<_>>()
                        .join(", ");
                    spec.events(&list)
                }
                None => spec,
            };
            (program, spec)
        })
}

//! Properties of batch folding.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use catchup_core::envelope::EventEnvelope;
use catchup_core::projection::{Route, ViewProjection};
use catchup_projections::BatchProjectionHandler;
use catchup_testing::{InMemoryViewStore, test_envelope};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum TabEvent {
    Opened(String),
    Charged(String, u32),
    Closed(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Tab {
    charges: u32,
    total: u64,
}

struct Tabs;

impl ViewProjection for Tabs {
    type Event = TabEvent;
    type View = Tab;

    fn name(&self) -> &str {
        "tabs"
    }

    fn route(&self, event: &TabEvent) -> Option<Route> {
        match event {
            TabEvent::Opened(id) => Some(Route::create(id.as_str())),
            TabEvent::Charged(id, _) | TabEvent::Closed(id) => Some(Route::evolve(id.as_str())),
        }
    }

    fn create(&self, _envelope: &EventEnvelope<TabEvent>) -> Tab {
        Tab::default()
    }

    fn evolve(&self, mut view: Tab, envelope: &EventEnvelope<TabEvent>) -> Option<Tab> {
        match &envelope.data {
            TabEvent::Charged(_, amount) => {
                view.charges += 1;
                view.total += u64::from(*amount);
                Some(view)
            }
            TabEvent::Closed(_) => None,
            TabEvent::Opened(_) => Some(view),
        }
    }
}

fn tab_event() -> impl Strategy<Value = TabEvent> {
    let id = prop::sample::select(vec!["a", "b", "c"]).prop_map(str::to_string);
    prop_oneof![
        id.clone().prop_map(TabEvent::Opened),
        (id.clone(), 1u32..100).prop_map(|(id, amount)| TabEvent::Charged(id, amount)),
        id.prop_map(TabEvent::Closed),
    ]
}

fn envelopes(events: Vec<TabEvent>) -> Vec<EventEnvelope<TabEvent>> {
    events
        .into_iter()
        .zip(0u64..)
        .map(|(event, position)| test_envelope(event, position))
        .collect()
}

fn fold_in_chunks(envelopes: &[EventEnvelope<TabEvent>], chunk: usize) -> HashMap<String, Tab> {
    let store = InMemoryViewStore::<Tab>::new();
    let handler = BatchProjectionHandler::new(Tabs, store.clone());
    tokio_test::block_on(async {
        for unit in envelopes.chunks(chunk) {
            handler.apply(unit).await.unwrap();
        }
    });
    store.snapshot()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    /// Splitting the log into units of any size yields the same rows as folding it whole.
    #[test]
    fn unit_size_does_not_change_the_result(
        events in prop::collection::vec(tab_event(), 0..40),
        chunk in 1usize..8,
    ) {
        let envelopes = envelopes(events);
        let whole = fold_in_chunks(&envelopes, envelopes.len().max(1));
        let chunked = fold_in_chunks(&envelopes, chunk);
        prop_assert_eq!(chunked, whole);
    }

    /// A unit costs one bulk load and one commit, writing each touched row once.
    #[test]
    fn one_load_and_commit_per_routed_unit(
        events in prop::collection::vec(tab_event(), 1..20),
    ) {
        let envelopes = envelopes(events);
        let store = InMemoryViewStore::<Tab>::new();
        let handler = BatchProjectionHandler::new(Tabs, store.clone());

        let applied = tokio_test::block_on(handler.apply(&envelopes)).unwrap();

        let touched: std::collections::HashSet<&str> = envelopes
            .iter()
            .map(|envelope| match &envelope.data {
                TabEvent::Opened(id) | TabEvent::Charged(id, _) | TabEvent::Closed(id) => id.as_str(),
            })
            .collect();
        prop_assert_eq!(applied, touched.len());
        prop_assert_eq!(store.load_calls().len(), 1);
        prop_assert_eq!(store.commit_count(), 1);
    }
}

//! Per-transaction ordering of CDC events

use super::model::StreamsTransactionEvent;
use super::{EventError, EventResult};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Check that every transaction in `events` is complete and well numbered:
/// for each `txId`, the `txEventId`s are exactly `0..txEventsCount` with no
/// gaps or duplicates, and all events agree on `txEventsCount`.
pub fn validate_tx_event_ids(events: &[StreamsTransactionEvent]) -> EventResult<()> {
    let mut by_tx: IndexMap<i64, Vec<&StreamsTransactionEvent>> = IndexMap::new();
    for event in events {
        by_tx.entry(event.meta.tx_id).or_default().push(event);
    }

    for (tx_id, group) in by_tx {
        let count = group[0].meta.tx_events_count;
        if let Some(other) = group.iter().find(|e| e.meta.tx_events_count != count) {
            return Err(EventError::TxEventIds {
                tx_id,
                reason: format!(
                    "txEventsCount disagrees: {} vs {}",
                    count, other.meta.tx_events_count
                ),
            });
        }

        let mut seen = BTreeSet::new();
        for event in &group {
            let id = event.meta.tx_event_id;
            if id < 0 || id >= count {
                return Err(EventError::TxEventIds {
                    tx_id,
                    reason: format!("txEventId {} outside 0..{}", id, count),
                });
            }
            if !seen.insert(id) {
                return Err(EventError::TxEventIds {
                    tx_id,
                    reason: format!("duplicate txEventId {}", id),
                });
            }
        }

        if seen.len() as i64 != count {
            return Err(EventError::TxEventIds {
                tx_id,
                reason: format!("{} of {} events present", seen.len(), count),
            });
        }
    }
    Ok(())
}

/// Reorder a batch so each transaction's events appear in ascending
/// `txEventId` order. Transactions keep the order in which they were first
/// seen; no ordering is imposed across different `txId`s.
pub fn order_by_transaction(events: Vec<StreamsTransactionEvent>) -> Vec<StreamsTransactionEvent> {
    let mut by_tx: IndexMap<i64, Vec<StreamsTransactionEvent>> = IndexMap::new();
    for event in events {
        by_tx.entry(event.meta.tx_id).or_default().push(event);
    }

    by_tx
        .into_values()
        .flat_map(|mut group| {
            group.sort_by_key(|e| e.meta.tx_event_id);
            group
        })
        .collect()
}

//! Coalesces the batched steps of one planning pass into one call per entry point.
//!
//! Steps are offered to the [`BatchCollector`] while a pass is planned, and each offer gets a
//! [`BatchWaiter`] back. Nothing is sent until [`BatchCollector::flush`] runs: grouping is a
//! barrier, not a race. The flush takes every pending group, calls each entry point once with
//! the collected keys, and sends every waiter its own correlated result.
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::configuration::BatchingConfig;
use crate::delegate;
use crate::delegate::Subservice;
use crate::delegate::SubserviceRequest;
use crate::error::ResolutionError;
use crate::json_ext::display_value;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::merge::correlate_batch;
use crate::merge_config::SelectionSet;
use crate::plan::MergeStep;

/// Receives the result correlated with one offered key.
///
/// Dropping the waiter before the flush withdraws the offer.
pub(crate) type BatchWaiter = oneshot::Receiver<Result<Value, ResolutionError>>;

type BatchSender = oneshot::Sender<Result<Value, ResolutionError>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey {
    subservice: String,
    field_name: String,
    selection_set: SelectionSet,
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {}", self.subservice, self.field_name, self.selection_set)
    }
}

struct Offer {
    key: Value,
    representation: Object,
    sender: BatchSender,
}

struct BatchGroup {
    subservice: Subservice,
    step: Arc<MergeStep>,
    offers: Vec<Offer>,
}

/// One key of a delegated call, and every offer waiting on it.
struct Slot {
    key: Value,
    representation: Object,
    senders: Vec<BatchSender>,
}

struct BatchCall {
    subservice: Subservice,
    step: Arc<MergeStep>,
    slots: Vec<Slot>,
}

/// Collects the batched steps of one resolution. Not shared across requests.
pub(crate) struct BatchCollector {
    config: BatchingConfig,
    groups: Mutex<IndexMap<BatchKey, BatchGroup>>,
}

impl BatchCollector {
    pub(crate) fn new(config: BatchingConfig) -> Self {
        Self {
            config,
            groups: Mutex::new(IndexMap::new()),
        }
    }

    /// Queues `key` for the next flush of the group of `step`.
    pub(crate) fn offer(
        &self,
        subservice: &Subservice,
        step: &MergeStep,
        key: Value,
        representation: Object,
    ) -> BatchWaiter {
        let (sender, waiter) = oneshot::channel();
        let batch_key = BatchKey {
            subservice: subservice.name().to_string(),
            field_name: step.field_name().to_string(),
            selection_set: step.selection_set.clone(),
        };
        self.groups
            .lock()
            .entry(batch_key)
            .or_insert_with(|| BatchGroup {
                subservice: subservice.clone(),
                step: Arc::new(step.clone()),
                offers: Vec::new(),
            })
            .offers
            .push(Offer {
                key,
                representation,
                sender,
            });
        waiter
    }

    pub(crate) fn pending(&self) -> usize {
        self.groups
            .lock()
            .values()
            .map(|group| group.offers.len())
            .sum()
    }

    /// Issues one call per group (or per chunk, with a maximum batch size) and distributes the
    /// results. Groups are independent: a failed call only fails the offers of its own group.
    pub(crate) async fn flush(&self) {
        let groups = std::mem::take(&mut *self.groups.lock());
        let calls = groups
            .into_iter()
            .flat_map(|(batch_key, group)| self.prepare(batch_key, group))
            .map(BatchCall::run);
        join_all(calls).await;
    }

    fn prepare(&self, batch_key: BatchKey, group: BatchGroup) -> Vec<BatchCall> {
        let mut slots: Vec<Slot> = Vec::new();
        let mut slot_by_key: IndexMap<String, usize> = IndexMap::new();
        for offer in group.offers {
            if offer.sender.is_closed() {
                tracing::trace!(batch = %batch_key, "offer withdrawn before flush");
                continue;
            }
            if self.config.enabled && self.config.dedupe_keys {
                let rendered = display_value(&offer.key);
                if let Some(index) = slot_by_key.get(&rendered) {
                    slots[*index].senders.push(offer.sender);
                    continue;
                }
                slot_by_key.insert(rendered, slots.len());
            }
            slots.push(Slot {
                key: offer.key,
                representation: offer.representation,
                senders: vec![offer.sender],
            });
        }

        let chunk_size = self.config.chunk_size();
        let mut calls = Vec::new();
        let mut slots = slots.into_iter().peekable();
        while slots.peek().is_some() {
            calls.push(BatchCall {
                subservice: group.subservice.clone(),
                step: group.step.clone(),
                slots: slots.by_ref().take(chunk_size).collect(),
            });
        }
        tracing::debug!(batch = %batch_key, calls = calls.len(), "flushing batch group");
        calls
    }
}

impl BatchCall {
    async fn run(self) {
        let keys = self
            .slots
            .iter()
            .map(|slot| slot.key.clone())
            .collect::<Vec<_>>();
        let entry_point = &self.step.entry_point;
        let request = SubserviceRequest {
            selection_set: self.step.selection_set.clone(),
            field_name: entry_point.field_name.clone(),
            args: entry_point.args().build_from_keys(keys.clone()),
            representations: self
                .slots
                .iter()
                .map(|slot| slot.representation.clone())
                .collect(),
        };

        match delegate::execute(&self.subservice, request).await {
            Ok(result) => {
                let correlated = correlate_batch(
                    &keys,
                    result,
                    &entry_point.values_from_results(),
                    &entry_point.key_extractor(),
                );
                for (slot, result) in self.slots.into_iter().zip(correlated) {
                    let result = result.map_err(ResolutionError::from);
                    for sender in slot.senders {
                        // The waiter may be gone: its entity was cancelled after the flush.
                        let _ = sender.send(result.clone());
                    }
                }
            }
            Err(error) => {
                tracing::warn!(
                    subservice = %error.subservice,
                    field_name = %error.field_name,
                    keys = keys.len(),
                    "batched call failed: {}",
                    error.cause
                );
                for sender in self.slots.into_iter().flat_map(|slot| slot.senders) {
                    let _ = sender.send(Err(error.clone().into()));
                }
            }
        }
    }
}

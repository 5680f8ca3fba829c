//! Optimistic overlay over confirmed state.
//!
//! A [`Layered`] value keeps two layers:
//!
//! - **Confirmed**: the last state known to be stored remotely, either echoed
//!   by a subscription or acknowledged by a successful write.
//! - **Overlay**: pending local mutations, each tagged with the generation it
//!   was issued at, replayed in order on top of the confirmed state.
//!
//! Merge rule: confirmed always wins. Echoes replace the confirmed layer and
//! pending mutations are replayed over it; an acknowledgement folds the
//! written value into the confirmed layer and drops every pending mutation
//! at or below its generation. An echo of a value that is still being
//! written counts as that write's acknowledgement, so its mutation is never
//! replayed on top of its own result.

use crate::{error::Result, Generation, Timestamp};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A read-modify-write transformation of an entity.
pub type Mutation<T> = Arc<dyn Fn(&T) -> Result<T> + Send + Sync>;

/// Values that carry a write stamp for detecting stale echoes.
pub trait Versioned {
    /// Write stamp of this value, if the document carries one.
    fn stamp(&self) -> Option<Timestamp> {
        None
    }
}

struct PendingWrite<T> {
    generation: Generation,
    mutation: Mutation<T>,
}

impl<T> Clone for PendingWrite<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            mutation: Arc::clone(&self.mutation),
        }
    }
}

/// Confirmed state plus an ordered overlay of pending mutations.
#[derive(Clone)]
pub struct Layered<T> {
    confirmed: T,
    /// Generation of the last acknowledged local write
    confirmed_at: Generation,
    loaded: bool,
    pending: VecDeque<PendingWrite<T>>,
    /// Values sent to the remote store and not yet acknowledged
    in_flight: Vec<(Generation, T)>,
}

impl<T: fmt::Debug> fmt::Debug for Layered<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layered")
            .field("confirmed", &self.confirmed)
            .field("confirmed_at", &self.confirmed_at)
            .field("loaded", &self.loaded)
            .field(
                "pending",
                &self.pending.iter().map(|p| p.generation).collect::<Vec<_>>(),
            )
            .field(
                "in_flight",
                &self.in_flight.iter().map(|(g, _)| *g).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<T: Clone + Versioned> Layered<T> {
    /// Start from an initial state that has not been confirmed remotely yet.
    pub fn new(initial: T) -> Self {
        Self {
            confirmed: initial,
            confirmed_at: Generation::ZERO,
            loaded: false,
            pending: VecDeque::new(),
            in_flight: Vec::new(),
        }
    }

    /// Whether the confirmed layer has been populated from the remote store.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn confirmed_at(&self) -> Generation {
        self.confirmed_at
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, generation: Generation) -> bool {
        self.pending.iter().any(|p| p.generation == generation)
    }

    fn replay<'a>(&self, base: T, writes: impl Iterator<Item = &'a PendingWrite<T>>) -> T
    where
        T: 'a,
    {
        // a pending mutation that no longer applies is skipped here and
        // rejected when its own write is prepared
        writes.fold(base, |state, write| (write.mutation)(&state).unwrap_or(state))
    }

    /// Confirmed state with every pending mutation applied.
    pub fn view(&self) -> T {
        self.replay(self.confirmed.clone(), self.pending.iter())
    }

    /// Apply a mutation optimistically.
    ///
    /// The mutation is validated against the current view first; a failing
    /// mutation is not queued and its error is returned.
    pub fn push(&mut self, generation: Generation, mutation: Mutation<T>) -> Result<T> {
        let next = mutation(&self.view())?;
        self.pending.push_back(PendingWrite {
            generation,
            mutation,
        });
        Ok(next)
    }

    /// Compute the value a pending write must store.
    ///
    /// The mutation runs against the latest confirmed state with every earlier
    /// pending mutation applied, never against the state captured at push
    /// time. Returns `None` when the write is no longer pending (rolled back
    /// or folded into a later acknowledgement).
    pub fn prepare(&self, generation: Generation) -> Option<Result<T>> {
        let position = self.pending.iter().position(|p| p.generation == generation)?;
        let base = self.replay(self.confirmed.clone(), self.pending.iter().take(position));
        let write = self.pending.get(position)?;
        Some((write.mutation)(&base))
    }

    /// Record the prepared value of a write that is being sent.
    pub fn begin_write(&mut self, generation: Generation, value: T) {
        self.in_flight.push((generation, value));
    }

    /// Fold an acknowledged write into the confirmed layer.
    ///
    /// Returns `false` and changes nothing when the acknowledgement is stale,
    /// i.e. a later write was already folded. A write whose echo already
    /// confirmed it is acknowledged without touching the confirmed layer.
    pub fn acknowledge(&mut self, generation: Generation, written: T) -> bool {
        self.in_flight.retain(|(g, _)| *g != generation);
        if generation == self.confirmed_at {
            return true;
        }
        if !generation.is_newer_than(self.confirmed_at) {
            return false;
        }
        self.fold(generation);
        self.confirmed = written;
        self.loaded = true;
        true
    }

    fn fold(&mut self, generation: Generation) {
        self.confirmed_at = generation;
        self.pending.retain(|p| p.generation.is_newer_than(generation));
        self.in_flight.retain(|(g, _)| g.is_newer_than(generation));
    }

    /// Drop a pending mutation after its write failed.
    pub fn rollback(&mut self, generation: Generation) -> bool {
        self.in_flight.retain(|(g, _)| *g != generation);
        let before = self.pending.len();
        self.pending.retain(|p| p.generation != generation);
        self.pending.len() != before
    }

    /// Replace the confirmed layer with remotely echoed state.
    ///
    /// An echo whose stamp is older than the confirmed state's stamp predates
    /// a write that was already acknowledged and is discarded. An echo equal
    /// to an in-flight write confirms that write: its mutation and every
    /// earlier one leave the overlay.
    pub fn confirm(&mut self, value: T) -> bool
    where
        T: PartialEq,
    {
        if let (Some(incoming), Some(current)) = (value.stamp(), self.confirmed.stamp()) {
            if incoming < current {
                return false;
            }
        }
        let echoed = self
            .in_flight
            .iter()
            .filter(|(_, written)| *written == value)
            .map(|(g, _)| *g)
            .max();
        if let Some(generation) = echoed {
            if generation.is_newer_than(self.confirmed_at) {
                self.fold(generation);
            }
        }
        self.confirmed = value;
        self.loaded = true;
        true
    }

    /// Forget everything and start over from `initial`.
    ///
    /// The acknowledgement generation is kept so late acknowledgements from
    /// before the reset remain stale.
    pub fn reset(&mut self, initial: T) {
        self.confirmed = initial;
        self.loaded = false;
        self.pending.clear();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        value: i64,
        stamp: Option<Timestamp>,
    }

    impl Versioned for Counter {
        fn stamp(&self) -> Option<Timestamp> {
            self.stamp
        }
    }

    fn counter(value: i64) -> Counter {
        Counter { value, stamp: None }
    }

    fn add(delta: i64) -> Mutation<Counter> {
        Arc::new(move |c: &Counter| {
            let value = c.value + delta;
            if value < 0 {
                return Err(Error::InvalidQuantity(value));
            }
            Ok(Counter {
                value,
                stamp: c.stamp,
            })
        })
    }

    fn g(n: u64) -> Generation {
        Generation::new(n)
    }

    #[test]
    fn view_applies_pending_in_order() {
        let mut layered = Layered::new(counter(1));
        assert_eq!(layered.push(g(1), add(1)).unwrap(), counter(2));
        assert_eq!(layered.push(g(2), add(3)).unwrap(), counter(5));
        assert_eq!(layered.view(), counter(5));
        assert_eq!(layered.confirmed(), &counter(1));
    }

    #[test]
    fn invalid_mutation_not_queued() {
        let mut layered = Layered::new(counter(0));
        assert!(layered.push(g(1), add(-1)).is_err());
        assert_eq!(layered.pending_len(), 0);
    }

    #[test]
    fn prepare_uses_latest_confirmed_state() {
        let mut layered = Layered::new(counter(1));
        layered.push(g(1), add(1)).unwrap();
        layered.push(g(2), add(1)).unwrap();

        // first write acknowledged with value 2
        let first = layered.prepare(g(1)).unwrap().unwrap();
        assert!(layered.acknowledge(g(1), first));

        // the second write builds on the acknowledged value, not on 1
        let second = layered.prepare(g(2)).unwrap().unwrap();
        assert_eq!(second, counter(3));
    }

    #[test]
    fn prepare_out_of_order_includes_earlier_pending() {
        let mut layered = Layered::new(counter(1));
        layered.push(g(1), add(1)).unwrap();
        layered.push(g(2), add(1)).unwrap();

        let second = layered.prepare(g(2)).unwrap().unwrap();
        assert_eq!(second, counter(3));
        assert!(layered.acknowledge(g(2), second));

        // the earlier mutation was carried by the later write
        assert!(layered.prepare(g(1)).is_none());
        assert_eq!(layered.view(), counter(3));
    }

    #[test]
    fn stale_acknowledgement_discarded() {
        let mut layered = Layered::new(counter(0));
        assert!(layered.acknowledge(g(5), counter(5)));
        assert!(!layered.acknowledge(g(4), counter(4)));
        assert_eq!(layered.confirmed(), &counter(5));
    }

    #[test]
    fn rollback_restores_view() {
        let mut layered = Layered::new(counter(1));
        layered.push(g(1), add(2)).unwrap();
        assert!(layered.rollback(g(1)));
        assert!(!layered.rollback(g(1)));
        assert_eq!(layered.view(), counter(1));
    }

    #[test]
    fn echo_wins_and_pending_replays() {
        let mut layered = Layered::new(counter(1));
        layered.push(g(1), add(1)).unwrap();
        assert!(layered.confirm(counter(10)));
        assert_eq!(layered.view(), counter(11));
        assert!(layered.is_loaded());
    }

    #[test]
    fn echo_of_in_flight_write_is_not_replayed() {
        let mut layered = Layered::new(counter(1));
        layered.push(g(1), add(1)).unwrap();
        let written = layered.prepare(g(1)).unwrap().unwrap();
        layered.begin_write(g(1), written.clone());

        // the echo lands before the acknowledgement
        assert!(layered.confirm(counter(2)));
        assert_eq!(layered.pending_len(), 0);
        assert_eq!(layered.view(), counter(2));

        assert!(layered.acknowledge(g(1), written));
        assert_eq!(layered.view(), counter(2));
    }

    #[test]
    fn echo_keeps_later_pending_writes() {
        let mut layered = Layered::new(counter(1));
        layered.push(g(1), add(1)).unwrap();
        layered.push(g(2), add(5)).unwrap();
        let first = layered.prepare(g(1)).unwrap().unwrap();
        layered.begin_write(g(1), first);

        assert!(layered.confirm(counter(2)));
        assert_eq!(layered.pending_len(), 1);
        assert_eq!(layered.view(), counter(7));
        assert_eq!(layered.prepare(g(2)).unwrap().unwrap(), counter(7));
    }

    #[test]
    fn stale_echo_discarded_by_stamp() {
        let mut layered = Layered::new(counter(0));
        layered.acknowledge(
            g(1),
            Counter {
                value: 2,
                stamp: Some(200),
            },
        );
        let stale = Counter {
            value: 1,
            stamp: Some(100),
        };
        assert!(!layered.confirm(stale));
        assert_eq!(layered.confirmed().value, 2);

        let same = Counter {
            value: 2,
            stamp: Some(200),
        };
        assert!(layered.confirm(same));
    }

    #[test]
    fn reset_keeps_acknowledgement_generation() {
        let mut layered = Layered::new(counter(0));
        layered.acknowledge(g(3), counter(3));
        layered.push(g(4), add(1)).unwrap();
        layered.reset(counter(0));

        assert_eq!(layered.pending_len(), 0);
        assert!(!layered.is_loaded());
        assert!(!layered.acknowledge(g(2), counter(2)));
    }
}

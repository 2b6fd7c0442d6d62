//! Flush debouncing and autosave bookkeeping.
//!
//! The scheduler owns no timers. It tracks deadlines against the injected
//! [`Clock`] and the host polls [`PersistScheduler::is_due`] /
//! [`PersistScheduler::next_deadline`] to decide when to push.

use crate::{config::PersistConfig, Clock, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Class of a local change, each with its own debounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Text edits: title, content, tags and similar
    Content,
    /// Create, delete, reparent, reorder
    Structural,
    /// Canvas drags
    Position,
}

/// Proof that a flush is in flight.
///
/// Only one ticket exists at a time; hand it back to
/// [`PersistScheduler::finish_flush`] when the push completes.
#[derive(Debug, PartialEq, Eq)]
pub struct FlushTicket {
    generation: u64,
    started_at: Timestamp,
}

impl FlushTicket {
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }
}

/// Pending-change tracker with a single debounced flush deadline.
pub struct PersistScheduler {
    config: PersistConfig,
    clock: Arc<dyn Clock>,
    pending: bool,
    last_kind: Option<ChangeKind>,
    due_at: Option<Timestamp>,
    /// Bumped by every `mark_local_changes`
    generation: u64,
    flushing: bool,
    last_flush_at: Option<Timestamp>,
    failed_flushes: u64,
    last_autosave_at: Timestamp,
}

impl PersistScheduler {
    pub fn new(config: PersistConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            config,
            clock,
            pending: false,
            last_kind: None,
            due_at: None,
            generation: 0,
            flushing: false,
            last_flush_at: None,
            failed_flushes: 0,
            last_autosave_at: now,
        }
    }

    /// Debounce for a change kind.
    pub fn debounce_for(&self, kind: ChangeKind) -> u64 {
        match kind {
            ChangeKind::Content => self.config.content_debounce_ms,
            ChangeKind::Structural => self.config.structural_debounce_ms,
            ChangeKind::Position => self.config.position_debounce_ms,
        }
    }

    /// Record that local state diverged from the remote and restart the
    /// debounce for `kind`.
    pub fn mark_local_changes(&mut self, kind: ChangeKind) {
        self.pending = true;
        self.last_kind = Some(kind);
        self.generation += 1;
        self.schedule_persist(self.debounce_for(kind));
    }

    /// (Re)start the flush deadline `debounce_ms` from now.
    pub fn schedule_persist(&mut self, debounce_ms: u64) {
        let due_at = self.clock.now_ms().saturating_add(debounce_ms);
        self.due_at = Some(due_at);
        tracing::trace!(due_at, debounce_ms, "persist scheduled");
    }

    /// Cancel the deadline and start a flush immediately if anything is
    /// pending.
    /// A flush already in flight keeps the armed deadline, so changes made
    /// during it are still flushed afterwards.
    pub fn flush_pending_persist(&mut self) -> Option<FlushTicket> {
        if self.flushing {
            return None;
        }
        self.due_at = None;
        self.begin_flush()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn last_kind(&self) -> Option<ChangeKind> {
        self.last_kind
    }

    pub fn last_flush_at(&self) -> Option<Timestamp> {
        self.last_flush_at
    }

    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes
    }

    /// Current flush deadline, if one is armed.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.due_at
    }

    /// Whether the host should start a flush now.
    pub fn is_due(&self) -> bool {
        self.pending
            && !self.flushing
            && self.due_at.is_some_and(|due| due <= self.clock.now_ms())
    }

    /// Start a flush. Returns `None` when nothing is pending or a flush is
    /// already in flight.
    pub fn begin_flush(&mut self) -> Option<FlushTicket> {
        if self.flushing || !self.pending {
            return None;
        }
        self.flushing = true;
        self.due_at = None;
        let ticket = FlushTicket {
            generation: self.generation,
            started_at: self.clock.now_ms(),
        };
        tracing::debug!(generation = ticket.generation, "flush started");
        Some(ticket)
    }

    /// Complete the flush started with `ticket`.
    ///
    /// Success clears the pending flag unless more changes were marked
    /// while the flush was running. Failure keeps it and re-arms the
    /// deadline with the debounce of the last change kind.
    pub fn finish_flush(&mut self, ticket: FlushTicket, ok: bool) {
        self.flushing = false;
        let now = self.clock.now_ms();

        if ok {
            self.last_flush_at = Some(now);
            if ticket.generation == self.generation {
                self.pending = false;
                self.due_at = None;
            } else if self.due_at.is_none() {
                let kind = self.last_kind.unwrap_or(ChangeKind::Content);
                self.schedule_persist(self.debounce_for(kind));
            }
            tracing::debug!(
                generation = ticket.generation,
                elapsed_ms = now.saturating_sub(ticket.started_at),
                still_pending = self.pending,
                "flush finished"
            );
        } else {
            self.failed_flushes += 1;
            let kind = self.last_kind.unwrap_or(ChangeKind::Content);
            self.schedule_persist(self.debounce_for(kind));
            tracing::warn!(
                generation = ticket.generation,
                failures = self.failed_flushes,
                "flush failed, rescheduled"
            );
        }
    }

    /// Whether the periodic local autosave interval has elapsed.
    pub fn autosave_due(&self) -> bool {
        self.clock.now_ms().saturating_sub(self.last_autosave_at)
            >= self.config.autosave_interval_ms
    }

    pub fn next_autosave_at(&self) -> Timestamp {
        self.last_autosave_at
            .saturating_add(self.config.autosave_interval_ms)
    }

    pub fn record_autosave(&mut self) {
        self.last_autosave_at = self.clock.now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    fn scheduler(clock: &ManualClock) -> PersistScheduler {
        PersistScheduler::new(PersistConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn debounce_restarts_on_each_change() {
        let clock = ManualClock::new(0);
        let mut persist = scheduler(&clock);

        persist.mark_local_changes(ChangeKind::Content);
        assert_eq!(persist.next_deadline(), Some(800));

        clock.advance_ms(500);
        persist.mark_local_changes(ChangeKind::Content);
        assert_eq!(persist.next_deadline(), Some(1_300));

        clock.advance_ms(500);
        assert!(!persist.is_due());
        clock.advance_ms(300);
        assert!(persist.is_due());
    }

    #[test]
    fn kinds_have_their_own_debounce() {
        let clock = ManualClock::new(0);
        let mut persist = scheduler(&clock);

        persist.mark_local_changes(ChangeKind::Structural);
        assert_eq!(persist.next_deadline(), Some(200));
        persist.mark_local_changes(ChangeKind::Position);
        assert_eq!(persist.next_deadline(), Some(1_500));
    }

    #[test]
    fn flush_is_single_flight() {
        let clock = ManualClock::new(0);
        let mut persist = scheduler(&clock);
        assert!(persist.begin_flush().is_none());

        persist.mark_local_changes(ChangeKind::Content);
        let ticket = persist.begin_flush().unwrap();
        assert!(persist.begin_flush().is_none());
        assert!(!persist.is_due());

        clock.advance_ms(50);
        persist.finish_flush(ticket, true);
        assert!(!persist.is_pending());
        assert_eq!(persist.last_flush_at(), Some(50));
    }

    #[test]
    fn changes_during_flush_stay_pending() {
        let clock = ManualClock::new(0);
        let mut persist = scheduler(&clock);

        persist.mark_local_changes(ChangeKind::Content);
        let ticket = persist.flush_pending_persist().unwrap();
        persist.mark_local_changes(ChangeKind::Structural);
        persist.finish_flush(ticket, true);

        assert!(persist.is_pending());
        assert_eq!(persist.next_deadline(), Some(200));
    }

    #[test]
    fn forced_flush_during_flight_keeps_changes_scheduled() {
        let clock = ManualClock::new(0);
        let mut persist = scheduler(&clock);

        persist.mark_local_changes(ChangeKind::Content);
        clock.advance_ms(800);
        let ticket = persist.begin_flush().unwrap();

        clock.advance_ms(10);
        persist.mark_local_changes(ChangeKind::Content);
        assert!(persist.flush_pending_persist().is_none());
        assert_eq!(persist.next_deadline(), Some(1_610));

        persist.finish_flush(ticket, true);
        assert!(persist.is_pending());

        clock.advance_ms(1_000_000);
        assert!(persist.is_due());
        assert!(persist.begin_flush().is_some());
    }

    #[test]
    fn finish_rearms_a_cleared_deadline() {
        let clock = ManualClock::new(0);
        let mut persist = scheduler(&clock);

        persist.mark_local_changes(ChangeKind::Content);
        let ticket = persist.begin_flush().unwrap();
        persist.mark_local_changes(ChangeKind::Position);
        // Host cancels the deadline while the flush runs
        persist.due_at = None;

        clock.advance_ms(20);
        persist.finish_flush(ticket, true);
        assert!(persist.is_pending());
        assert_eq!(persist.next_deadline(), Some(1_520));
    }

    #[test]
    fn failed_flush_reschedules() {
        let clock = ManualClock::new(0);
        let mut persist = scheduler(&clock);

        persist.mark_local_changes(ChangeKind::Position);
        clock.advance_ms(1_500);
        let ticket = persist.begin_flush().unwrap();
        persist.finish_flush(ticket, false);

        assert!(persist.is_pending());
        assert_eq!(persist.failed_flushes(), 1);
        assert_eq!(persist.next_deadline(), Some(3_000));
        assert_eq!(persist.last_flush_at(), None);
    }

    #[test]
    fn autosave_interval() {
        let clock = ManualClock::new(1_000);
        let mut persist = scheduler(&clock);
        assert!(!persist.autosave_due());
        assert_eq!(persist.next_autosave_at(), 31_000);

        clock.advance_ms(30_000);
        assert!(persist.autosave_due());
        persist.record_autosave();
        assert!(!persist.autosave_due());
    }
}

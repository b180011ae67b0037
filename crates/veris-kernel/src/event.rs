//! Append-only kernel event log
//!
//! Every process lifecycle transition and every message send/receive is
//! recorded here in true occurrence order, with monotonically increasing
//! ids. Downstream audit layers (tamper-evident logging, hash chains) read
//! this stream; the kernel itself only guarantees ordering and boundedness.
//!
//! The log is bounded: when full, the oldest records are trimmed. Ids are
//! never reused, so a consumer can detect the gap.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::Trap;
use crate::types::{Pid, Priority, ProcessState};

/// Maximum records retained before trimming.
pub const MAX_LOG_EVENTS: usize = 4096;

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    ProcessSpawned {
        name: String,
        priority: Priority,
        parent: Pid,
    },
    StateChanged {
        from: ProcessState,
        to: ProcessState,
    },
    MessageSent {
        message_id: u64,
        target: Pid,
        sequence: u64,
    },
    MessageReceived {
        message_id: u64,
        source: Pid,
        sequence: u64,
    },
    /// Pending messages dropped when their owner completed.
    MessagesDropped { count: usize },
    CapabilityCreated { cap_id: u64 },
    CapabilityDelegated { cap_id: u64, parent_cap: u64, to: Pid },
    CapabilityRevoked { cap_id: u64, cascade: usize },
    SyscallFailed { opcode: u32, code: u32 },
    TrapRaised { trap: Trap },
    MemoryAllocated { region_id: u64, size: u64 },
    MemoryFreed { region_id: u64, size: u64 },
}

/// One log record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic record id, never reused
    pub id: u64,
    /// Logical timestamp at emission
    pub timestamp: u64,
    /// Process the event concerns
    pub pid: Pid,
    pub kind: EventKind,
}

/// Bounded append-only event log.
#[derive(Clone, Debug)]
pub struct EventLog {
    events: VecDeque<EventRecord>,
    next_id: u64,
    max_events: usize,
    /// Records lost to trimming
    trimmed: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_EVENTS)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            max_events: max_events.max(1),
            trimmed: 0,
        }
    }

    /// Append a record, trimming the oldest if the log is full.
    /// Returns the record id.
    pub fn emit(&mut self, timestamp: u64, pid: Pid, kind: EventKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        log::trace!("event {id}: pid={} {:?}", pid.0, kind);
        self.events.push_back(EventRecord {
            id,
            timestamp,
            pid,
            kind,
        });
        while self.events.len() > self.max_events {
            self.events.pop_front();
            self.trimmed += 1;
        }
        id
    }

    /// All retained records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    /// The `n` most recent records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&EventRecord> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).collect()
    }

    /// Records with id >= `from_id`, oldest first.
    pub fn since(&self, from_id: u64) -> Vec<&EventRecord> {
        self.events.iter().filter(|e| e.id >= from_id).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Records lost to trimming since boot.
    pub fn trimmed(&self) -> u64 {
        self.trimmed
    }

    /// Id the next record will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_change(from: ProcessState, to: ProcessState) -> EventKind {
        EventKind::StateChanged { from, to }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut log = EventLog::new();
        let a = log.emit(0, Pid(1), state_change(ProcessState::Created, ProcessState::Ready));
        let b = log.emit(1, Pid(1), state_change(ProcessState::Ready, ProcessState::Running));
        let c = log.emit(2, Pid(2), state_change(ProcessState::Created, ProcessState::Ready));
        assert!(a < b && b < c);
    }

    #[test]
    fn test_occurrence_order_preserved() {
        let mut log = EventLog::new();
        for i in 0..10 {
            log.emit(i, Pid(1), EventKind::MessageSent {
                message_id: i,
                target: Pid(2),
                sequence: i,
            });
        }
        let ids: Vec<u64> = log.iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_trimming_keeps_newest_and_counts_losses() {
        let mut log = EventLog::with_capacity(3);
        for i in 0..5 {
            log.emit(i, Pid(1), EventKind::TrapRaised { trap: Trap::Timeout });
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.trimmed(), 2);
        // Oldest retained id is 3; ids 1 and 2 were trimmed, never reused.
        assert_eq!(log.iter().next().map(|e| e.id), Some(3));
        assert_eq!(log.next_id(), 6);
    }

    #[test]
    fn test_recent_and_since() {
        let mut log = EventLog::new();
        for i in 0..5 {
            log.emit(i, Pid(1), EventKind::CapabilityCreated { cap_id: i });
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, 4);
        assert_eq!(recent[1].id, 5);

        let since = log.since(3);
        assert_eq!(since.len(), 3);
        assert_eq!(since[0].id, 3);
    }

    #[test]
    fn test_recent_larger_than_log() {
        let mut log = EventLog::new();
        log.emit(0, Pid(1), EventKind::MemoryAllocated { region_id: 1, size: 64 });
        assert_eq!(log.recent(100).len(), 1);
    }
}

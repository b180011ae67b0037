//! Message bus: bounded per-process FIFO mailboxes
//!
//! All cross-process communication goes through here - there is no shared
//! memory between processes. Each live process owns exactly one mailbox,
//! created at spawn and removed at completion. Sequence numbers are scoped
//! per `(source, target)` pair, so ordering is guaranteed within a pair and
//! unconstrained across pairs.
//!
//! Send-permission checks belong to the capability layer; callers validate
//! before handing the message to the bus.

use std::collections::{BTreeMap, VecDeque};

use crate::error::KernelError;
use crate::types::{
    Mailbox, Message, MessageFlags, MessageHeader, Pid, Priority, MAX_PAYLOAD_SIZE,
};

/// The message bus. Owns every mailbox and all sequence counters.
#[derive(Clone, Debug, Default)]
pub struct MessageBus {
    mailboxes: BTreeMap<Pid, Mailbox>,
    /// Monotonic sequence counter per (source, target) pair.
    pair_seq: BTreeMap<(Pid, Pid), u64>,
    next_message_id: u64,
    total_messages: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            mailboxes: BTreeMap::new(),
            pair_seq: BTreeMap::new(),
            next_message_id: 1,
            total_messages: 0,
        }
    }

    /// Create a mailbox for a newly spawned process.
    pub fn create_mailbox(&mut self, pid: Pid, capacity: usize) {
        self.mailboxes.insert(
            pid,
            Mailbox {
                queue: VecDeque::new(),
                capacity,
                total_accepted: 0,
                high_water: 0,
            },
        );
    }

    /// Remove a mailbox when its owner completes. Pending messages are
    /// dropped; future sends fail with `SendTargetNotFound`.
    pub fn remove_mailbox(&mut self, pid: Pid) -> usize {
        self.mailboxes.remove(&pid).map(|m| m.queue.len()).unwrap_or(0)
    }

    /// Whether a mailbox exists for `pid`.
    pub fn has_mailbox(&self, pid: Pid) -> bool {
        self.mailboxes.contains_key(&pid)
    }

    /// Queued message count for `pid`.
    pub fn queue_len(&self, pid: Pid) -> usize {
        self.mailboxes.get(&pid).map(|m| m.queue.len()).unwrap_or(0)
    }

    /// Whether `pid` has at least one queued message.
    pub fn has_mail(&self, pid: Pid) -> bool {
        self.queue_len(pid) > 0
    }

    /// Append a message to the target mailbox.
    ///
    /// Rejects oversized payloads, missing targets, and full mailboxes -
    /// never truncates. On success the message carries a fresh global id
    /// and the next sequence number for its `(source, target)` pair.
    pub fn send(
        &mut self,
        source: Pid,
        target: Pid,
        priority: Priority,
        msg_type: u32,
        payload: Vec<u8>,
        flags: MessageFlags,
        now: u64,
    ) -> Result<Message, KernelError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(KernelError::SendPayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_SIZE,
            });
        }
        let mailbox = self
            .mailboxes
            .get_mut(&target)
            .ok_or(KernelError::SendTargetNotFound(target))?;
        if mailbox.queue.len() >= mailbox.capacity {
            return Err(KernelError::SendMailboxFull {
                target,
                capacity: mailbox.capacity,
            });
        }

        let seq = self.pair_seq.entry((source, target)).or_insert(0);
        *seq += 1;
        let message = Message {
            header: MessageHeader {
                id: self.next_message_id,
                source,
                target,
                sequence: *seq,
                timestamp: now,
                priority,
                flags,
            },
            msg_type,
            payload,
        };
        self.next_message_id += 1;
        self.total_messages += 1;

        mailbox.queue.push_back(message.clone());
        mailbox.total_accepted += 1;
        if mailbox.queue.len() > mailbox.high_water {
            mailbox.high_water = mailbox.queue.len();
        }
        Ok(message)
    }

    /// Dequeue the head of `pid`'s mailbox, if any.
    pub fn receive(&mut self, pid: Pid) -> Option<Message> {
        self.mailboxes.get_mut(&pid)?.queue.pop_front()
    }

    /// Total messages queued across all mailboxes.
    pub fn total_pending(&self) -> usize {
        self.mailboxes.values().map(|m| m.queue.len()).sum()
    }

    /// Total messages accepted since boot.
    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    /// Mailbox snapshot for diagnostics and invariant checks.
    pub fn mailbox(&self, pid: Pid) -> Option<&Mailbox> {
        self.mailboxes.get(&pid)
    }

    /// Iterate all mailboxes. Used by invariant checks.
    pub fn iter(&self) -> impl Iterator<Item = (&Pid, &Mailbox)> {
        self.mailboxes.iter()
    }

    /// Last sequence number issued for a pair (0 if none).
    pub fn pair_sequence(&self, source: Pid, target: Pid) -> u64 {
        self.pair_seq.get(&(source, target)).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with(pid: Pid, capacity: usize) -> MessageBus {
        let mut bus = MessageBus::new();
        bus.create_mailbox(pid, capacity);
        bus
    }

    fn send_simple(bus: &mut MessageBus, source: Pid, target: Pid) -> Result<Message, KernelError> {
        bus.send(
            source,
            target,
            Priority::Normal,
            0,
            vec![],
            MessageFlags::default(),
            0,
        )
    }

    #[test]
    fn test_send_receive_roundtrip() {
        let mut bus = bus_with(Pid(2), 16);
        let sent = bus
            .send(
                Pid(1),
                Pid(2),
                Priority::Normal,
                7,
                vec![1, 2, 3],
                MessageFlags::default(),
                100,
            )
            .unwrap();
        assert_eq!(sent.header.sequence, 1);
        assert_eq!(sent.header.timestamp, 100);
        let got = bus.receive(Pid(2)).unwrap();
        assert_eq!(got, sent);
        assert!(bus.receive(Pid(2)).is_none());
    }

    #[test]
    fn test_fifo_per_pair() {
        let mut bus = bus_with(Pid(9), 16);
        for _ in 0..5 {
            send_simple(&mut bus, Pid(1), Pid(9)).unwrap();
        }
        let mut seqs = Vec::new();
        while let Some(m) = bus.receive(Pid(9)) {
            seqs.push(m.header.sequence);
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_pairs_interleave_with_independent_sequences() {
        let mut bus = bus_with(Pid(9), 16);
        send_simple(&mut bus, Pid(1), Pid(9)).unwrap();
        send_simple(&mut bus, Pid(2), Pid(9)).unwrap();
        send_simple(&mut bus, Pid(1), Pid(9)).unwrap();
        send_simple(&mut bus, Pid(2), Pid(9)).unwrap();

        // Per-pair sequences count independently.
        assert_eq!(bus.pair_sequence(Pid(1), Pid(9)), 2);
        assert_eq!(bus.pair_sequence(Pid(2), Pid(9)), 2);

        // Per-pair order is preserved in the interleaved stream.
        let mut from_a = Vec::new();
        let mut from_b = Vec::new();
        while let Some(m) = bus.receive(Pid(9)) {
            match m.header.source {
                Pid(1) => from_a.push(m.header.sequence),
                Pid(2) => from_b.push(m.header.sequence),
                other => panic!("unexpected source {other:?}"),
            }
        }
        assert_eq!(from_a, vec![1, 2]);
        assert_eq!(from_b, vec![1, 2]);
    }

    #[test]
    fn test_mailbox_full_rejected_not_truncated() {
        let mut bus = bus_with(Pid(2), 2);
        send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        let err = send_simple(&mut bus, Pid(1), Pid(2)).unwrap_err();
        assert_eq!(
            err,
            KernelError::SendMailboxFull {
                target: Pid(2),
                capacity: 2
            }
        );
        assert_eq!(bus.queue_len(Pid(2)), 2);
        // A rejected send must not consume a sequence number.
        assert_eq!(bus.pair_sequence(Pid(1), Pid(2)), 2);
    }

    #[test]
    fn test_payload_too_large() {
        let mut bus = bus_with(Pid(2), 16);
        let err = bus
            .send(
                Pid(1),
                Pid(2),
                Priority::Normal,
                0,
                vec![0u8; MAX_PAYLOAD_SIZE + 1],
                MessageFlags::default(),
                0,
            )
            .unwrap_err();
        assert!(matches!(err, KernelError::SendPayloadTooLarge { .. }));
    }

    #[test]
    fn test_payload_at_limit_accepted() {
        let mut bus = bus_with(Pid(2), 16);
        bus.send(
            Pid(1),
            Pid(2),
            Priority::Normal,
            0,
            vec![0u8; MAX_PAYLOAD_SIZE],
            MessageFlags::default(),
            0,
        )
        .unwrap();
    }

    #[test]
    fn test_send_to_missing_target() {
        let mut bus = MessageBus::new();
        let err = send_simple(&mut bus, Pid(1), Pid(2)).unwrap_err();
        assert_eq!(err, KernelError::SendTargetNotFound(Pid(2)));
    }

    #[test]
    fn test_send_after_mailbox_removed() {
        let mut bus = bus_with(Pid(2), 16);
        send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        let dropped = bus.remove_mailbox(Pid(2));
        assert_eq!(dropped, 1);
        let err = send_simple(&mut bus, Pid(1), Pid(2)).unwrap_err();
        assert_eq!(err, KernelError::SendTargetNotFound(Pid(2)));
    }

    #[test]
    fn test_message_ids_globally_unique() {
        let mut bus = MessageBus::new();
        bus.create_mailbox(Pid(2), 16);
        bus.create_mailbox(Pid(3), 16);
        let a = send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        let b = send_simple(&mut bus, Pid(1), Pid(3)).unwrap();
        let c = send_simple(&mut bus, Pid(2), Pid(3)).unwrap();
        assert!(a.header.id < b.header.id && b.header.id < c.header.id);
    }

    #[test]
    fn test_high_water_tracks_deepest_queue() {
        let mut bus = bus_with(Pid(2), 16);
        send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        bus.receive(Pid(2)).unwrap();
        send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        let mb = bus.mailbox(Pid(2)).unwrap();
        assert_eq!(mb.high_water, 2);
        assert_eq!(mb.total_accepted, 3);
    }

    #[test]
    fn test_total_pending() {
        let mut bus = MessageBus::new();
        bus.create_mailbox(Pid(2), 16);
        bus.create_mailbox(Pid(3), 16);
        send_simple(&mut bus, Pid(1), Pid(2)).unwrap();
        send_simple(&mut bus, Pid(1), Pid(3)).unwrap();
        send_simple(&mut bus, Pid(1), Pid(3)).unwrap();
        assert_eq!(bus.total_pending(), 3);
        assert_eq!(bus.total_messages(), 3);
        bus.receive(Pid(3)).unwrap();
        assert_eq!(bus.total_pending(), 2);
        assert_eq!(bus.total_messages(), 3);
    }
}

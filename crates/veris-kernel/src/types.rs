//! Core kernel types
//!
//! This module contains the fundamental types used throughout the kernel core.
//! All types here are pure data - no behavior that depends on the host.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Process identifier. `Pid(0)` is reserved for the kernel itself and is used
/// as the no-parent sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(pub u64);

impl Pid {
    /// The reserved kernel/no-parent sentinel.
    pub const KERNEL: Pid = Pid(0);
}

/// Memory region identifier (coarse-grained tag, not an MMU mapping).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u64);

/// Scheduling priority class, ordered `Idle < Low < Normal < High < Realtime < System`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Realtime = 4,
    System = 5,
}

impl Priority {
    /// Convert from a raw level, rejecting anything outside `0..=5`.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Priority::Idle),
            1 => Some(Priority::Low),
            2 => Some(Priority::Normal),
            3 => Some(Priority::High),
            4 => Some(Priority::Realtime),
            5 => Some(Priority::System),
            _ => None,
        }
    }

    /// Raw ordinal level.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Default mailbox capacity for a process of this priority class.
    /// Higher-priority processes get deeper mailboxes.
    pub fn mailbox_capacity(self) -> usize {
        match self {
            Priority::Idle | Priority::Low | Priority::Normal => 16,
            Priority::High | Priority::Realtime => 32,
            Priority::System => 64,
        }
    }
}

/// Process lifecycle state.
///
/// The lifecycle is monotonic: `Completed` is terminal and has no outgoing
/// transitions. All transitions are listed in [`crate::process`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// Descriptor exists but has never been enqueued for scheduling
    Created,
    /// Eligible to run, waiting for a core
    Ready,
    /// Currently occupying a core
    Running,
    /// Suspended awaiting a message
    Waiting,
    /// Suspended on an external condition (supervisor hold)
    Blocked,
    /// Terminal state; descriptor may be reaped
    Completed,
}

/// Process descriptor - the authoritative record for one process.
///
/// Owned exclusively by the process table; the scheduler and mailbox layer
/// mutate it only through the defined transition functions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// Process ID
    pub pid: Pid,
    /// Human-readable name
    pub name: String,
    /// Current lifecycle state
    pub state: ProcessState,
    /// Base scheduling priority
    pub priority: Priority,
    /// Mailbox capacity (derived from priority at spawn)
    pub mailbox_capacity: usize,
    /// Accumulated CPU time in milliseconds
    pub cpu_time_ms: u64,
    /// Time spent Ready/Waiting since last dispatch, in milliseconds
    pub wait_time_ms: u64,
    /// Parent process (`Pid::KERNEL` for kernel-spawned)
    pub parent: Pid,
    /// Stable ready-queue insertion sequence. Assigned fresh on every normal
    /// entry into Ready; preserved across preemption so a displaced process
    /// resumes its original FIFO position.
    pub queue_seq: u64,
    /// Per-process counters
    pub metrics: ProcessMetrics,
}

/// Per-process resource counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessMetrics {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Syscalls made
    pub syscall_count: u64,
    /// Bytes currently allocated across owned regions
    pub allocated_bytes: u64,
    /// Timestamp of last syscall (logical ms)
    pub last_active_ms: u64,
    /// Spawn timestamp (logical ms)
    pub spawned_at_ms: u64,
}

/// Maximum message payload size in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Default number of execution slots.
pub const DEFAULT_NUM_CORES: usize = 1;

/// Default per-process memory budget in bytes.
pub const DEFAULT_MEMORY_BUDGET: u64 = 4 * 1024 * 1024;

/// Delivery flags carried in every message header. Each flag is independently
/// settable; the kernel records them but interpretation belongs to the
/// consuming layers (ack tracking, persistence, encryption are external).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    /// Receiver should acknowledge
    pub require_ack: bool,
    /// Part of a transactional exchange
    pub transactional: bool,
    /// Should be persisted by the storage layer
    pub persistent: bool,
    /// Payload is encrypted end-to-end
    pub encrypted: bool,
}

/// Message wire header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Kernel-assigned message id (globally monotonic)
    pub id: u64,
    /// Sending process
    pub source: Pid,
    /// Destination process
    pub target: Pid,
    /// FIFO sequence number, scoped per (source, target) pair
    pub sequence: u64,
    /// Logical timestamp at send
    pub timestamp: u64,
    /// Sender-requested delivery priority
    pub priority: Priority,
    /// Delivery flags
    pub flags: MessageFlags,
}

/// A message in flight or queued in a mailbox. Immutable once sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Wire header
    pub header: MessageHeader,
    /// Application-defined type tag
    pub msg_type: u32,
    /// Opaque payload
    pub payload: Vec<u8>,
}

/// Bounded FIFO message queue owned by one process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mailbox {
    /// Queued messages, head first
    pub queue: VecDeque<Message>,
    /// Maximum queue length
    pub capacity: usize,
    /// Total messages ever accepted
    pub total_accepted: u64,
    /// Deepest queue length observed
    pub high_water: usize,
}

/// Coarse-grained memory region tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    /// Region id
    pub id: RegionId,
    /// Owning process
    pub owner: Pid,
    /// Size in bytes
    pub size: u64,
}

/// System-wide metrics rollup.
#[derive(Clone, Debug, Serialize)]
pub struct SystemMetrics {
    /// Live (non-Completed) process count
    pub process_count: usize,
    /// Total messages queued across all mailboxes
    pub total_pending_messages: usize,
    /// Context switches performed since boot
    pub context_switches: u64,
    /// Total messages accepted since boot
    pub total_messages: u64,
    /// Uptime in logical milliseconds
    pub uptime_ms: u64,
}

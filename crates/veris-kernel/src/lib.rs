//! Veris Kernel - Deterministic Process and Messaging Core
//!
//! This crate contains the deterministic kernel core: a preemptive priority
//! scheduler with anti-starvation aging, FIFO-ordered bounded mailboxes,
//! capability-based access control, and a closed syscall ABI, all expressed
//! as a pure state machine.
//!
//! # Design Principles
//!
//! 1. **No I/O or side effects**: `step()` only transforms the given state
//! 2. **Deterministic**: same state + syscall + timestamp, same outcome
//! 3. **Typed failures**: syscalls never panic; every error is a value
//! 4. **Checkable**: the invariant suite validates every reachable state
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       veris-kernel                         │
//! │                                                            │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │  KernelState  │    │    step()     │                   │
//! │   │  - processes  │───▶│  pure state   │                   │
//! │   │  - scheduler  │    │  transformer  │                   │
//! │   │  - bus / caps │    └───────────────┘                   │
//! │   └───────────────┘                                        │
//! │                                                            │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │  Capability   │    │  Invariants   │                   │
//! │   │   manager     │    │    suite      │                   │
//! │   └───────────────┘    └───────────────┘                   │
//! └────────────────────────────────────────────────────────────┘
//!                              │
//!                              │ consumed by
//!                              ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │   veris-supervisor: trap escalation and restart policy     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - core data types (Pid, Priority, Message, ...)
//! - `error` - error taxonomy with category code ranges, traps
//! - `process` - process table and lifecycle state machine
//! - `sched` - priority scheduler, aging, preemption
//! - `mailbox` - bounded FIFO message bus
//! - `capability` - capability manager with attenuation and revocation
//! - `event` - append-only audit event log
//! - `state` - composite `KernelState`
//! - `step` - the pure syscall dispatcher
//! - `invariants` - reachable-state invariant checks
//! - `system` - `Kernel` runtime wrapper (boot/tick/syscall/shutdown)

pub mod capability;
pub mod error;
pub mod event;
pub mod invariants;
pub mod mailbox;
pub mod process;
pub mod sched;
pub mod state;
pub mod step;
pub mod system;
pub mod types;

pub use capability::{Capability, CapabilityManager, ResourceType, Rights};
pub use error::{CapabilityError, ErrorCategory, KernelError, Trap};
pub use event::{EventKind, EventLog, EventRecord, MAX_LOG_EVENTS};
pub use invariants::{check_all_invariants, InvariantViolation};
pub use mailbox::MessageBus;
pub use process::ProcessTable;
pub use sched::{effective_priority, Scheduler};
pub use state::{KernelConfig, KernelState};
pub use step::{report_trap, step, StepResult, Syscall, SyscallOutcome, TrapDisposition};
pub use system::Kernel;
pub use types::{
    Mailbox, Message, MessageFlags, MessageHeader, Pid, Priority, ProcessDescriptor,
    ProcessMetrics, ProcessState, Region, RegionId, SystemMetrics, DEFAULT_MEMORY_BUDGET,
    DEFAULT_NUM_CORES, MAX_PAYLOAD_SIZE,
};

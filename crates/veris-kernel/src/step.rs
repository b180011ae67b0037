//! Syscall dispatcher - the pure step function
//!
//! `step(state, pid, syscall, now)` is the single entry point for every
//! kernel operation. It validates authority, applies the operation to the
//! state, and returns a typed result. Properties:
//!
//! 1. **Deterministic**: same state + syscall + timestamp, same outcome
//! 2. **No side effects**: only the provided state is mutated
//! 3. **Authority checked**: capability-gated operations go through the
//!    capability manager before executing
//! 4. **Never panics**: every failure becomes a typed `SyscallOutcome`

use crate::capability::{ResourceType, Rights};
use crate::error::{KernelError, Trap};
use crate::event::EventKind;
use crate::state::KernelState;
use crate::types::{Message, MessageFlags, Pid, Priority, ProcessState, RegionId, MAX_PAYLOAD_SIZE};

/// The closed set of kernel operations.
#[derive(Clone, Debug)]
pub enum Syscall {
    /// Spawn a child process; it becomes Ready immediately
    Spawn { name: String, priority: Priority },
    /// Terminate the calling process
    Exit { code: i32 },
    /// Give up the core voluntarily
    Yield,
    /// Park until a message arrives (no-op if mail is already queued)
    Wait,
    /// Send a message to another process
    Send {
        target: Pid,
        priority: Priority,
        msg_type: u32,
        payload: Vec<u8>,
        flags: MessageFlags,
    },
    /// Dequeue the head of the caller's mailbox
    Receive,
    /// Respond to a prior sender without holding a channel capability
    Reply {
        target: Pid,
        msg_type: u32,
        payload: Vec<u8>,
    },
    /// Allocate a memory region against the caller's budget
    Alloc { size: u64 },
    /// Free an owned region
    Free { region: RegionId },
    /// Check access to a region (owner, or holder of a read capability)
    Map { region: RegionId },
    /// Issue a root capability over a resource the caller controls
    CapCreate {
        resource_type: ResourceType,
        resource_id: u64,
        rights: Rights,
        ttl_ms: u64,
        max_uses: u64,
    },
    /// Validate a capability token
    CapValidate { cap_id: u64 },
    /// Delegate an attenuated capability to another process
    CapDelegate {
        cap_id: u64,
        to: Pid,
        rights: Rights,
        ttl_ms: u64,
    },
    /// Revoke a capability and all its descendants
    CapRevoke { cap_id: u64 },
    /// Domain-defined operation, namespaced above the kernel opcodes
    Custom { id: u32, payload: Vec<u8> },
}

impl Syscall {
    /// Numeric opcode for the wire ABI.
    pub fn opcode(&self) -> u32 {
        match self {
            Syscall::Spawn { .. } => 1,
            Syscall::Exit { .. } => 2,
            Syscall::Yield => 3,
            Syscall::Wait => 4,
            Syscall::Send { .. } => 10,
            Syscall::Receive => 11,
            Syscall::Reply { .. } => 12,
            Syscall::Alloc { .. } => 20,
            Syscall::Free { .. } => 21,
            Syscall::Map { .. } => 22,
            Syscall::CapCreate { .. } => 30,
            Syscall::CapValidate { .. } => 31,
            Syscall::CapDelegate { .. } => 32,
            Syscall::CapRevoke { .. } => 33,
            Syscall::Custom { id, .. } => 1000 + id,
        }
    }
}

/// What the caller gets back. Always typed; never a panic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Success with a scalar value
    Ok(u64),
    /// Success with a dequeued message
    Message(Message),
    /// Typed failure
    Error { code: u32, message: String },
    /// Operation would block; the caller has been parked Waiting
    Blocked,
    /// Operation timed out
    Timeout,
}

impl SyscallOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SyscallOutcome::Ok(_) | SyscallOutcome::Message(_))
    }

    fn err(e: KernelError) -> Self {
        SyscallOutcome::Error {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Result of one step: the outcome plus the event-log record ids emitted
/// while handling it, in occurrence order.
#[derive(Clone, Debug)]
pub struct StepResult {
    pub outcome: SyscallOutcome,
    pub events: Vec<u64>,
}

/// Execute one syscall against the kernel state.
///
/// `from` is the calling process; `Pid::KERNEL` carries ambient authority
/// (used by the runtime to bootstrap processes and capabilities).
pub fn step(state: &mut KernelState, from: Pid, syscall: Syscall, now: u64) -> StepResult {
    let first_event = state.log.next_id();
    let opcode = syscall.opcode();

    let outcome = if state.is_shutdown() {
        SyscallOutcome::err(KernelError::Shutdown)
    } else {
        state.update_syscall_metrics(from, now);
        match syscall {
            Syscall::Spawn { name, priority } => step_spawn(state, from, &name, priority, now),
            Syscall::Exit { code } => step_exit(state, from, code, now),
            Syscall::Yield => step_yield(state, from, now),
            Syscall::Wait => step_wait(state, from, now),
            Syscall::Send {
                target,
                priority,
                msg_type,
                payload,
                flags,
            } => step_send(state, from, target, priority, msg_type, payload, flags, now),
            Syscall::Receive => step_receive(state, from, now),
            Syscall::Reply {
                target,
                msg_type,
                payload,
            } => step_reply(state, from, target, msg_type, payload, now),
            Syscall::Alloc { size } => step_alloc(state, from, size, now),
            Syscall::Free { region } => step_free(state, from, region, now),
            Syscall::Map { region } => step_map(state, from, region, now),
            Syscall::CapCreate {
                resource_type,
                resource_id,
                rights,
                ttl_ms,
                max_uses,
            } => step_cap_create(state, from, resource_type, resource_id, rights, ttl_ms, max_uses, now),
            Syscall::CapValidate { cap_id } => step_cap_validate(state, from, cap_id, now),
            Syscall::CapDelegate {
                cap_id,
                to,
                rights,
                ttl_ms,
            } => step_cap_delegate(state, from, cap_id, to, rights, ttl_ms, now),
            Syscall::CapRevoke { cap_id } => step_cap_revoke(state, from, cap_id, now),
            // No kernel semantics; the domain layer interprets these.
            Syscall::Custom { .. } => SyscallOutcome::Ok(0),
        }
    };

    if let SyscallOutcome::Error { code, .. } = outcome {
        state
            .log
            .emit(now, from, EventKind::SyscallFailed { opcode, code });
        log::debug!("syscall {opcode} from pid {} failed with code {code}", from.0);
    }

    let events = (first_event..state.log.next_id()).collect();
    StepResult { outcome, events }
}

/// Require that `pid` is Running (or the kernel itself).
fn require_running(state: &KernelState, pid: Pid) -> Result<(), KernelError> {
    if pid == Pid::KERNEL {
        return Ok(());
    }
    match state.processes.get(pid) {
        None => Err(KernelError::ProcessNotFound(pid)),
        Some(p) if p.state == ProcessState::Running => Ok(()),
        Some(p) => Err(KernelError::NotRunning(pid, p.state)),
    }
}

// ============================================================================
// Process lifecycle
// ============================================================================

fn step_spawn(
    state: &mut KernelState,
    from: Pid,
    name: &str,
    priority: Priority,
    now: u64,
) -> SyscallOutcome {
    if name.is_empty() {
        return SyscallOutcome::err(KernelError::InvalidArgument(
            "process name must not be empty".into(),
        ));
    }
    let pid = state.spawn(name, priority, from, now);
    if let Err(e) = state.scheduler.enqueue(&mut state.processes, pid) {
        return SyscallOutcome::err(e);
    }
    state.log.emit(
        now,
        pid,
        EventKind::StateChanged {
            from: ProcessState::Created,
            to: ProcessState::Ready,
        },
    );
    // The newcomer may outrank a running process.
    state.preempt_if_needed(now);
    SyscallOutcome::Ok(pid.0)
}

fn step_exit(state: &mut KernelState, from: Pid, code: i32, now: u64) -> SyscallOutcome {
    if let Err(e) = require_running(state, from) {
        return SyscallOutcome::err(e);
    }
    if from == Pid::KERNEL {
        return SyscallOutcome::err(KernelError::InvalidArgument(
            "the kernel cannot exit".into(),
        ));
    }
    match state.complete(from, now) {
        Ok(()) => {
            state.dispatch(now);
            SyscallOutcome::Ok(code as u32 as u64)
        }
        Err(e) => SyscallOutcome::err(e),
    }
}

fn step_yield(state: &mut KernelState, from: Pid, now: u64) -> SyscallOutcome {
    if let Err(e) = require_running(state, from) {
        return SyscallOutcome::err(e);
    }
    if from == Pid::KERNEL {
        return SyscallOutcome::Ok(0);
    }
    // Back of the FIFO: yielding surrenders the old queue position.
    if let Err(e) = state.scheduler.enqueue(&mut state.processes, from) {
        return SyscallOutcome::err(e);
    }
    state.log.emit(
        now,
        from,
        EventKind::StateChanged {
            from: ProcessState::Running,
            to: ProcessState::Ready,
        },
    );
    state.dispatch(now);
    SyscallOutcome::Ok(0)
}

fn step_wait(state: &mut KernelState, from: Pid, now: u64) -> SyscallOutcome {
    if let Err(e) = require_running(state, from) {
        return SyscallOutcome::err(e);
    }
    let pending = state.bus.queue_len(from);
    if pending > 0 {
        return SyscallOutcome::Ok(pending as u64);
    }
    if let Err(e) = state.scheduler.park(&mut state.processes, from) {
        return SyscallOutcome::err(e);
    }
    state.log.emit(
        now,
        from,
        EventKind::StateChanged {
            from: ProcessState::Running,
            to: ProcessState::Waiting,
        },
    );
    state.dispatch(now);
    SyscallOutcome::Blocked
}

// ============================================================================
// Messaging
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn step_send(
    state: &mut KernelState,
    from: Pid,
    target: Pid,
    priority: Priority,
    msg_type: u32,
    payload: Vec<u8>,
    flags: MessageFlags,
    now: u64,
) -> SyscallOutcome {
    if !state.processes.is_live(target) {
        return SyscallOutcome::err(KernelError::SendTargetNotFound(target));
    }
    // Refuse undeliverable sends up front, so a doomed delivery never
    // consumes the sender's capability usage budget.
    if payload.len() > MAX_PAYLOAD_SIZE {
        return SyscallOutcome::err(KernelError::SendPayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    if let Some(mailbox) = state.bus.mailbox(target) {
        if mailbox.queue.len() >= mailbox.capacity {
            return SyscallOutcome::err(KernelError::SendMailboxFull {
                target,
                capacity: mailbox.capacity,
            });
        }
    }
    // The sender must hold write authority on the target's channel. The
    // kernel itself carries ambient authority.
    if from != Pid::KERNEL {
        let granted = state.caps.exercise_for_resource(
            from,
            ResourceType::Channel,
            target.0,
            &Rights::write_only(),
            now,
        );
        if granted.is_err() {
            return SyscallOutcome::err(KernelError::SendPermissionDenied(from));
        }
    }
    deliver(state, from, target, priority, msg_type, payload, flags, now)
}

fn step_reply(
    state: &mut KernelState,
    from: Pid,
    target: Pid,
    msg_type: u32,
    payload: Vec<u8>,
    now: u64,
) -> SyscallOutcome {
    if !state.processes.is_live(target) {
        return SyscallOutcome::err(KernelError::SendTargetNotFound(target));
    }
    // Receiving a message confers the authority to answer its sender; no
    // channel capability is needed, but only if the target really has sent
    // to us before.
    if from != Pid::KERNEL && state.bus.pair_sequence(target, from) == 0 {
        return SyscallOutcome::err(KernelError::SendPermissionDenied(from));
    }
    deliver(
        state,
        from,
        target,
        Priority::Normal,
        msg_type,
        payload,
        MessageFlags::default(),
        now,
    )
}

/// Common delivery path for Send and Reply: enqueue, account, wake.
#[allow(clippy::too_many_arguments)]
fn deliver(
    state: &mut KernelState,
    from: Pid,
    target: Pid,
    priority: Priority,
    msg_type: u32,
    payload: Vec<u8>,
    flags: MessageFlags,
    now: u64,
) -> SyscallOutcome {
    let message = match state
        .bus
        .send(from, target, priority, msg_type, payload, flags, now)
    {
        Ok(m) => m,
        Err(e) => return SyscallOutcome::err(e),
    };
    if let Some(p) = state.processes.get_mut(from) {
        p.metrics.messages_sent += 1;
    }
    state.log.emit(
        now,
        from,
        EventKind::MessageSent {
            message_id: message.header.id,
            target,
            sequence: message.header.sequence,
        },
    );
    // Wake-on-message: a Waiting receiver becomes Ready and competes
    // normally for a core.
    let _ = state.wake_if_waiting(target, now);
    state.preempt_if_needed(now);
    state.dispatch(now);
    SyscallOutcome::Ok(message.header.sequence)
}

fn step_receive(state: &mut KernelState, from: Pid, now: u64) -> SyscallOutcome {
    if let Err(e) = require_running(state, from) {
        return SyscallOutcome::err(e);
    }
    match state.bus.receive(from) {
        Some(message) => {
            if let Some(p) = state.processes.get_mut(from) {
                p.metrics.messages_received += 1;
            }
            state.log.emit(
                now,
                from,
                EventKind::MessageReceived {
                    message_id: message.header.id,
                    source: message.header.source,
                    sequence: message.header.sequence,
                },
            );
            SyscallOutcome::Message(message)
        }
        None => {
            // Empty mailbox: blocking is modeled as the Waiting state.
            if from == Pid::KERNEL {
                return SyscallOutcome::Blocked;
            }
            if let Err(e) = state.scheduler.park(&mut state.processes, from) {
                return SyscallOutcome::err(e);
            }
            state.log.emit(
                now,
                from,
                EventKind::StateChanged {
                    from: ProcessState::Running,
                    to: ProcessState::Waiting,
                },
            );
            state.dispatch(now);
            SyscallOutcome::Blocked
        }
    }
}

// ============================================================================
// Memory regions
// ============================================================================

fn step_alloc(state: &mut KernelState, from: Pid, size: u64, now: u64) -> SyscallOutcome {
    if size == 0 {
        return SyscallOutcome::err(KernelError::InvalidArgument(
            "allocation size must be positive".into(),
        ));
    }
    if !state.processes.is_live(from) {
        return SyscallOutcome::err(KernelError::ProcessNotFound(from));
    }
    match state.alloc_region(from, size, now) {
        Ok(id) => SyscallOutcome::Ok(id.0),
        Err(e) => SyscallOutcome::err(e),
    }
}

fn step_free(state: &mut KernelState, from: Pid, region: RegionId, now: u64) -> SyscallOutcome {
    match state.free_region(from, region, now) {
        Ok(size) => SyscallOutcome::Ok(size),
        Err(e) => SyscallOutcome::err(e),
    }
}

fn step_map(state: &mut KernelState, from: Pid, region: RegionId, now: u64) -> SyscallOutcome {
    let (owner, size) = match state.regions.get(&region) {
        Some(r) => (r.owner, r.size),
        None => return SyscallOutcome::err(KernelError::RegionNotFound(region.0)),
    };
    if owner == from || from == Pid::KERNEL {
        return SyscallOutcome::Ok(size);
    }
    // Foreign regions require read authority over the Memory resource.
    match state.caps.exercise_for_resource(
        from,
        ResourceType::Memory,
        region.0,
        &Rights::read_only(),
        now,
    ) {
        Ok(_) => SyscallOutcome::Ok(size),
        Err(e) => SyscallOutcome::err(KernelError::Capability(e)),
    }
}

// ============================================================================
// Capability operations
// ============================================================================

/// Whether `from` controls the resource it wants to mint a root token for.
fn controls_resource(
    state: &KernelState,
    from: Pid,
    resource_type: ResourceType,
    resource_id: u64,
) -> bool {
    if from == Pid::KERNEL {
        return true;
    }
    match resource_type {
        ResourceType::Channel | ResourceType::Process => resource_id == from.0,
        ResourceType::Memory => state
            .regions
            .get(&RegionId(resource_id))
            .map(|r| r.owner == from)
            .unwrap_or(false),
        ResourceType::Module => false,
    }
}

#[allow(clippy::too_many_arguments)]
fn step_cap_create(
    state: &mut KernelState,
    from: Pid,
    resource_type: ResourceType,
    resource_id: u64,
    rights: Rights,
    ttl_ms: u64,
    max_uses: u64,
    now: u64,
) -> SyscallOutcome {
    if !controls_resource(state, from, resource_type, resource_id) {
        return SyscallOutcome::err(KernelError::Capability(
            crate::error::CapabilityError::InsufficientRights,
        ));
    }
    let id = state
        .caps
        .create(from, resource_type, resource_id, rights, now, ttl_ms, max_uses);
    state
        .log
        .emit(now, from, EventKind::CapabilityCreated { cap_id: id });
    SyscallOutcome::Ok(id)
}

fn step_cap_validate(state: &mut KernelState, _from: Pid, cap_id: u64, now: u64) -> SyscallOutcome {
    match state.caps.validate(cap_id, now) {
        Ok(_) => SyscallOutcome::Ok(1),
        Err(e) => SyscallOutcome::err(KernelError::Capability(e)),
    }
}

fn step_cap_delegate(
    state: &mut KernelState,
    from: Pid,
    cap_id: u64,
    to: Pid,
    rights: Rights,
    ttl_ms: u64,
    now: u64,
) -> SyscallOutcome {
    // Only the holder may delegate its token.
    let held = state
        .caps
        .get(cap_id)
        .map(|c| c.holder == from || from == Pid::KERNEL)
        .unwrap_or(false);
    if !held {
        return SyscallOutcome::err(KernelError::Capability(
            crate::error::CapabilityError::NotFound(cap_id),
        ));
    }
    if !state.processes.is_live(to) {
        return SyscallOutcome::err(KernelError::ProcessNotFound(to));
    }
    match state.caps.delegate(cap_id, to, rights, now, ttl_ms) {
        Ok(child) => {
            state.log.emit(
                now,
                from,
                EventKind::CapabilityDelegated {
                    cap_id: child,
                    parent_cap: cap_id,
                    to,
                },
            );
            SyscallOutcome::Ok(child)
        }
        Err(e) => SyscallOutcome::err(KernelError::Capability(e)),
    }
}

fn step_cap_revoke(state: &mut KernelState, from: Pid, cap_id: u64, now: u64) -> SyscallOutcome {
    let held = state
        .caps
        .get(cap_id)
        .map(|c| c.holder == from || from == Pid::KERNEL)
        .unwrap_or(false);
    if !held {
        return SyscallOutcome::err(KernelError::Capability(
            crate::error::CapabilityError::NotFound(cap_id),
        ));
    }
    match state.caps.revoke(cap_id) {
        Ok(cascade) => {
            state.log.emit(
                now,
                from,
                EventKind::CapabilityRevoked { cap_id, cascade },
            );
            SyscallOutcome::Ok(cascade as u64)
        }
        Err(e) => SyscallOutcome::err(KernelError::Capability(e)),
    }
}

// ============================================================================
// Traps
// ============================================================================

/// What the runtime should do after a trap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapDisposition {
    /// Recoverable: the process stays alive, the caller may retry
    Retry,
    /// Fatal: the process has been terminated, escalate to the supervisor
    Escalate,
}

/// Report a trap raised by `pid`.
///
/// Recoverable traps (timeout, out-of-memory) leave the process alive.
/// Every other trap terminates it and must escalate.
pub fn report_trap(state: &mut KernelState, pid: Pid, trap: Trap, now: u64) -> TrapDisposition {
    state.log.emit(now, pid, EventKind::TrapRaised { trap });
    if trap.is_recoverable() {
        return TrapDisposition::Retry;
    }
    log::warn!("fatal trap {trap:?} in pid {}", pid.0);
    if state.complete(pid, now).is_ok() {
        state.dispatch(now);
    }
    TrapDisposition::Escalate
}

//! Process table and lifecycle state machine
//!
//! The process table is the authoritative owner of every
//! [`ProcessDescriptor`]. The scheduler and mailbox layer never mutate
//! descriptor state directly - every state change goes through
//! [`ProcessTable::transition`], which enforces the lifecycle edges:
//!
//! ```text
//! Created -> Ready -> Running -> Ready      (yield / preempt)
//!                     Running -> Waiting -> Ready   (wait / wake)
//!                     Running -> Blocked -> Ready   (supervisor hold)
//!                     any live state -> Completed   (exit / escalation)
//! ```
//!
//! `Completed` is terminal; a descriptor may only be removed from the table
//! after reaching it.

use std::collections::BTreeMap;

use crate::error::KernelError;
use crate::types::{Pid, Priority, ProcessDescriptor, ProcessMetrics, ProcessState};

/// Whether `from -> to` is a legal lifecycle edge.
pub fn transition_allowed(from: ProcessState, to: ProcessState) -> bool {
    use ProcessState::*;
    match (from, to) {
        (Created, Ready) => true,
        (Ready, Running) => true,
        (Running, Ready) => true,
        (Running, Waiting) => true,
        (Running, Blocked) => true,
        (Waiting, Ready) => true,
        (Blocked, Ready) => true,
        // Termination is reachable from any live state (voluntary exit is
        // Running -> Completed; escalation may terminate a suspended process).
        (Completed, _) => false,
        (_, Completed) => true,
        _ => false,
    }
}

/// The process table - a dense map keyed by Pid.
///
/// All cross-process references in the kernel are Pid lookups into this
/// table; descriptors never hold references to each other.
#[derive(Clone, Debug, Default)]
pub struct ProcessTable {
    procs: BTreeMap<Pid, ProcessDescriptor>,
    next_pid: u64,
}

impl ProcessTable {
    /// Create an empty table. Pid 0 is reserved, so allocation starts at 1.
    pub fn new() -> Self {
        Self {
            procs: BTreeMap::new(),
            next_pid: 1,
        }
    }

    /// Allocate the next Pid.
    fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Spawn a new process descriptor in `Created` state.
    ///
    /// Mailbox capacity is derived from the priority class.
    pub fn spawn(&mut self, name: &str, priority: Priority, parent: Pid, now: u64) -> Pid {
        let pid = self.alloc_pid();
        let descriptor = ProcessDescriptor {
            pid,
            name: name.to_string(),
            state: ProcessState::Created,
            priority,
            mailbox_capacity: priority.mailbox_capacity(),
            cpu_time_ms: 0,
            wait_time_ms: 0,
            parent,
            queue_seq: 0,
            metrics: ProcessMetrics {
                spawned_at_ms: now,
                ..Default::default()
            },
        };
        self.procs.insert(pid, descriptor);
        pid
    }

    /// Get a descriptor.
    pub fn get(&self, pid: Pid) -> Option<&ProcessDescriptor> {
        self.procs.get(&pid)
    }

    /// Get a mutable descriptor.
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessDescriptor> {
        self.procs.get_mut(&pid)
    }

    /// Whether a descriptor exists at all (including Completed).
    pub fn contains(&self, pid: Pid) -> bool {
        self.procs.contains_key(&pid)
    }

    /// Whether a process exists and has not completed.
    pub fn is_live(&self, pid: Pid) -> bool {
        self.procs
            .get(&pid)
            .map(|p| p.state != ProcessState::Completed)
            .unwrap_or(false)
    }

    /// Apply a lifecycle transition, enforcing the edge table.
    ///
    /// Entering `Running` resets accumulated wait time to zero.
    pub fn transition(&mut self, pid: Pid, to: ProcessState) -> Result<(), KernelError> {
        let proc = self
            .procs
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        let from = proc.state;
        if !transition_allowed(from, to) {
            return Err(KernelError::InvalidTransition { pid, from, to });
        }
        proc.state = to;
        if to == ProcessState::Running {
            proc.wait_time_ms = 0;
        }
        Ok(())
    }

    /// Remove a descriptor. Only legal once the process has completed.
    pub fn reap(&mut self, pid: Pid) -> Result<ProcessDescriptor, KernelError> {
        match self.procs.get(&pid) {
            None => Err(KernelError::ProcessNotFound(pid)),
            Some(p) if p.state != ProcessState::Completed => Err(KernelError::InvalidTransition {
                pid,
                from: p.state,
                to: ProcessState::Completed,
            }),
            Some(_) => self
                .procs
                .remove(&pid)
                .ok_or(KernelError::ProcessNotFound(pid)),
        }
    }

    /// Iterate over all descriptors.
    pub fn iter(&self) -> impl Iterator<Item = (&Pid, &ProcessDescriptor)> {
        self.procs.iter()
    }

    /// Iterate mutably over all descriptors.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Pid, &mut ProcessDescriptor)> {
        self.procs.iter_mut()
    }

    /// Number of descriptors in the table (including Completed).
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Number of live (non-Completed) processes.
    pub fn live_count(&self) -> usize {
        self.procs
            .values()
            .filter(|p| p.state != ProcessState::Completed)
            .count()
    }

    /// The next Pid that will be allocated. Exposed for invariant checks.
    pub fn next_pid(&self) -> u64 {
        self.next_pid
    }
}

//! Kernel invariant checks
//!
//! Every property in this module must hold in every reachable state. The
//! checks are pure and read-only; the runtime runs them after each step in
//! debug configurations, and the property tests run them after every
//! generated syscall sequence.

use std::collections::BTreeSet;

use crate::state::KernelState;
use crate::types::{Pid, ProcessState};

/// A detected invariant violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Which check failed
    pub check: &'static str,
    /// Human-readable detail
    pub detail: String,
}

impl InvariantViolation {
    fn new(check: &'static str, detail: String) -> Self {
        Self { check, detail }
    }
}

/// Every pid in the running set exists, is Running, and the set is no
/// larger than the core count. Conversely every Running process is in the
/// running set.
pub fn check_running_set(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let running: BTreeSet<Pid> = state.scheduler.running().collect();

    if running.len() > state.scheduler.num_cores() {
        violations.push(InvariantViolation::new(
            "running_bounded",
            format!(
                "{} running processes on {} cores",
                running.len(),
                state.scheduler.num_cores()
            ),
        ));
    }
    for &pid in &running {
        match state.processes.get(pid) {
            None => violations.push(InvariantViolation::new(
                "running_exists",
                format!("running set contains unknown pid {}", pid.0),
            )),
            Some(p) if p.state != ProcessState::Running => {
                violations.push(InvariantViolation::new(
                    "running_state",
                    format!("pid {} in running set but state is {:?}", pid.0, p.state),
                ))
            }
            Some(_) => {}
        }
    }
    for (pid, proc) in state.processes.iter() {
        if proc.state == ProcessState::Running && !running.contains(pid) {
            violations.push(InvariantViolation::new(
                "running_complete",
                format!("pid {} is Running but absent from the running set", pid.0),
            ));
        }
    }
    violations
}

/// Every ready-queue entry exists, is Ready, and appears exactly once.
pub fn check_ready_queue(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut seen = BTreeSet::new();
    for &pid in state.scheduler.ready_queue() {
        if !seen.insert(pid) {
            violations.push(InvariantViolation::new(
                "ready_unique",
                format!("pid {} appears twice in the ready queue", pid.0),
            ));
        }
        match state.processes.get(pid) {
            None => violations.push(InvariantViolation::new(
                "ready_exists",
                format!("ready queue contains unknown pid {}", pid.0),
            )),
            Some(p) if p.state != ProcessState::Ready => {
                violations.push(InvariantViolation::new(
                    "ready_state",
                    format!("pid {} in ready queue but state is {:?}", pid.0, p.state),
                ))
            }
            Some(_) => {}
        }
    }
    for (pid, proc) in state.processes.iter() {
        if proc.state == ProcessState::Ready && !seen.contains(pid) {
            violations.push(InvariantViolation::new(
                "ready_complete",
                format!("pid {} is Ready but absent from the ready queue", pid.0),
            ));
        }
    }
    violations
}

/// No mailbox exceeds its capacity, live processes have mailboxes, and
/// completed processes do not.
pub fn check_mailboxes(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for (pid, mailbox) in state.bus.iter() {
        if mailbox.queue.len() > mailbox.capacity {
            violations.push(InvariantViolation::new(
                "mailbox_bounded",
                format!(
                    "mailbox of pid {} holds {} messages, capacity {}",
                    pid.0,
                    mailbox.queue.len(),
                    mailbox.capacity
                ),
            ));
        }
    }
    for (pid, proc) in state.processes.iter() {
        let has = state.bus.has_mailbox(*pid);
        if proc.state == ProcessState::Completed && has {
            violations.push(InvariantViolation::new(
                "mailbox_reaped",
                format!("completed pid {} still owns a mailbox", pid.0),
            ));
        }
        if proc.state != ProcessState::Completed && !has {
            violations.push(InvariantViolation::new(
                "mailbox_present",
                format!("live pid {} has no mailbox", pid.0),
            ));
        }
    }
    violations
}

/// Per-(source, target) message sequences are strictly increasing in queue
/// order - the FIFO guarantee as seen from the receiver.
pub fn check_fifo_sequences(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for (pid, mailbox) in state.bus.iter() {
        let mut last_seq: std::collections::BTreeMap<Pid, u64> = Default::default();
        for msg in &mailbox.queue {
            let prev = last_seq.insert(msg.header.source, msg.header.sequence);
            if let Some(prev) = prev {
                if msg.header.sequence <= prev {
                    violations.push(InvariantViolation::new(
                        "fifo_per_pair",
                        format!(
                            "mailbox of pid {}: sequence {} from pid {} after {}",
                            pid.0, msg.header.sequence, msg.header.source.0, prev
                        ),
                    ));
                }
            }
        }
    }
    violations
}

/// Delegated capabilities never carry rights their parent lacks, and no
/// live capability has a revoked ancestor.
pub fn check_capabilities(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for (id, cap) in state.caps.iter() {
        if let Some(parent_id) = cap.parent {
            match state.caps.get(parent_id) {
                None => violations.push(InvariantViolation::new(
                    "cap_parent_exists",
                    format!("capability {id} has unknown parent {parent_id}"),
                )),
                Some(parent) => {
                    if !cap.rights.is_subset_of(&parent.rights) {
                        violations.push(InvariantViolation::new(
                            "cap_attenuation",
                            format!("capability {id} carries rights its parent {parent_id} lacks"),
                        ));
                    }
                    if parent.revoked && !cap.revoked {
                        violations.push(InvariantViolation::new(
                            "cap_cascade",
                            format!("capability {id} is live under revoked parent {parent_id}"),
                        ));
                    }
                }
            }
        }
    }
    violations
}

/// Each process's allocated_bytes equals the sum of its owned regions, and
/// every region owner exists.
pub fn check_regions(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut owned: std::collections::BTreeMap<Pid, u64> = Default::default();
    for region in state.regions.values() {
        *owned.entry(region.owner).or_insert(0) += region.size;
        if !state.processes.contains(region.owner) {
            violations.push(InvariantViolation::new(
                "region_owner_exists",
                format!("region {} owned by unknown pid {}", region.id.0, region.owner.0),
            ));
        }
    }
    for (pid, proc) in state.processes.iter() {
        let sum = owned.get(pid).copied().unwrap_or(0);
        if proc.metrics.allocated_bytes != sum {
            violations.push(InvariantViolation::new(
                "region_accounting",
                format!(
                    "pid {} reports {} allocated bytes but owns regions totalling {}",
                    pid.0, proc.metrics.allocated_bytes, sum
                ),
            ));
        }
    }
    violations
}

/// Run every check. Empty means the state is sound.
pub fn check_all_invariants(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    violations.extend(check_running_set(state));
    violations.extend(check_ready_queue(state));
    violations.extend(check_mailboxes(state));
    violations.extend(check_fifo_sequences(state));
    violations.extend(check_capabilities(state));
    violations.extend(check_regions(state));
    violations
}

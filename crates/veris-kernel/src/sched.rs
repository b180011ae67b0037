//! Preemptive priority scheduler with anti-starvation aging
//!
//! Selection rule: among all Ready processes, run the one with the highest
//! *effective* priority; ties break by stable FIFO position (queue_seq).
//! Effective priority is the base priority plus a boost of one level per
//! full second of accumulated wait time, capped at +2 and clamped at
//! Realtime, so an aged process can never reach System.
//!
//! Preemption displaces a Running process only when a Ready process has
//! strictly greater effective priority and the running process's base is
//! below System. The displaced process keeps its original queue_seq, so it
//! resumes its old FIFO position instead of going to the back - this is
//! what bounds starvation under sustained high-priority pressure.
//!
//! Scheduling never raises user-visible errors: with no Ready process the
//! scheduler idles until a message delivery or aging tick changes the set.

use std::collections::BTreeSet;

use crate::error::KernelError;
use crate::process::ProcessTable;
use crate::types::{Pid, Priority, ProcessState};

/// Aging boost cap: at most two levels earned by waiting.
const MAX_AGING_BOOST: u64 = 2;

/// Effective priority for scheduling decisions.
///
/// `min(base + min(wait_ms / 1000, 2), Realtime)`. The Realtime clamp also
/// applies to a System base, yielding 4 rather than 5.
// TODO: clarify with product whether a System base should be exempt from the
// Realtime clamp; current behavior matches the documented formula.
pub fn effective_priority(base: Priority, wait_ms: u64) -> u8 {
    let boost = (wait_ms / 1000).min(MAX_AGING_BOOST);
    (base.level() as u64 + boost).min(Priority::Realtime.level() as u64) as u8
}

/// Scheduler state: the ready queue, the running set, and counters.
///
/// Owned by the kernel state with an explicit init/tick lifecycle; mutated
/// only by the scheduler under a single-writer rule, so no partial update
/// is ever externally observable.
#[derive(Clone, Debug)]
pub struct Scheduler {
    /// Ready Pids. Order is immaterial; FIFO position comes from each
    /// descriptor's queue_seq.
    ready: Vec<Pid>,
    /// Currently running Pids, |running| <= num_cores.
    running: BTreeSet<Pid>,
    num_cores: usize,
    context_switches: u64,
    next_queue_seq: u64,
}

impl Scheduler {
    pub fn new(num_cores: usize) -> Self {
        Self {
            ready: Vec::new(),
            running: BTreeSet::new(),
            num_cores: num_cores.max(1),
            context_switches: 0,
            next_queue_seq: 1,
        }
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// Pids currently running.
    pub fn running(&self) -> impl Iterator<Item = Pid> + '_ {
        self.running.iter().copied()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, pid: Pid) -> bool {
        self.running.contains(&pid)
    }

    /// Ready-queue snapshot (unordered; order lives in queue_seq).
    pub fn ready_queue(&self) -> &[Pid] {
        &self.ready
    }

    /// Move a process into Ready at the back of the FIFO (fresh queue_seq).
    ///
    /// Legal from Created (make_ready), Running (yield), Waiting (wake) and
    /// Blocked (release).
    pub fn enqueue(&mut self, table: &mut ProcessTable, pid: Pid) -> Result<(), KernelError> {
        table.transition(pid, ProcessState::Ready)?;
        self.running.remove(&pid);
        let seq = self.next_queue_seq;
        self.next_queue_seq += 1;
        if let Some(p) = table.get_mut(pid) {
            p.queue_seq = seq;
        }
        self.ready.push(pid);
        Ok(())
    }

    /// Park a Running process to Waiting (wait_for_message with an empty
    /// mailbox). Frees its core.
    pub fn park(&mut self, table: &mut ProcessTable, pid: Pid) -> Result<(), KernelError> {
        table.transition(pid, ProcessState::Waiting)?;
        self.running.remove(&pid);
        Ok(())
    }

    /// Terminate a process from whatever live state it is in, releasing any
    /// core or ready slot it held.
    pub fn complete(&mut self, table: &mut ProcessTable, pid: Pid) -> Result<(), KernelError> {
        table.transition(pid, ProcessState::Completed)?;
        self.running.remove(&pid);
        self.ready.retain(|&p| p != pid);
        Ok(())
    }

    /// Best Ready candidate: highest effective priority, ties by lowest
    /// queue_seq (FIFO).
    fn pick(&self, table: &ProcessTable) -> Option<Pid> {
        let mut best: Option<(u8, u64, Pid)> = None;
        for &pid in &self.ready {
            let proc = match table.get(pid) {
                Some(p) => p,
                None => continue,
            };
            let eff = effective_priority(proc.priority, proc.wait_time_ms);
            let candidate = (eff, proc.queue_seq, pid);
            best = Some(match best {
                None => candidate,
                Some(cur) => {
                    // Higher effective wins; on a tie the smaller seq wins.
                    if eff > cur.0 || (eff == cur.0 && proc.queue_seq < cur.1) {
                        candidate
                    } else {
                        cur
                    }
                }
            });
        }
        best.map(|(_, _, pid)| pid)
    }

    /// Fill free cores from the ready queue. Returns the Pids dispatched,
    /// in dispatch order. A no-op when nothing is Ready.
    pub fn dispatch(&mut self, table: &mut ProcessTable) -> Vec<Pid> {
        let mut dispatched = Vec::new();
        while self.running.len() < self.num_cores {
            let pid = match self.pick(table) {
                Some(p) => p,
                None => break,
            };
            self.ready.retain(|&p| p != pid);
            // Ready -> Running cannot fail for a pid held in the ready queue.
            if table.transition(pid, ProcessState::Running).is_err() {
                continue;
            }
            self.running.insert(pid);
            self.context_switches += 1;
            dispatched.push(pid);
        }
        dispatched
    }

    /// Preempt if some Ready process strictly beats a Running one.
    ///
    /// The victim is the running process with the lowest effective priority
    /// whose base is below System. It re-enters the ready queue with its
    /// original queue_seq preserved. Returns `(displaced, dispatched)` when
    /// a preemption occurred.
    pub fn preempt_if_needed(&mut self, table: &mut ProcessTable) -> Option<(Pid, Pid)> {
        let challenger = self.pick(table)?;
        let challenger_eff = {
            let p = table.get(challenger)?;
            effective_priority(p.priority, p.wait_time_ms)
        };

        let mut victim: Option<(u8, Pid)> = None;
        for &pid in &self.running {
            let proc = table.get(pid)?;
            if proc.priority >= Priority::System {
                continue;
            }
            let eff = effective_priority(proc.priority, proc.wait_time_ms);
            if challenger_eff > eff {
                victim = Some(match victim {
                    None => (eff, pid),
                    Some(cur) if eff < cur.0 => (eff, pid),
                    Some(cur) => cur,
                });
            }
        }
        let (_, victim_pid) = victim?;

        // Displace without reassigning queue_seq: the victim keeps its
        // original FIFO position, augmented later by its accumulated wait.
        if table.transition(victim_pid, ProcessState::Ready).is_err() {
            return None;
        }
        self.running.remove(&victim_pid);
        self.ready.push(victim_pid);

        let dispatched = self.dispatch(table);
        dispatched.first().map(|&d| (victim_pid, d))
    }

    /// Advance the logical clock by `elapsed_ms`: Ready and Waiting
    /// processes age, Running processes accrue cpu time.
    pub fn tick(&self, table: &mut ProcessTable, elapsed_ms: u64) {
        for (_, proc) in table.iter_mut() {
            match proc.state {
                ProcessState::Ready | ProcessState::Waiting => {
                    proc.wait_time_ms = proc.wait_time_ms.saturating_add(elapsed_ms);
                }
                ProcessState::Running => {
                    proc.cpu_time_ms = proc.cpu_time_ms.saturating_add(elapsed_ms);
                }
                _ => {}
            }
        }
    }
}

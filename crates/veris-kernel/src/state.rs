//! Composite kernel state
//!
//! [`KernelState`] aggregates the process table, scheduler, message bus,
//! capability manager, memory regions, and event log into the single value
//! the step function transforms. No I/O, no host dependencies - the state
//! is pure data plus transformation methods, which is what makes the kernel
//! deterministic and replayable.

use std::collections::BTreeMap;

use crate::capability::{CapabilityManager, ResourceType, Rights};
use crate::error::KernelError;
use crate::event::{EventKind, EventLog, MAX_LOG_EVENTS};
use crate::mailbox::MessageBus;
use crate::process::ProcessTable;
use crate::sched::Scheduler;
use crate::types::{
    Pid, Priority, ProcessState, Region, RegionId, SystemMetrics, DEFAULT_MEMORY_BUDGET,
    DEFAULT_NUM_CORES,
};

/// Boot-time configuration.
#[derive(Clone, Copy, Debug)]
pub struct KernelConfig {
    /// Execution slots available to the scheduler
    pub num_cores: usize,
    /// Per-process memory budget in bytes
    pub memory_budget: u64,
    /// Event log retention
    pub max_log_events: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            num_cores: DEFAULT_NUM_CORES,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            max_log_events: MAX_LOG_EVENTS,
        }
    }
}

/// The complete kernel state.
#[derive(Clone, Debug)]
pub struct KernelState {
    pub processes: ProcessTable,
    pub scheduler: Scheduler,
    pub bus: MessageBus,
    pub caps: CapabilityManager,
    pub regions: BTreeMap<RegionId, Region>,
    pub log: EventLog,
    pub config: KernelConfig,
    next_region_id: u64,
    booted_at: u64,
    shutdown: bool,
}

impl KernelState {
    pub fn new(config: KernelConfig, now: u64) -> Self {
        Self {
            processes: ProcessTable::new(),
            scheduler: Scheduler::new(config.num_cores),
            bus: MessageBus::new(),
            caps: CapabilityManager::new(),
            regions: BTreeMap::new(),
            log: EventLog::with_capacity(config.max_log_events),
            config,
            next_region_id: 1,
            booted_at: now,
            shutdown: false,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Mark the kernel as shut down. Subsequent syscalls are refused.
    pub fn shut_down(&mut self) {
        self.shutdown = true;
    }

    pub fn uptime_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.booted_at)
    }

    /// Spawn a process: descriptor, mailbox, and its initial capabilities.
    ///
    /// The child gets a full-rights root capability on its own channel; the
    /// parent gets a write+delegate capability so it can talk to the child
    /// and pass that authority on. The descriptor starts in `Created`.
    pub fn spawn(&mut self, name: &str, priority: Priority, parent: Pid, now: u64) -> Pid {
        let pid = self.processes.spawn(name, priority, parent, now);
        let capacity = priority.mailbox_capacity();
        self.bus.create_mailbox(pid, capacity);

        let own = self
            .caps
            .create(pid, ResourceType::Channel, pid.0, Rights::full(), now, 0, 0);
        self.log
            .emit(now, pid, EventKind::CapabilityCreated { cap_id: own });
        if parent != Pid::KERNEL {
            let to_parent = self.caps.create(
                parent,
                ResourceType::Channel,
                pid.0,
                Rights {
                    write: true,
                    delegate: true,
                    ..Default::default()
                },
                now,
                0,
                0,
            );
            self.log
                .emit(now, parent, EventKind::CapabilityCreated { cap_id: to_parent });
        }

        self.log.emit(
            now,
            pid,
            EventKind::ProcessSpawned {
                name: name.to_string(),
                priority,
                parent,
            },
        );
        pid
    }

    /// Fill free cores, recording each Ready -> Running transition in the
    /// event log.
    pub fn dispatch(&mut self, now: u64) -> Vec<Pid> {
        let dispatched = self.scheduler.dispatch(&mut self.processes);
        for &pid in &dispatched {
            self.log.emit(
                now,
                pid,
                EventKind::StateChanged {
                    from: ProcessState::Ready,
                    to: ProcessState::Running,
                },
            );
        }
        dispatched
    }

    /// Run the preemption check, recording both halves of a displacement:
    /// the victim's Running -> Ready and the challenger's Ready -> Running.
    pub fn preempt_if_needed(&mut self, now: u64) -> Option<(Pid, Pid)> {
        let (displaced, dispatched) = self.scheduler.preempt_if_needed(&mut self.processes)?;
        self.log.emit(
            now,
            displaced,
            EventKind::StateChanged {
                from: ProcessState::Running,
                to: ProcessState::Ready,
            },
        );
        self.log.emit(
            now,
            dispatched,
            EventKind::StateChanged {
                from: ProcessState::Ready,
                to: ProcessState::Running,
            },
        );
        Some((displaced, dispatched))
    }

    /// Terminate a process and release everything it held: core or ready
    /// slot, mailbox (pending messages are dropped), capabilities (revoked
    /// with cascade), and memory regions.
    pub fn complete(&mut self, pid: Pid, now: u64) -> Result<(), KernelError> {
        let from = self
            .processes
            .get(pid)
            .map(|p| p.state)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        self.scheduler.complete(&mut self.processes, pid)?;
        self.log.emit(
            now,
            pid,
            EventKind::StateChanged {
                from,
                to: ProcessState::Completed,
            },
        );

        let dropped = self.bus.remove_mailbox(pid);
        if dropped > 0 {
            self.log
                .emit(now, pid, EventKind::MessagesDropped { count: dropped });
        }
        let revoked = self.caps.revoke_held_by(pid);
        if revoked > 0 {
            log::debug!("revoked {revoked} capabilities held by exiting pid {}", pid.0);
        }
        let owned: Vec<RegionId> = self
            .regions
            .values()
            .filter(|r| r.owner == pid)
            .map(|r| r.id)
            .collect();
        for rid in owned {
            if let Some(region) = self.regions.remove(&rid) {
                self.log.emit(
                    now,
                    pid,
                    EventKind::MemoryFreed {
                        region_id: rid.0,
                        size: region.size,
                    },
                );
            }
        }
        if let Some(p) = self.processes.get_mut(pid) {
            p.metrics.allocated_bytes = 0;
        }
        Ok(())
    }

    /// Wake a Waiting process (message arrived). Normal scheduling applies -
    /// the woken process goes Ready, never straight to Running.
    pub fn wake_if_waiting(&mut self, pid: Pid, now: u64) -> Result<bool, KernelError> {
        let waiting = self
            .processes
            .get(pid)
            .map(|p| p.state == ProcessState::Waiting)
            .unwrap_or(false);
        if !waiting {
            return Ok(false);
        }
        self.scheduler.enqueue(&mut self.processes, pid)?;
        self.log.emit(
            now,
            pid,
            EventKind::StateChanged {
                from: ProcessState::Waiting,
                to: ProcessState::Ready,
            },
        );
        Ok(true)
    }

    /// Allocate a memory region against the caller's budget.
    pub fn alloc_region(&mut self, owner: Pid, size: u64, now: u64) -> Result<RegionId, KernelError> {
        let allocated = self
            .processes
            .get(owner)
            .map(|p| p.metrics.allocated_bytes)
            .ok_or(KernelError::ProcessNotFound(owner))?;
        let budget = self.config.memory_budget;
        let available = budget.saturating_sub(allocated);
        if size > available {
            return Err(KernelError::OutOfMemory {
                pid: owner,
                requested: size,
                available,
            });
        }
        let id = RegionId(self.next_region_id);
        self.next_region_id += 1;
        self.regions.insert(id, Region { id, owner, size });
        if let Some(p) = self.processes.get_mut(owner) {
            p.metrics.allocated_bytes += size;
        }
        self.log.emit(
            now,
            owner,
            EventKind::MemoryAllocated {
                region_id: id.0,
                size,
            },
        );
        Ok(id)
    }

    /// Free a region. Only the owner may free it.
    pub fn free_region(&mut self, caller: Pid, id: RegionId, now: u64) -> Result<u64, KernelError> {
        let region = self
            .regions
            .get(&id)
            .ok_or(KernelError::RegionNotFound(id.0))?;
        if region.owner != caller {
            return Err(KernelError::InvalidArgument(format!(
                "region {} is not owned by pid {}",
                id.0, caller.0
            )));
        }
        let size = region.size;
        self.regions.remove(&id);
        if let Some(p) = self.processes.get_mut(caller) {
            p.metrics.allocated_bytes = p.metrics.allocated_bytes.saturating_sub(size);
        }
        self.log.emit(
            now,
            caller,
            EventKind::MemoryFreed {
                region_id: id.0,
                size,
            },
        );
        Ok(size)
    }

    /// Record syscall accounting for the caller.
    pub fn update_syscall_metrics(&mut self, pid: Pid, now: u64) {
        if let Some(p) = self.processes.get_mut(pid) {
            p.metrics.syscall_count += 1;
            p.metrics.last_active_ms = now;
        }
    }

    /// System-wide metrics rollup.
    pub fn metrics(&self, now: u64) -> SystemMetrics {
        SystemMetrics {
            process_count: self.processes.live_count(),
            total_pending_messages: self.bus.total_pending(),
            context_switches: self.scheduler.context_switches(),
            total_messages: self.bus.total_messages(),
            uptime_ms: self.uptime_ms(now),
        }
    }
}

//! Kernel runtime wrapper
//!
//! [`Kernel`] owns the state and a logical clock, and exposes the explicit
//! `boot` / `tick` / `syscall` / `shutdown` lifecycle. It is the only place
//! that advances time; the step function itself stays pure.
//!
//! After every syscall the invariant suite runs over the resulting state.
//! A violation never panics across the syscall boundary - it is returned to
//! the caller as an IntegrityError result so the supervisor can isolate the
//! fault.

use crate::error::{KernelError, Trap};
use crate::invariants::check_all_invariants;
use crate::state::{KernelConfig, KernelState};
use crate::step::{report_trap, step, Syscall, SyscallOutcome, TrapDisposition};
use crate::types::{Pid, Priority, SystemMetrics};

/// The running kernel.
pub struct Kernel {
    state: KernelState,
    clock_ms: u64,
}

impl Kernel {
    /// Boot a kernel at logical time zero.
    pub fn boot(config: KernelConfig) -> Self {
        log::info!(
            "kernel boot: {} cores, {} byte budget per process",
            config.num_cores,
            config.memory_budget
        );
        Self {
            state: KernelState::new(config, 0),
            clock_ms: 0,
        }
    }

    /// Current logical time in milliseconds.
    pub fn now(&self) -> u64 {
        self.clock_ms
    }

    /// Read-only view of the state, for diagnostics and tests.
    pub fn state(&self) -> &KernelState {
        &self.state
    }

    /// Advance the logical clock: age Ready/Waiting processes, account cpu
    /// time, then let aging-driven preemption and dispatch take effect.
    pub fn tick(&mut self, elapsed_ms: u64) {
        self.clock_ms = self.clock_ms.saturating_add(elapsed_ms);
        self.state
            .scheduler
            .tick(&mut self.state.processes, elapsed_ms);
        self.state.preempt_if_needed(self.clock_ms);
        self.state.dispatch(self.clock_ms);
    }

    /// Execute one syscall at the current logical time.
    ///
    /// The invariant suite runs on the resulting state; a violation is
    /// surfaced as an IntegrityError result, never a panic.
    pub fn syscall(&mut self, from: Pid, syscall: Syscall) -> SyscallOutcome {
        let result = step(&mut self.state, from, syscall, self.clock_ms);
        let violations = check_all_invariants(&self.state);
        if !violations.is_empty() {
            for v in &violations {
                log::error!("invariant {} violated: {}", v.check, v.detail);
            }
            let summary = violations
                .iter()
                .map(|v| v.check)
                .collect::<Vec<_>>()
                .join(", ");
            return SyscallOutcome::Error {
                code: KernelError::InvariantViolation(summary.clone()).code(),
                message: format!("kernel invariant violated: {summary}"),
            };
        }
        result.outcome
    }

    /// Report a trap raised by a process.
    pub fn trap(&mut self, pid: Pid, trap: Trap) -> TrapDisposition {
        report_trap(&mut self.state, pid, trap, self.clock_ms)
    }

    /// Kernel-driven spawn convenience (ambient authority).
    pub fn spawn(&mut self, name: &str, priority: Priority) -> Result<Pid, KernelError> {
        match self.syscall(
            Pid::KERNEL,
            Syscall::Spawn {
                name: name.to_string(),
                priority,
            },
        ) {
            SyscallOutcome::Ok(pid) => Ok(Pid(pid)),
            SyscallOutcome::Error { message, .. } => Err(KernelError::InvalidArgument(message)),
            other => Err(KernelError::InvalidArgument(format!(
                "unexpected spawn outcome: {other:?}"
            ))),
        }
    }

    /// System-wide metrics at the current time.
    pub fn metrics(&self) -> SystemMetrics {
        self.state.metrics(self.clock_ms)
    }

    /// Terminate every live process and refuse further syscalls.
    pub fn shutdown(&mut self) {
        let live: Vec<Pid> = self
            .state
            .processes
            .iter()
            .filter(|(_, p)| p.state != crate::types::ProcessState::Completed)
            .map(|(&pid, _)| pid)
            .collect();
        for pid in live {
            if let Err(e) = self.state.complete(pid, self.clock_ms) {
                log::warn!("shutdown: failed to terminate pid {}: {e}", pid.0);
            }
        }
        self.state.shut_down();
        log::info!("kernel shutdown at t={}ms", self.clock_ms);
    }
}

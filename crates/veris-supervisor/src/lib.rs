//! Supervision and escalation for kernel processes
//!
//! An OTP-style supervision layer over the kernel core. The supervisor
//! tracks registered children, classifies their failures, and decides what
//! happens next: a local retry, a restart at some escalation level, or a
//! stop once restart limits are exhausted.
//!
//! The decision machine is deterministic: all timing is a logical
//! millisecond clock supplied by the caller, so the same failure history
//! always produces the same escalation trajectory.
//!
//! Escalation ladder:
//!
//! ```text
//! Level1 restart with preserved state
//! Level2 restart with clean state
//! Level3 reload the owning module
//! Level4 restart the supervisor
//! Level5 restart the whole system
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use veris_kernel::Trap;

/// Restart strategy for a supervised child.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartStrategy {
    /// Always restart on failure
    Permanent,
    /// Never restart
    Temporary,
    /// Restart only on abnormal termination
    Transient,
}

/// Recovery tier, from local restart to full system restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EscalationLevel {
    /// Restart with preserved state
    Level1RestartWithState = 1,
    /// Restart with clean state
    Level2RestartClean = 2,
    /// Reload the owning module
    Level3ReloadModule = 3,
    /// Restart the supervisor
    Level4RestartSupervisor = 4,
    /// Restart the whole system
    Level5SystemRestart = 5,
}

impl EscalationLevel {
    /// The next tier up. Level5 saturates.
    pub fn next(self) -> Self {
        match self {
            Self::Level1RestartWithState => Self::Level2RestartClean,
            Self::Level2RestartClean => Self::Level3ReloadModule,
            Self::Level3ReloadModule => Self::Level4RestartSupervisor,
            Self::Level4RestartSupervisor => Self::Level5SystemRestart,
            Self::Level5SystemRestart => Self::Level5SystemRestart,
        }
    }
}

/// Configuration for one supervised child.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Unique child name
    pub name: String,
    /// Restart strategy
    pub restart: RestartStrategy,
    /// Maximum restarts within the intensity window before escalating
    pub max_restarts: u32,
    /// Intensity window in milliseconds
    pub restart_window_ms: u64,
    /// Base delay before a restart
    pub base_restart_delay_ms: u64,
    /// Delay ceiling after backoff
    pub max_restart_delay_ms: u64,
    /// Local retries allowed for recoverable traps before they count as
    /// crashes
    pub max_trap_retries: u32,
}

impl Default for ChildSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            restart: RestartStrategy::Permanent,
            max_restarts: 5,
            restart_window_ms: 60_000,
            base_restart_delay_ms: 1000,
            max_restart_delay_ms: 30_000,
            max_trap_retries: 3,
        }
    }
}

/// Lifecycle state of a supervised child.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildState {
    Starting,
    Running,
    Crashed { error: String },
    Restarting { attempt: u32 },
    Stopped { reason: String },
    Terminated,
}

/// Bookkeeping for one child.
#[derive(Clone, Debug)]
pub struct ChildInfo {
    pub spec: ChildSpec,
    pub state: ChildState,
    /// Restarts within the current intensity window
    pub restart_count: u32,
    /// Window start, logical ms
    pub window_start: Option<u64>,
    /// Last crash, logical ms
    pub last_crash: Option<u64>,
    pub escalation_level: EscalationLevel,
    /// Recoverable-trap retries since the last successful start
    pub trap_retries: u32,
    pub total_crashes: u64,
}

impl ChildInfo {
    fn new(spec: ChildSpec) -> Self {
        Self {
            spec,
            state: ChildState::Starting,
            restart_count: 0,
            window_start: None,
            last_crash: None,
            escalation_level: EscalationLevel::Level1RestartWithState,
            trap_retries: 0,
            total_crashes: 0,
        }
    }

    /// Exponential backoff, doubling per attempt, clamped to the
    /// configured ceiling.
    fn restart_delay_ms(&self) -> u64 {
        let shift = self.restart_count.min(16);
        let delay = self.spec.base_restart_delay_ms.saturating_mul(1u64 << shift);
        delay.min(self.spec.max_restart_delay_ms)
    }

    fn reset_window_if_expired(&mut self, now: u64) {
        if let Some(start) = self.window_start {
            if now.saturating_sub(start) > self.spec.restart_window_ms {
                self.restart_count = 0;
                self.window_start = Some(now);
                self.escalation_level = EscalationLevel::Level1RestartWithState;
            }
        }
    }
}

/// What the runtime should do with a failed child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Recoverable trap within the retry budget: retry in place
    Retry,
    /// Restart the child after `delay_ms` at the given tier
    Restart {
        delay_ms: u64,
        escalation: EscalationLevel,
    },
    /// Restart limits exhausted: the failure moves up the tree
    Escalate(EscalationLevel),
    /// Strategy says not to restart
    Stop,
}

/// Supervisor errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("child {0} is already registered")]
    AlreadyRegistered(String),

    #[error("child {0} is not registered")]
    NotFound(String),
}

/// The supervisor: a deterministic escalation state machine over a set of
/// named children.
#[derive(Debug, Default)]
pub struct Supervisor {
    children: BTreeMap<String, ChildInfo>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a child. Fails if the name is taken.
    pub fn register(&mut self, spec: ChildSpec) -> Result<(), SupervisorError> {
        let name = spec.name.clone();
        if self.children.contains_key(&name) {
            return Err(SupervisorError::AlreadyRegistered(name));
        }
        log::info!("supervisor: registered child {name}");
        self.children.insert(name, ChildInfo::new(spec));
        Ok(())
    }

    /// Remove a child entirely.
    pub fn unregister(&mut self, name: &str) -> Result<ChildInfo, SupervisorError> {
        self.children
            .remove(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub fn child(&self, name: &str) -> Option<&ChildInfo> {
        self.children.get(name)
    }

    pub fn children(&self) -> impl Iterator<Item = (&String, &ChildInfo)> {
        self.children.iter()
    }

    /// Mark a child as successfully started. Clears the trap-retry budget.
    pub fn child_started(&mut self, name: &str) -> Result<(), SupervisorError> {
        let child = self
            .children
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        child.state = ChildState::Running;
        child.trap_retries = 0;
        Ok(())
    }

    /// Mark a child as having exited normally. Transient and Temporary
    /// children stay down; Permanent children are restarted.
    pub fn child_exited(&mut self, name: &str, now: u64) -> Result<SupervisorAction, SupervisorError> {
        let strategy = self
            .children
            .get(name)
            .map(|c| c.spec.restart)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        match strategy {
            RestartStrategy::Permanent => self.child_crashed(name, "normal exit", now),
            RestartStrategy::Transient | RestartStrategy::Temporary => {
                if let Some(child) = self.children.get_mut(name) {
                    child.state = ChildState::Terminated;
                }
                Ok(SupervisorAction::Stop)
            }
        }
    }

    /// Handle a trap raised by a child.
    ///
    /// Recoverable traps are retried in place until the retry budget is
    /// spent, then treated as crashes. Fatal traps are crashes immediately.
    pub fn child_trapped(
        &mut self,
        name: &str,
        trap: Trap,
        now: u64,
    ) -> Result<SupervisorAction, SupervisorError> {
        let child = self
            .children
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        if trap.is_recoverable() && child.trap_retries < child.spec.max_trap_retries {
            child.trap_retries += 1;
            log::debug!(
                "supervisor: child {name} trap {trap:?}, retry {}/{}",
                child.trap_retries,
                child.spec.max_trap_retries
            );
            return Ok(SupervisorAction::Retry);
        }
        self.child_crashed(name, &format!("trap: {trap:?}"), now)
    }

    /// Record a crash and decide the recovery action.
    pub fn child_crashed(
        &mut self,
        name: &str,
        error: &str,
        now: u64,
    ) -> Result<SupervisorAction, SupervisorError> {
        let child = self
            .children
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        child.total_crashes += 1;
        child.last_crash = Some(now);

        if child.spec.restart == RestartStrategy::Temporary {
            child.state = ChildState::Stopped {
                reason: format!("temporary child failed: {error}"),
            };
            return Ok(SupervisorAction::Stop);
        }

        child.reset_window_if_expired(now);
        if child.window_start.is_none() {
            child.window_start = Some(now);
        }
        child.restart_count += 1;

        if child.restart_count > child.spec.max_restarts {
            child.escalation_level = child.escalation_level.next();
            if child.escalation_level >= EscalationLevel::Level4RestartSupervisor {
                let level = child.escalation_level;
                child.state = ChildState::Stopped {
                    reason: format!("restart limit exceeded, escalated to {level:?}"),
                };
                log::error!("supervisor: child {name} exceeded restart limit, escalating to {level:?}");
                return Ok(SupervisorAction::Escalate(level));
            }
            // Higher tier gets a fresh intensity budget.
            child.restart_count = 1;
            child.window_start = Some(now);
        }

        let delay_ms = child.restart_delay_ms();
        let escalation = child.escalation_level;
        child.state = ChildState::Restarting {
            attempt: child.restart_count,
        };
        log::warn!(
            "supervisor: child {name} crashed ({error}), restarting in {delay_ms}ms \
             (attempt {}, {escalation:?})",
            child.restart_count
        );
        Ok(SupervisorAction::Restart {
            delay_ms,
            escalation,
        })
    }

    /// Gracefully terminate every child.
    pub fn shutdown(&mut self) {
        for (name, child) in self.children.iter_mut() {
            if !matches!(child.state, ChildState::Stopped { .. }) {
                child.state = ChildState::Terminated;
                log::info!("supervisor: terminated child {name}");
            }
        }
    }
}

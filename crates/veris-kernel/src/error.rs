//! Kernel error taxonomy
//!
//! Every failure the kernel can report is classified into one of five
//! categories, each with a reserved numeric code range. Errors are never
//! silently dropped: syscall callers always get a typed result, and anything
//! in the Integrity or System categories is routed to the supervisor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Pid, ProcessState};

/// Error category, each owning a numeric code range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// 1000-1999: bad caller input, locally correctable - return to caller
    User,
    /// 2000-2999: retryable rule violation
    Logic,
    /// 3000-3999: exhaustion or contention - needs supervisor attention
    Resource,
    /// 4000-4999: corruption or invariant violation - isolate the process
    Integrity,
    /// 5000-5999: requires full restart
    System,
}

impl ErrorCategory {
    /// Inclusive code range owned by this category.
    pub fn range(self) -> (u32, u32) {
        match self {
            ErrorCategory::User => (1000, 1999),
            ErrorCategory::Logic => (2000, 2999),
            ErrorCategory::Resource => (3000, 3999),
            ErrorCategory::Integrity => (4000, 4999),
            ErrorCategory::System => (5000, 5999),
        }
    }

    /// Category that owns a numeric code, if any.
    pub fn of_code(code: u32) -> Option<Self> {
        match code {
            1000..=1999 => Some(ErrorCategory::User),
            2000..=2999 => Some(ErrorCategory::Logic),
            3000..=3999 => Some(ErrorCategory::Resource),
            4000..=4999 => Some(ErrorCategory::Integrity),
            5000..=5999 => Some(ErrorCategory::System),
            _ => None,
        }
    }
}

/// Kernel errors surfaced through the syscall boundary.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum KernelError {
    #[error("process {0:?} not found")]
    ProcessNotFound(Pid),

    #[error("send target {0:?} not found or completed")]
    SendTargetNotFound(Pid),

    #[error("payload of {size} bytes exceeds limit of {limit}")]
    SendPayloadTooLarge { size: usize, limit: usize },

    #[error("source {0:?} lacks write capability on target channel")]
    SendPermissionDenied(Pid),

    #[error("mailbox of {target:?} is full ({capacity} messages)")]
    SendMailboxFull { target: Pid, capacity: usize },

    #[error("capability check failed: {0}")]
    Capability(#[from] CapabilityError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("region {0} not found")]
    RegionNotFound(u64),

    #[error("invalid lifecycle transition for {pid:?}: {from:?} -> {to:?}")]
    InvalidTransition {
        pid: Pid,
        from: ProcessState,
        to: ProcessState,
    },

    #[error("operation requires {0:?} to be Running, but it is {1:?}")]
    NotRunning(Pid, ProcessState),

    #[error("memory budget exhausted for {pid:?}: requested {requested}, available {available}")]
    OutOfMemory {
        pid: Pid,
        requested: u64,
        available: u64,
    },

    #[error("kernel invariant violated: {0}")]
    InvariantViolation(String),

    #[error("kernel is shut down")]
    Shutdown,
}

impl KernelError {
    /// Numeric error code. Codes live in the range owned by their category.
    pub fn code(&self) -> u32 {
        match self {
            KernelError::ProcessNotFound(_) => 1001,
            KernelError::SendTargetNotFound(_) => 1002,
            KernelError::SendPayloadTooLarge { .. } => 1003,
            KernelError::SendPermissionDenied(_) => 1004,
            KernelError::Capability(e) => e.code(),
            KernelError::InvalidArgument(_) => 1020,
            KernelError::RegionNotFound(_) => 1021,
            KernelError::InvalidTransition { .. } => 2001,
            KernelError::NotRunning(..) => 2002,
            KernelError::SendMailboxFull { .. } => 3001,
            KernelError::OutOfMemory { .. } => 3002,
            KernelError::InvariantViolation(_) => 4001,
            KernelError::Shutdown => 5001,
        }
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self.code() {
            1000..=1999 => ErrorCategory::User,
            2000..=2999 => ErrorCategory::Logic,
            3000..=3999 => ErrorCategory::Resource,
            4000..=4999 => ErrorCategory::Integrity,
            _ => ErrorCategory::System,
        }
    }
}

/// Capability subsystem errors. These are user errors: the caller presented a
/// token that does not carry the authority it claims.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CapabilityError {
    #[error("capability {0} not found")]
    NotFound(u64),

    #[error("capability has been revoked")]
    Revoked,

    #[error("capability has expired")]
    Expired,

    #[error("capability usage limit exceeded")]
    UsageLimitExceeded,

    #[error("insufficient rights: requested rights exceed those granted")]
    InsufficientRights,

    #[error("capability does not carry the delegate right")]
    DelegationNotAllowed,
}

impl CapabilityError {
    /// Numeric code (User range).
    pub fn code(&self) -> u32 {
        match self {
            CapabilityError::NotFound(_) => 1010,
            CapabilityError::Revoked => 1011,
            CapabilityError::Expired => 1012,
            CapabilityError::UsageLimitExceeded => 1013,
            CapabilityError::InsufficientRights => 1014,
            CapabilityError::DelegationNotAllowed => 1015,
        }
    }
}

/// Execution traps raised by a running process.
///
/// Only `Timeout` and `OutOfMemory` are locally recoverable (retry); all
/// others are fatal to the offending process and must escalate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trap {
    Timeout,
    OutOfMemory,
    Unreachable,
    IntegerDivByZero,
    IntegerOverflow,
    OutOfBounds,
    IndirectCallType,
    StackOverflow,
}

impl Trap {
    /// Whether this trap may be retried locally before escalating.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Trap::Timeout | Trap::OutOfMemory)
    }
}

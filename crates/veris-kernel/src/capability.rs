//! Capability-based access control
//!
//! Capabilities are unforgeable, immutable tokens of authority over a
//! resource. Delegation constructs a *new* capability whose rights are a
//! checked subset of the parent's (monotonic attenuation - rights only
//! shrink along a delegation chain, never grow). Revocation is irreversible
//! and cascades to every delegated descendant.
//!
//! # Security Properties
//!
//! 1. **No Forged Token**: only ids issued by the manager validate
//! 2. **No Rights Escalation**: checks never grant more than stored rights
//! 3. **Fail Closed**: missing, expired, exhausted, or revoked tokens error

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::types::Pid;

/// Rights carried by a capability. Each right is independent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    /// Holder may delegate attenuated copies of this capability.
    pub delegate: bool,
}

impl Rights {
    pub fn full() -> Self {
        Self {
            read: true,
            write: true,
            execute: true,
            delegate: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            ..Default::default()
        }
    }

    /// Whether every right in `self` is also in `other`.
    pub fn is_subset_of(&self, other: &Rights) -> bool {
        (!self.read || other.read)
            && (!self.write || other.write)
            && (!self.execute || other.execute)
            && (!self.delegate || other.delegate)
    }

    /// Whether this set satisfies all `required` rights.
    pub fn satisfies(&self, required: &Rights) -> bool {
        required.is_subset_of(self)
    }
}

/// Kind of resource a capability scopes authority over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// A process's message channel (resource id = target Pid)
    Channel,
    /// A memory region (resource id = RegionId)
    Memory,
    /// A process itself (lifecycle control)
    Process,
    /// A loadable module
    Module,
}

/// An issued capability token. Immutable once created except for the
/// revocation flag and the usage counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capability {
    /// Unique token id
    pub id: u64,
    /// Process holding this token
    pub holder: Pid,
    /// Resource kind
    pub resource_type: ResourceType,
    /// Resource instance (interpretation depends on `resource_type`)
    pub resource_id: u64,
    /// Granted rights
    pub rights: Rights,
    /// Token this was delegated from (None for roots)
    pub parent: Option<u64>,
    /// Expiration timestamp in logical ms (0 = never expires)
    pub expires_at: u64,
    /// Maximum validations allowed (0 = unlimited)
    pub max_uses: u64,
    /// Validations consumed so far
    pub use_count: u64,
    /// Set once by revocation; never cleared
    pub revoked: bool,
}

impl Capability {
    /// Whether the token has expired at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && now > self.expires_at
    }

    /// Whether the usage budget is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.max_uses != 0 && self.use_count >= self.max_uses
    }
}

/// The capability manager - issues, validates, delegates, and revokes tokens.
#[derive(Clone, Debug, Default)]
pub struct CapabilityManager {
    caps: BTreeMap<u64, Capability>,
    next_id: u64,
}

impl CapabilityManager {
    pub fn new() -> Self {
        Self {
            caps: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Issue a root capability. `ttl_ms` of 0 means no expiry; `max_uses` of
    /// 0 means unlimited.
    pub fn create(
        &mut self,
        holder: Pid,
        resource_type: ResourceType,
        resource_id: u64,
        rights: Rights,
        now: u64,
        ttl_ms: u64,
        max_uses: u64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.caps.insert(
            id,
            Capability {
                id,
                holder,
                resource_type,
                resource_id,
                rights,
                parent: None,
                expires_at: if ttl_ms == 0 { 0 } else { now + ttl_ms },
                max_uses,
                use_count: 0,
                revoked: false,
            },
        );
        id
    }

    /// Look up a token without validating it.
    pub fn get(&self, id: u64) -> Option<&Capability> {
        self.caps.get(&id)
    }

    /// Validate a token: it must exist, be unrevoked, unexpired, and have
    /// usage budget left. Read-only; does not consume a use.
    pub fn validate(&self, id: u64, now: u64) -> Result<&Capability, CapabilityError> {
        let cap = self.caps.get(&id).ok_or(CapabilityError::NotFound(id))?;
        if cap.revoked {
            return Err(CapabilityError::Revoked);
        }
        if cap.is_expired(now) {
            return Err(CapabilityError::Expired);
        }
        if cap.is_exhausted() {
            return Err(CapabilityError::UsageLimitExceeded);
        }
        Ok(cap)
    }

    /// Validate and consume one use of a token, checking required rights.
    ///
    /// This is the gate every authorized operation passes through before
    /// executing. Fail closed: any error leaves the token untouched.
    pub fn exercise(
        &mut self,
        id: u64,
        required: &Rights,
        now: u64,
    ) -> Result<(), CapabilityError> {
        let cap = self.validate(id, now)?;
        if !cap.rights.satisfies(required) {
            return Err(CapabilityError::InsufficientRights);
        }
        if let Some(cap) = self.caps.get_mut(&id) {
            cap.use_count += 1;
        }
        Ok(())
    }

    /// Find a valid token held by `holder` granting `required` rights on the
    /// given resource, and consume one use of it.
    pub fn exercise_for_resource(
        &mut self,
        holder: Pid,
        resource_type: ResourceType,
        resource_id: u64,
        required: &Rights,
        now: u64,
    ) -> Result<u64, CapabilityError> {
        let found = self.caps.values().find(|c| {
            c.holder == holder
                && c.resource_type == resource_type
                && c.resource_id == resource_id
                && !c.revoked
                && !c.is_expired(now)
                && !c.is_exhausted()
                && c.rights.satisfies(required)
        });
        let id = match found {
            Some(c) => c.id,
            None => return Err(CapabilityError::InsufficientRights),
        };
        if let Some(cap) = self.caps.get_mut(&id) {
            cap.use_count += 1;
        }
        Ok(id)
    }

    /// Delegate an attenuated copy of `parent_id` to `new_holder`.
    ///
    /// The parent must be valid, carry the delegate right, and the requested
    /// rights must be a subset of the parent's. The child's expiry never
    /// outlives the parent's.
    pub fn delegate(
        &mut self,
        parent_id: u64,
        new_holder: Pid,
        rights: Rights,
        now: u64,
        ttl_ms: u64,
    ) -> Result<u64, CapabilityError> {
        let parent = self.validate(parent_id, now)?;
        if !parent.rights.delegate {
            return Err(CapabilityError::DelegationNotAllowed);
        }
        if !rights.is_subset_of(&parent.rights) {
            return Err(CapabilityError::InsufficientRights);
        }
        let parent_expires = parent.expires_at;
        let resource_type = parent.resource_type;
        let resource_id = parent.resource_id;

        let requested = if ttl_ms == 0 { 0 } else { now + ttl_ms };
        let expires_at = match (parent_expires, requested) {
            (0, r) => r,
            (p, 0) => p,
            (p, r) => p.min(r),
        };

        let id = self.next_id;
        self.next_id += 1;
        self.caps.insert(
            id,
            Capability {
                id,
                holder: new_holder,
                resource_type,
                resource_id,
                rights,
                parent: Some(parent_id),
                expires_at,
                max_uses: 0,
                use_count: 0,
                revoked: false,
            },
        );
        Ok(id)
    }

    /// Revoke a token and every capability delegated from it, transitively.
    ///
    /// Returns the number of tokens revoked (including `id` itself).
    /// Revoking an already-revoked token is a no-op for it but still sweeps
    /// descendants. Irreversible.
    pub fn revoke(&mut self, id: u64) -> Result<usize, CapabilityError> {
        if !self.caps.contains_key(&id) {
            return Err(CapabilityError::NotFound(id));
        }
        let mut doomed: BTreeSet<u64> = BTreeSet::new();
        doomed.insert(id);
        // Parent links only point upward, so sweep to a fixpoint.
        loop {
            let before = doomed.len();
            for cap in self.caps.values() {
                if let Some(p) = cap.parent {
                    if doomed.contains(&p) {
                        doomed.insert(cap.id);
                    }
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        let mut count = 0;
        for cid in &doomed {
            if let Some(cap) = self.caps.get_mut(cid) {
                if !cap.revoked {
                    cap.revoked = true;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Revoke every token held by `holder`. Used at process completion so
    /// authority does not outlive its owner. Descendants are swept too.
    pub fn revoke_held_by(&mut self, holder: Pid) -> usize {
        let held: Vec<u64> = self
            .caps
            .values()
            .filter(|c| c.holder == holder && !c.revoked)
            .map(|c| c.id)
            .collect();
        let mut total = 0;
        for id in held {
            if let Ok(n) = self.revoke(id) {
                total += n;
            }
        }
        total
    }

    /// Number of tokens ever issued and still tracked.
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Iterate all tokens. Used by invariant checks.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Capability)> {
        self.caps.iter()
    }
}

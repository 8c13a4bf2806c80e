//! Authorization guard
//!
//! Maps each mutating operation to the roles allowed to invoke it. The
//! table and the MSP → role bindings are immutable values built once at
//! start-up; checking is a pure function of (operation, caller).
//!
//! `recordTransfer` is open to every known organization here. Whether the
//! caller actually owns the batch depends on ledger state and is checked by
//! the batch manager after the batch is loaded.

use crate::types::{Caller, MspId, Role};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Mutating operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Register a new batch
    CreateBatch,
    /// Certify a batch
    VerifyBatch,
    /// Move custody of (part of) a batch
    RecordTransfer,
    /// Reserve batch quantity for a buyer
    CreateOrder,
    /// Lock an escrow payment for an order
    LockPayment,
    /// Release a locked payment
    ReleasePayment,
    /// Recall / flag a batch
    InvalidateBatch,
}

impl Operation {
    /// All operations
    pub const ALL: [Operation; 7] = [
        Operation::CreateBatch,
        Operation::VerifyBatch,
        Operation::RecordTransfer,
        Operation::CreateOrder,
        Operation::LockPayment,
        Operation::ReleasePayment,
        Operation::InvalidateBatch,
    ];

    /// Contract function name
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateBatch => "createBatch",
            Operation::VerifyBatch => "verifyBatch",
            Operation::RecordTransfer => "recordTransfer",
            Operation::CreateOrder => "createOrder",
            Operation::LockPayment => "lockPayment",
            Operation::ReleasePayment => "releasePayment",
            Operation::InvalidateBatch => "invalidateBatch",
        }
    }

    fn default_roles(&self) -> &'static [Role] {
        match self {
            Operation::CreateBatch => &[Role::Farmer, Role::Platform],
            Operation::VerifyBatch => &[Role::Inspector],
            Operation::RecordTransfer => &Role::ALL,
            Operation::CreateOrder => &[Role::Platform, Role::Middleman],
            Operation::LockPayment => &[Role::Platform],
            Operation::ReleasePayment => &[Role::Platform],
            Operation::InvalidateBatch => &[Role::Farmer, Role::Inspector, Role::Platform],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operation → allowed roles
///
/// Deserializing overlays the given entries on the default table, so a
/// config file only has to name the operations it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<Operation, BTreeSet<Role>>",
    into = "BTreeMap<Operation, BTreeSet<Role>>"
)]
pub struct AccessPolicy {
    table: BTreeMap<Operation, BTreeSet<Role>>,
}

impl AccessPolicy {
    /// True when `role` may invoke `operation`
    pub fn allows(&self, operation: Operation, role: Role) -> bool {
        self.table
            .get(&operation)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    /// Roles allowed for `operation`
    pub fn roles_for(&self, operation: Operation) -> impl Iterator<Item = Role> + '_ {
        self.table.get(&operation).into_iter().flatten().copied()
    }

    /// Certificates are issued by inspectors only, whatever the overrides say
    pub fn validate(&self) -> Result<()> {
        let verifiers: BTreeSet<Role> = self.roles_for(Operation::VerifyBatch).collect();
        if verifiers != BTreeSet::from([Role::Inspector]) {
            return Err(Error::Config(format!(
                "access.verify_batch must be [\"inspector\"], got {:?}",
                verifiers
            )));
        }
        Ok(())
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        let table = Operation::ALL
            .into_iter()
            .map(|op| (op, op.default_roles().iter().copied().collect()))
            .collect();
        Self { table }
    }
}

impl From<BTreeMap<Operation, BTreeSet<Role>>> for AccessPolicy {
    fn from(overrides: BTreeMap<Operation, BTreeSet<Role>>) -> Self {
        let mut policy = AccessPolicy::default();
        policy.table.extend(overrides);
        policy
    }
}

impl From<AccessPolicy> for BTreeMap<Operation, BTreeSet<Role>> {
    fn from(policy: AccessPolicy) -> Self {
        policy.table
    }
}

/// One MSP id bound to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgBinding {
    /// Organization MSP id
    pub msp_id: MspId,
    /// Role the organization plays
    pub role: Role,
}

/// The closed set of known organizations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgRegistry {
    bindings: Vec<OrgBinding>,
}

impl OrgRegistry {
    /// Registry from explicit bindings
    pub fn new(bindings: Vec<OrgBinding>) -> Self {
        Self { bindings }
    }

    /// Role of an organization, `None` if unknown
    pub fn role_of(&self, msp_id: &MspId) -> Option<Role> {
        self.bindings
            .iter()
            .find(|binding| &binding.msp_id == msp_id)
            .map(|binding| binding.role)
    }

    /// True when `msp_id` is a participant of the network
    pub fn is_known(&self, msp_id: &MspId) -> bool {
        self.role_of(msp_id).is_some()
    }

    /// Reject duplicate MSP ids
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for binding in &self.bindings {
            if !seen.insert(&binding.msp_id) {
                return Err(Error::Config(format!(
                    "Organization {} bound twice",
                    binding.msp_id
                )));
            }
        }
        Ok(())
    }
}

impl Default for OrgRegistry {
    fn default() -> Self {
        let bind = |msp: &str, role| OrgBinding {
            msp_id: MspId::new(msp),
            role,
        };
        Self::new(vec![
            bind("Org1MSP", Role::Platform),
            bind("Org2MSP", Role::Farmer),
            bind("Org3MSP", Role::Middleman),
            bind("Org4MSP", Role::Inspector),
        ])
    }
}

/// Access check run before any state is read
#[derive(Debug, Clone, Default)]
pub struct AuthorizationGuard {
    policy: AccessPolicy,
    registry: OrgRegistry,
}

impl AuthorizationGuard {
    /// Create guard
    pub fn new(policy: AccessPolicy, registry: OrgRegistry) -> Self {
        Self { policy, registry }
    }

    /// Resolve the caller's role and check it against `operation`
    pub fn authorize(&self, operation: Operation, caller: &Caller) -> Result<Role> {
        let role = self.registry.role_of(&caller.msp_id).ok_or_else(|| {
            Error::Unauthorized(format!(
                "Organization {} is not a member of the network",
                caller.msp_id
            ))
        })?;

        if !self.policy.allows(operation, role) {
            let allowed: Vec<String> = self
                .policy
                .roles_for(operation)
                .map(|r| r.to_string())
                .collect();
            return Err(Error::Unauthorized(format!(
                "{} ({}) may not {}; allowed: {}",
                caller.msp_id,
                role,
                operation,
                allowed.join(", ")
            )));
        }

        Ok(role)
    }

    /// Organization registry
    pub fn registry(&self) -> &OrgRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> AuthorizationGuard {
        AuthorizationGuard::default()
    }

    #[test]
    fn test_default_table() {
        let g = guard();
        let farmer = Caller::new("Org2MSP");
        let platform = Caller::new("Org1MSP");
        let middleman = Caller::new("Org3MSP");
        let inspector = Caller::new("Org4MSP");

        assert!(g.authorize(Operation::CreateBatch, &farmer).is_ok());
        assert!(g.authorize(Operation::CreateBatch, &platform).is_ok());
        assert!(g.authorize(Operation::CreateBatch, &inspector).is_err());

        assert!(g.authorize(Operation::VerifyBatch, &inspector).is_ok());
        assert!(g.authorize(Operation::VerifyBatch, &farmer).is_err());

        assert!(g.authorize(Operation::CreateOrder, &middleman).is_ok());
        assert!(g.authorize(Operation::CreateOrder, &farmer).is_err());

        assert!(g.authorize(Operation::LockPayment, &platform).is_ok());
        assert!(g.authorize(Operation::ReleasePayment, &middleman).is_err());

        assert!(g.authorize(Operation::InvalidateBatch, &inspector).is_ok());
        assert!(g.authorize(Operation::InvalidateBatch, &middleman).is_err());

        for caller in [&farmer, &platform, &middleman, &inspector] {
            assert!(g.authorize(Operation::RecordTransfer, caller).is_ok());
        }
    }

    #[test]
    fn test_unknown_org_is_unauthorized() {
        let err = guard()
            .authorize(Operation::RecordTransfer, &Caller::new("Org9MSP"))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn test_verifier_override_must_remain_inspector() {
        assert!(AccessPolicy::default().validate().is_ok());

        let mut overrides = BTreeMap::new();
        overrides.insert(Operation::VerifyBatch, BTreeSet::from([Role::Farmer]));
        let policy = AccessPolicy::from(overrides);
        assert!(policy.allows(Operation::VerifyBatch, Role::Farmer));
        assert!(matches!(policy.validate(), Err(Error::Config(_))));

        // Other operations stay configurable
        let mut overrides = BTreeMap::new();
        overrides.insert(Operation::CreateOrder, BTreeSet::from([Role::Middleman]));
        assert!(AccessPolicy::from(overrides).validate().is_ok());
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let registry = OrgRegistry::new(vec![
            OrgBinding {
                msp_id: MspId::new("Org1MSP"),
                role: Role::Platform,
            },
            OrgBinding {
                msp_id: MspId::new("Org1MSP"),
                role: Role::Farmer,
            },
        ]);
        assert!(registry.validate().is_err());
    }
}

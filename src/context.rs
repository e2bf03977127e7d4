//! Tenant Context
//!
//! Context carried into every engine operation.
//! Tenant scoping is mandatory: there is no way to call the catalog,
//! the assignment index, the composer or the analyzer without one.

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};

fn tenant_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").expect("static tenant pattern"))
}

/// Tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Parse a tenant identifier, rejecting empty or malformed values
    pub fn parse(raw: impl Into<String>) -> EngineResult<Self> {
        let raw = raw.into();
        if !tenant_pattern().is_match(&raw) {
            return Err(EngineError::InvalidTenant(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-call context: tenant, acting principal, correlation id and deadline
#[derive(Debug, Clone)]
pub struct TenantContext {
    /// Tenant every read and write is scoped to
    pub tenant_id: TenantId,

    /// Authenticated actor recorded on created entities and evolution records
    pub actor: String,

    /// Request ID for log correlation
    pub request_id: Uuid,

    /// Caller-supplied deadline, propagated to external lookups
    deadline: Option<Instant>,
}

impl TenantContext {
    /// Create a context for the given tenant and actor
    pub fn new(tenant: impl Into<String>, actor: impl Into<String>) -> EngineResult<Self> {
        Ok(Self {
            tenant_id: TenantId::parse(tenant)?,
            actor: actor.into(),
            request_id: Uuid::new_v4(),
            deadline: None,
        })
    }

    /// Attach an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with `DeadlineExceeded` once the deadline has passed.
    ///
    /// Called before every external lookup; the engine never retries.
    pub fn check_deadline(&self, stage: &'static str) -> EngineResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(EngineError::DeadlineExceeded(stage))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_validation() {
        assert!(TenantId::parse("acme").is_ok());
        assert!(TenantId::parse("acme-eu.prod_1").is_ok());
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("-leading").is_err());
        assert!(TenantId::parse("has space").is_err());
    }

    #[test]
    fn test_context_without_deadline_never_expires() {
        let ctx = TenantContext::new("acme", "alice").unwrap();
        assert!(ctx.check_deadline("lookup").is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = TenantContext::new("acme", "alice")
            .unwrap()
            .with_deadline(Instant::now() - Duration::from_millis(1));
        let err = ctx.check_deadline("instance count").unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded("instance count")));
    }
}

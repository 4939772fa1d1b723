use serde::{Deserialize, Serialize};

use crate::types::Principal;

/// Per-request context carrying identity, tenancy, and tracing information.
/// Threaded through every pipeline stage for auth, audit, and multi-tenant isolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Identifier assigned to this request by the inbound adapter.
    pub request_id: String,
    /// Tenant scope for multi-tenant isolation. `None` for single-tenant deployments.
    pub tenant_id: Option<String>,
    /// Authenticated principal, if the request is authenticated.
    pub principal: Option<Principal>,
    /// Distributed trace identifier for observability.
    pub trace_id: String,
}

impl RequestContext {
    /// Creates an anonymous, single-tenant context with fresh request and trace ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: None,
            principal: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_contexts_get_distinct_ids() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.request_id, b.request_id);
        assert_ne!(a.request_id, a.trace_id);
        assert!(a.tenant_id.is_none());
    }

    #[test]
    fn builders_fill_tenant_and_principal() {
        let ctx = RequestContext::new()
            .with_tenant("acme")
            .with_principal(Principal {
                id: "u1".to_string(),
                roles: vec!["admin".to_string()],
            });
        assert_eq!(ctx.tenant_id.as_deref(), Some("acme"));
        assert_eq!(ctx.principal.unwrap().roles, vec!["admin"]);
    }
}

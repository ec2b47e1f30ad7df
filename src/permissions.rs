//! Authorization checks run after authentication. The first failing
//! permission rejects the request with 403.

use crate::request::{ApiRequest, OperationContext};

pub trait Permission: Send + Sync {
    fn has_permission(&self, req: &ApiRequest, op: &OperationContext) -> bool;
}

/// Refuses everything; the behavior of a permission that decides nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

impl Permission for DenyAll {
    fn has_permission(&self, _req: &ApiRequest, _op: &OperationContext) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAny;

impl Permission for AllowAny {
    fn has_permission(&self, _req: &ApiRequest, _op: &OperationContext) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IsAuthenticated;

impl Permission for IsAuthenticated {
    fn has_permission(&self, _req: &ApiRequest, op: &OperationContext) -> bool {
        op.principal.is_some()
    }
}

/// Permission from a closure.
pub struct PermissionFn<F>(pub F);

impl<F> Permission for PermissionFn<F>
where
    F: Fn(&ApiRequest, &OperationContext) -> bool + Send + Sync,
{
    fn has_permission(&self, req: &ApiRequest, op: &OperationContext) -> bool {
        (self.0)(req, op)
    }
}

pub fn permission_fn<F>(f: F) -> PermissionFn<F>
where
    F: Fn(&ApiRequest, &OperationContext) -> bool + Send + Sync,
{
    PermissionFn(f)
}

/// Index of the first permission that refuses, if any.
pub fn first_denied(permissions: &[std::sync::Arc<dyn Permission>], req: &ApiRequest, op: &OperationContext) -> Option<usize> {
    permissions.iter().position(|p| !p.has_permission(req, op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::Principal;
    use crate::viewsets::Action;
    use axum::http::Method;
    use std::sync::Arc;

    #[test]
    fn builtins() {
        let req = ApiRequest::new(Method::GET);
        let mut op = OperationContext::new(Action::List);
        assert!(!DenyAll.has_permission(&req, &op));
        assert!(AllowAny.has_permission(&req, &op));
        assert!(!IsAuthenticated.has_permission(&req, &op));
        op.principal = Some(Principal::new("u1"));
        assert!(IsAuthenticated.has_permission(&req, &op));
    }

    #[test]
    fn first_failure_is_reported() {
        let req = ApiRequest::new(Method::DELETE);
        let op = OperationContext::new(Action::Destroy);
        let no_deletes = permission_fn(|_, op: &OperationContext| op.action != Action::Destroy);
        let perms: Vec<Arc<dyn Permission>> = vec![Arc::new(AllowAny), Arc::new(no_deletes), Arc::new(DenyAll)];
        assert_eq!(first_denied(&perms, &req, &op), Some(1));
    }
}

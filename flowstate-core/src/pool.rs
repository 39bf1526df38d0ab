//! Opaque nested-workflow capability.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Capability for delegating to nested workflows.
///
/// The engine creates one per root workflow (unless the caller supplies one)
/// and passes the same pool to every reactor invocation. Its bookkeeping
/// lives outside this crate; here it only carries a stable identity.
#[derive(Clone)]
pub struct WorkflowPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: Uuid,
}

impl WorkflowPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner { id: Uuid::new_v4() }),
        }
    }

    /// Returns the pool's identity.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns true if both handles refer to the same pool.
    pub fn ptr_eq(&self, other: &WorkflowPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for WorkflowPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkflowPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowPool")
            .field("id", &self.inner.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let pool = WorkflowPool::new();
        let same = pool.clone();
        let other = WorkflowPool::default();

        assert!(pool.ptr_eq(&same));
        assert_eq!(pool.id(), same.id());
        assert!(!pool.ptr_eq(&other));
        assert_ne!(pool.id(), other.id());
    }
}

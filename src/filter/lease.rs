//! In-flight validation leases: at most one validation per belief id.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::belief::BeliefId;
use crate::error::{ExecutionError, GroundResult};

#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    held: Mutex<HashSet<BeliefId>>,
}

impl LeaseTable {
    /// Claims `id`, failing fast if another validation holds it.
    pub(crate) fn acquire(&self, id: BeliefId) -> GroundResult<Lease<'_>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(id) {
            return Err(ExecutionError::ValidationInProgress { id }.into());
        }
        Ok(Lease { table: self, id })
    }

    pub(crate) fn is_held(&self, id: BeliefId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Released on drop, including when a validation unwinds.
#[derive(Debug)]
pub(crate) struct Lease<'a> {
    table: &'a LeaseTable,
    id: BeliefId,
}

impl Lease<'_> {
    pub(crate) const fn id(&self) -> BeliefId {
        self.id
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GroundError;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let table = LeaseTable::default();
        let id = BeliefId::new();

        let lease = table.acquire(id).unwrap();
        assert_eq!(lease.id(), id);
        assert!(table.is_held(id));
        assert!(matches!(
            table.acquire(id),
            Err(GroundError::Execution(ExecutionError::ValidationInProgress { .. }))
        ));

        drop(lease);
        assert!(!table.is_held(id));
        assert!(table.acquire(id).is_ok());
    }

    #[test]
    fn test_independent_ids_do_not_block() {
        let table = LeaseTable::default();
        let a = table.acquire(BeliefId::new()).unwrap();
        let b = table.acquire(BeliefId::new()).unwrap();
        assert_eq!(table.len(), 2);
        drop((a, b));
        assert_eq!(table.len(), 0);
    }
}

use dashmap::DashSet;
use std::sync::Arc;

// ────────────────────────────────────────────────────────────────
// ProcessingGuard - Prevents duplicate processing of the same file
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<DashSet<String>>);

pub struct ProcessingGuard {
    set: Arc<DashSet<String>>,
    name: String,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.set.remove(&self.name);
    }
}

impl InFlight {
    pub fn try_acquire(&self, name: impl Into<String>) -> Option<ProcessingGuard> {
        let name = name.into();
        if self.0.insert(name.clone()) {
            Some(ProcessingGuard {
                set: Arc::clone(&self.0),
                name,
            })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let in_flight = InFlight::default();
        let guard = in_flight.try_acquire("photo1.jpg").unwrap();
        assert!(in_flight.try_acquire("photo1.jpg").is_none());
        assert_eq!(in_flight.len(), 1);

        drop(guard);
        assert!(in_flight.is_empty());
        assert!(in_flight.try_acquire("photo1.jpg").is_some());
    }
}

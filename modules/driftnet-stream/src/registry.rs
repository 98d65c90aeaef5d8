use std::collections::HashMap;

use uuid::Uuid;

use driftnet_common::FilterTerm;

/// What an activation did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// The search was not active before.
    Activated,
    /// The search was already active; its terms were replaced in place.
    Updated,
}

/// Authoritative map of which searches are streaming and with what terms.
///
/// Plain data with no interior locking: all mutations happen under the
/// controller's reconcile lock, so the multiplexer never observes a
/// half-applied change.
#[derive(Debug, Default)]
pub struct SearchStreamRegistry {
    active: HashMap<Uuid, Vec<FilterTerm>>,
    /// Activation order; drives deterministic packing and FIFO admission of
    /// deferred searches.
    order: Vec<Uuid>,
}

impl SearchStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a search, or replace a live search's terms (used when its
    /// query is edited while streaming).
    pub fn activate(&mut self, search_id: Uuid, terms: Vec<FilterTerm>) -> RegistryChange {
        match self.active.insert(search_id, terms) {
            Some(_) => RegistryChange::Updated,
            None => {
                self.order.push(search_id);
                RegistryChange::Activated
            }
        }
    }

    /// Returns whether the search was active. Deactivating an inactive
    /// search is a no-op, not an error.
    pub fn deactivate(&mut self, search_id: Uuid) -> bool {
        if self.active.remove(&search_id).is_some() {
            self.order.retain(|id| *id != search_id);
            true
        } else {
            false
        }
    }

    pub fn current_filter(&self, search_id: Uuid) -> Option<&[FilterTerm]> {
        self.active.get(&search_id).map(|t| t.as_slice())
    }

    pub fn is_active(&self, search_id: Uuid) -> bool {
        self.active.contains_key(&search_id)
    }

    /// Active searches in activation order.
    pub fn list_active(&self) -> impl Iterator<Item = (Uuid, &[FilterTerm])> {
        self.order
            .iter()
            .filter_map(|id| self.active.get(id).map(|t| (*id, t.as_slice())))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(values: &[&str]) -> Vec<FilterTerm> {
        values.iter().copied().map(FilterTerm::keyword).collect()
    }

    #[test]
    fn last_write_wins_per_search() {
        let mut registry = SearchStreamRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(registry.activate(a, terms(&["obama"])), RegistryChange::Activated);
        assert_eq!(registry.activate(b, terms(&["rust"])), RegistryChange::Activated);
        assert_eq!(
            registry.activate(a, terms(&["obama", "biden"])),
            RegistryChange::Updated
        );
        registry.deactivate(b);

        let active: Vec<_> = registry.list_active().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, a);
        assert_eq!(active[0].1.len(), 2);
    }

    #[test]
    fn deactivate_inactive_is_noop() {
        let mut registry = SearchStreamRegistry::new();
        assert!(!registry.deactivate(Uuid::new_v4()));
        assert!(registry.is_empty());
    }

    #[test]
    fn activation_order_survives_updates() {
        let mut registry = SearchStreamRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.activate(a, terms(&["one"]));
        registry.activate(b, terms(&["two"]));
        registry.activate(a, terms(&["one", "three"]));

        let order: Vec<_> = registry.list_active().map(|(id, _)| id).collect();
        assert_eq!(order, vec![a, b], "update must not reorder");
    }
}

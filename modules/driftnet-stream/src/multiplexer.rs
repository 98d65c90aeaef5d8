use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{info, warn};
use uuid::Uuid;

use driftnet_common::FilterTerm;

use crate::registry::SearchStreamRegistry;
use crate::settings::StreamSettings;

/// Identifier for one physical upstream connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One search's contribution to a connection's combined predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub search_id: Uuid,
    pub terms: Vec<FilterTerm>,
}

/// Union of a filter set's terms, deduplicated, in member order. This is
/// what gets submitted upstream.
pub fn combined_terms(filters: &[SearchFilter]) -> Vec<FilterTerm> {
    let mut seen = HashSet::new();
    let mut combined = Vec::new();
    for filter in filters {
        for term in &filter.terms {
            if seen.insert(term.clone()) {
                combined.push(term.clone());
            }
        }
    }
    combined
}

/// Physical operations needed to make connections match the active set.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionOp {
    Open {
        connection_id: ConnectionId,
        filters: Vec<SearchFilter>,
    },
    /// Resubmit the predicate on a live connection. Preferred over a
    /// close/open cycle: no coverage gap beyond the re-filter latency, and
    /// no connection churn against upstream rate limits.
    Refilter {
        connection_id: ConnectionId,
        filters: Vec<SearchFilter>,
    },
    Close {
        connection_id: ConnectionId,
    },
}

/// Packs active searches onto a capped number of upstream connections.
///
/// Recomputed incrementally on every registry change: existing placements
/// are kept wherever they still fit, so an unrelated activation never moves
/// a search between connections.
#[derive(Debug)]
pub struct StreamMultiplexer {
    max_terms_per_connection: usize,
    max_connections: usize,
    next_id: u64,
    /// Member searches per open connection, in placement order.
    assignments: BTreeMap<ConnectionId, Vec<Uuid>>,
    /// Filters as of the last reconcile, for computing minimal diffs.
    last_filters: HashMap<ConnectionId, Vec<SearchFilter>>,
    /// Active searches awaiting a free slot, in admission order.
    deferred: Vec<Uuid>,
}

impl StreamMultiplexer {
    pub fn new(max_terms_per_connection: usize, max_connections: usize) -> Self {
        Self {
            max_terms_per_connection,
            max_connections,
            next_id: 0,
            assignments: BTreeMap::new(),
            last_filters: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self::new(settings.max_terms_per_connection, settings.max_connections)
    }

    /// Recompute assignments against the registry's active set and return
    /// the minimal operations to apply.
    pub fn reconcile(&mut self, registry: &SearchStreamRegistry) -> Vec<ConnectionOp> {
        // Drop searches that left the active set.
        for members in self.assignments.values_mut() {
            members.retain(|id| registry.is_active(*id));
        }

        // A live edit can grow a search past its connection's remaining
        // room; evict newest members until the connection fits again.
        for members in self.assignments.values_mut() {
            while !members.is_empty()
                && Self::term_count(registry, members) > self.max_terms_per_connection
            {
                members.pop();
            }
        }

        let mut ops = Vec::new();

        // Emptied connections close and free their slot before placement.
        let empty: Vec<ConnectionId> = self
            .assignments
            .iter()
            .filter(|(_, members)| members.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for connection_id in empty {
            self.assignments.remove(&connection_id);
            if self.last_filters.remove(&connection_id).is_some() {
                ops.push(ConnectionOp::Close { connection_id });
            }
        }

        // Place unassigned actives in activation order: first fit into an
        // open connection, else a fresh slot, else park as deferred.
        let placed: HashSet<Uuid> = self.assignments.values().flatten().copied().collect();
        self.deferred.clear();
        for (search_id, terms) in registry.list_active() {
            if placed.contains(&search_id) {
                continue;
            }
            self.place(registry, search_id, terms.len());
        }

        // Diff each surviving assignment's filters against the last
        // reconcile to emit only real changes.
        for (connection_id, members) in &self.assignments {
            let filters: Vec<SearchFilter> = members
                .iter()
                .filter_map(|id| {
                    registry.current_filter(*id).map(|terms| SearchFilter {
                        search_id: *id,
                        terms: terms.to_vec(),
                    })
                })
                .collect();

            match self.last_filters.get(connection_id) {
                None => ops.push(ConnectionOp::Open {
                    connection_id: *connection_id,
                    filters: filters.clone(),
                }),
                Some(previous) if *previous != filters => ops.push(ConnectionOp::Refilter {
                    connection_id: *connection_id,
                    filters: filters.clone(),
                }),
                Some(_) => {}
            }
            self.last_filters.insert(*connection_id, filters);
        }

        ops
    }

    fn place(&mut self, registry: &SearchStreamRegistry, search_id: Uuid, term_count: usize) {
        if term_count > self.max_terms_per_connection {
            warn!(
                search_id = %search_id,
                term_count,
                cap = self.max_terms_per_connection,
                "Search exceeds the per-connection term cap on its own; deferred until edited"
            );
            self.deferred.push(search_id);
            return;
        }

        for (connection_id, members) in self.assignments.iter_mut() {
            if Self::term_count(registry, members) + term_count <= self.max_terms_per_connection {
                members.push(search_id);
                info!(search_id = %search_id, connection = %connection_id, "Search packed onto open connection");
                return;
            }
        }

        if self.assignments.len() < self.max_connections {
            let connection_id = ConnectionId::new(self.next_id);
            self.next_id += 1;
            self.assignments.insert(connection_id, vec![search_id]);
            info!(search_id = %search_id, connection = %connection_id, "Search assigned to new connection");
            return;
        }

        info!(
            search_id = %search_id,
            "No connection capacity; activation deferred until a slot frees"
        );
        self.deferred.push(search_id);
    }

    fn term_count(registry: &SearchStreamRegistry, members: &[Uuid]) -> usize {
        members
            .iter()
            .map(|id| registry.current_filter(*id).map_or(0, |t| t.len()))
            .sum()
    }

    /// Whether the search is parked awaiting capacity (as of the last
    /// reconcile).
    pub fn is_deferred(&self, search_id: Uuid) -> bool {
        self.deferred.contains(&search_id)
    }

    pub fn deferred(&self) -> &[Uuid] {
        &self.deferred
    }

    pub fn connection_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn assignment_of(&self, search_id: Uuid) -> Option<ConnectionId> {
        self.assignments
            .iter()
            .find(|(_, members)| members.contains(&search_id))
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(values: &[&str]) -> Vec<FilterTerm> {
        values.iter().copied().map(FilterTerm::keyword).collect()
    }

    fn opened_terms(ops: &[ConnectionOp]) -> Vec<FilterTerm> {
        ops.iter()
            .filter_map(|op| match op {
                ConnectionOp::Open { filters, .. } | ConnectionOp::Refilter { filters, .. } => {
                    Some(combined_terms(filters))
                }
                ConnectionOp::Close { .. } => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn single_search_opens_one_connection() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(400, 2);
        let a = Uuid::new_v4();
        registry.activate(a, terms(&["obama"]));

        let ops = mux.reconcile(&registry);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], ConnectionOp::Open { filters, .. } if filters.len() == 1));
        assert_eq!(mux.connection_count(), 1);
    }

    #[test]
    fn second_search_packs_onto_open_connection() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(400, 2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.activate(a, terms(&["obama"]));
        let first = mux.reconcile(&registry);
        let conn_a = mux.assignment_of(a).unwrap();

        registry.activate(b, terms(&["rust"]));
        let second = mux.reconcile(&registry);

        assert_eq!(first.len(), 1);
        assert_eq!(mux.connection_count(), 1, "should re-filter, not open a second connection");
        assert_eq!(mux.assignment_of(b), Some(conn_a));
        assert!(matches!(&second[0], ConnectionOp::Refilter { filters, .. } if filters.len() == 2));
    }

    #[test]
    fn overflow_spills_to_second_connection_with_union_preserved() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(3, 4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        registry.activate(a, terms(&["one", "two"]));
        registry.activate(b, terms(&["three"]));
        registry.activate(c, terms(&["four", "five"]));
        let ops = mux.reconcile(&registry);

        assert!(mux.connection_count() >= 2);
        // Every connection individually within the cap.
        for (_, members) in mux.assignments.iter() {
            assert!(StreamMultiplexer::term_count(&registry, members) <= 3);
        }
        // Union of all opened filters equals the union of all active terms.
        let opened: HashSet<_> = opened_terms(&ops).into_iter().collect();
        let expected: HashSet<_> = terms(&["one", "two", "three", "four", "five"])
            .into_iter()
            .collect();
        assert_eq!(opened, expected);
    }

    #[test]
    fn deactivation_refilters_in_place_and_closes_when_empty() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(400, 2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.activate(a, terms(&["obama"]));
        registry.activate(b, terms(&["rust"]));
        mux.reconcile(&registry);
        let conn = mux.assignment_of(a).unwrap();

        registry.deactivate(b);
        let ops = mux.reconcile(&registry);
        assert_eq!(ops.len(), 1);
        assert!(
            matches!(&ops[0], ConnectionOp::Refilter { connection_id, filters }
                if *connection_id == conn && filters.len() == 1),
            "losing one member re-filters the surviving connection in place"
        );

        registry.deactivate(a);
        let ops = mux.reconcile(&registry);
        assert_eq!(ops, vec![ConnectionOp::Close { connection_id: conn }]);
        assert_eq!(mux.connection_count(), 0);
    }

    #[test]
    fn live_edit_refilters_same_connection() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(400, 2);
        let a = Uuid::new_v4();

        registry.activate(a, terms(&["obama"]));
        mux.reconcile(&registry);
        let conn = mux.assignment_of(a).unwrap();

        registry.activate(a, terms(&["obama", "biden"]));
        let ops = mux.reconcile(&registry);

        assert_eq!(mux.assignment_of(a), Some(conn));
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], ConnectionOp::Refilter { connection_id, filters }
            if *connection_id == conn && filters[0].terms.len() == 2));
    }

    #[test]
    fn activation_beyond_capacity_defers_then_admits_fifo() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(2, 1);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.activate(a, terms(&["one", "two"]));
        mux.reconcile(&registry);

        registry.activate(b, terms(&["three"]));
        let ops = mux.reconcile(&registry);
        assert!(ops.is_empty(), "deferred activation changes nothing physically");
        assert!(mux.is_deferred(b));

        registry.deactivate(a);
        let ops = mux.reconcile(&registry);
        assert!(!mux.is_deferred(b));
        assert!(mux.assignment_of(b).is_some());
        // The emptied connection closes and the parked search opens a fresh one.
        assert!(ops.iter().any(|op| matches!(op, ConnectionOp::Close { .. })));
        assert!(ops.iter().any(|op| matches!(op, ConnectionOp::Open { filters, .. }
            if filters[0].search_id == b)));
    }

    #[test]
    fn oversized_search_is_deferred_not_split() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(2, 2);
        let a = Uuid::new_v4();

        registry.activate(a, terms(&["one", "two", "three"]));
        let ops = mux.reconcile(&registry);
        assert!(ops.is_empty());
        assert!(mux.is_deferred(a));
        assert_eq!(mux.connection_count(), 0);
    }

    #[test]
    fn reconcile_without_changes_is_quiet() {
        let mut registry = SearchStreamRegistry::new();
        let mut mux = StreamMultiplexer::new(400, 2);
        registry.activate(Uuid::new_v4(), terms(&["obama"]));

        mux.reconcile(&registry);
        let ops = mux.reconcile(&registry);
        assert!(ops.is_empty());
    }

    #[test]
    fn combined_terms_deduplicates_across_members() {
        let a = SearchFilter {
            search_id: Uuid::new_v4(),
            terms: terms(&["obama", "shared"]),
        };
        let b = SearchFilter {
            search_id: Uuid::new_v4(),
            terms: terms(&["shared", "biden"]),
        };
        let combined = combined_terms(&[a, b]);
        assert_eq!(combined, terms(&["obama", "shared", "biden"]));
    }
}

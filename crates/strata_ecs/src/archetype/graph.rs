use strata_utils::hash::HashMap;

use super::ArchetypeId;
use crate::component::ComponentId;

/// Caches single-component archetype transitions so repeated `AddComponent`/`RemoveComponent`
/// calls on the same (archetype, component) pair skip recomputing the destination mask and
/// looking it up (or creating it) in the archetype table.
///
/// Mirrors the add/remove double-map structure of the original graph: each edge kind is a map
/// from source archetype to a map from component id to destination archetype.
#[derive(Default)]
pub struct ArchetypeGraph {
    add_edges: HashMap<ArchetypeId, HashMap<ComponentId, ArchetypeId>>,
    remove_edges: HashMap<ArchetypeId, HashMap<ComponentId, ArchetypeId>>,
}

impl ArchetypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_add_edge(&mut self, from: ArchetypeId, component: ComponentId, to: ArchetypeId) {
        self.add_edges.entry(from).or_default().insert(component, to);
    }

    pub fn get_add_edge(&self, from: ArchetypeId, component: ComponentId) -> Option<ArchetypeId> {
        self.add_edges.get(&from)?.get(&component).copied()
    }

    pub fn set_remove_edge(&mut self, from: ArchetypeId, component: ComponentId, to: ArchetypeId) {
        self.remove_edges
            .entry(from)
            .or_default()
            .insert(component, to);
    }

    pub fn get_remove_edge(&self, from: ArchetypeId, component: ComponentId) -> Option<ArchetypeId> {
        self.remove_edges.get(&from)?.get(&component).copied()
    }

    /// Drops every edge touching `archetype`, as either endpoint. Used when an archetype's
    /// identity is being recycled (not currently exercised — archetypes are never removed once
    /// created — but kept for symmetry with the source graph's maintenance API).
    pub fn remove_edges_touching(&mut self, archetype: ArchetypeId) {
        self.add_edges.remove(&archetype);
        self.remove_edges.remove(&archetype);
        for edges in self.add_edges.values_mut() {
            edges.retain(|_, &mut dst| dst != archetype);
        }
        for edges in self.remove_edges.values_mut() {
            edges.retain(|_, &mut dst| dst != archetype);
        }
    }

    pub fn edge_count(&self) -> usize {
        self.add_edges.values().map(|m| m.len()).sum::<usize>()
            + self.remove_edges.values().map(|m| m.len()).sum::<usize>()
    }

    pub fn clear(&mut self) {
        self.add_edges.clear();
        self.remove_edges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_edges_round_trip() {
        let mut graph = ArchetypeGraph::new();
        let a = ArchetypeId(0);
        let b = ArchetypeId(1);
        graph.set_add_edge(a, 5, b);
        graph.set_remove_edge(b, 5, a);
        assert_eq!(graph.get_add_edge(a, 5), Some(b));
        assert_eq!(graph.get_remove_edge(b, 5), Some(a));
        assert_eq!(graph.get_add_edge(a, 6), None);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn removing_edges_touching_an_archetype_clears_both_directions() {
        let mut graph = ArchetypeGraph::new();
        let a = ArchetypeId(0);
        let b = ArchetypeId(1);
        graph.set_add_edge(a, 1, b);
        graph.set_remove_edge(b, 1, a);
        graph.remove_edges_touching(b);
        assert_eq!(graph.get_add_edge(a, 1), None);
        assert_eq!(graph.get_remove_edge(b, 1), None);
    }
}

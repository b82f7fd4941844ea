use serde::Serialize;
use std::collections::HashMap;

use crate::*;

/// All transitions between one ordered pair of states, merged for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: StateId,
    pub to: StateId,
    pub symbols: Vec<String>,
}

impl Edge {
    pub fn key(&self) -> String {
        edge_key(self.from, self.to)
    }

    pub fn label(&self) -> String {
        self.symbols.join(EDGE_SYMBOL_SEPARATOR)
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

pub fn edge_key(from: StateId, to: StateId) -> String {
    format!("{from}-{to}")
}

/// Collapses parallel transitions into one edge per `(from, to)` pair.
///
/// Edges come out in the order their pair was first seen and symbols keep
/// their encounter order. Repeated symbols are kept as the service sent them.
pub fn aggregate_edges(states: &[State]) -> Vec<Edge> {
    let mut index: HashMap<(StateId, StateId), usize> = HashMap::new();
    let mut edges: Vec<Edge> = Vec::new();

    for state in states {
        for transition in &state.transitions {
            let pair = (state.id, transition.to);
            let slot = *index.entry(pair).or_insert_with(|| {
                edges.push(Edge {
                    from: state.id,
                    to: transition.to,
                    symbols: Vec::new(),
                });
                edges.len() - 1
            });
            edges[slot].symbols.push(transition.symbol.clone());
        }
    }

    edges
}

//! Typed payloads exchanged with the grammar-analysis service.
//!
//! Everything the service computes (item sets, closures, tables, parse
//! traces) arrives here already finished; these types only describe its shape
//! so that a response which does not match is rejected at the boundary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

pub type StateId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub id: StateId,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// An LR(1) item as rendered by the service. Older service builds send bare
/// strings, newer ones send the structured form with a pre-formatted `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Item {
    Text(String),
    Detailed(ItemDetail),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDetail {
    #[serde(default)]
    pub lhs: String,
    #[serde(default)]
    pub rhs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dot: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookahead: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Item {
    pub fn display_text(&self) -> String {
        match self {
            Item::Text(text) => text.clone(),
            Item::Detailed(detail) => match &detail.text {
                Some(text) => text.clone(),
                None => format!(
                    "{} -> {}, {}",
                    detail.lhs,
                    detail.rhs.join(" "),
                    detail.lookahead.as_deref().unwrap_or("")
                ),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub symbol: String,
    pub to: StateId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureRow {
    pub id: StateId,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub kernel: Vec<Item>,
    #[serde(default)]
    pub closure: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TableAction {
    Shift {
        to: StateId,
    },
    Reduce {
        lhs: String,
        #[serde(default)]
        rhs: Vec<String>,
        #[serde(default)]
        text: String,
    },
    Accept,
    Error,
}

impl TableAction {
    /// Compact cell text used by the ACTION table.
    pub fn short_label(&self) -> String {
        match self {
            TableAction::Shift { to } => format!("s{to}"),
            TableAction::Reduce { lhs, .. } => format!("r{lhs}"),
            TableAction::Accept => "acc".to_string(),
            TableAction::Error => "err".to_string(),
        }
    }
}

/// ACTION and GOTO tables keyed by the state id as the service spells it
/// (a decimal string).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseTables {
    #[serde(default)]
    pub action: BTreeMap<String, BTreeMap<String, TableAction>>,
    #[serde(default)]
    pub goto: BTreeMap<String, BTreeMap<String, StateId>>,
    #[serde(default)]
    pub terminals: Vec<String>,
    #[serde(default)]
    pub nonterminals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResponse {
    pub initial: String,
    #[serde(default)]
    pub terminals: Vec<String>,
    #[serde(default)]
    pub nonterminals: Vec<String>,
    #[serde(default)]
    pub closure_table: Vec<ClosureRow>,
    #[serde(default)]
    pub states: Vec<State>,
    #[serde(default)]
    pub tables: ParseTables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Production {
    pub lhs: String,
    #[serde(default)]
    pub rhs: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Shift {
        to: StateId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
    Reduce {
        production: Production,
    },
    Goto {
        to: StateId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on: Option<String>,
    },
    Accept,
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<StateId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lookahead: Option<String>,
    },
}

impl Action {
    pub fn describe(&self) -> String {
        match self {
            Action::Shift { to, .. } => format!("shift {to}"),
            Action::Reduce { production } => format!("reduce {}", production.text),
            Action::Goto { to, .. } => format!("goto {to}"),
            Action::Accept => "accept".to_string(),
            Action::Error { .. } => "error".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    pub stack_states: Vec<StateId>,
    #[serde(default)]
    pub stack_symbols: Vec<String>,
    pub input: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub label: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResponse {
    pub accepted: bool,
    #[serde(default)]
    pub trace: Vec<TraceStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<TreeNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_ascii: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("state {0} appears more than once")]
    DuplicateState(StateId),
    #[error("trace step {step} has an empty state stack")]
    EmptyStack { step: usize },
}

impl BuildResponse {
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::with_capacity(self.states.len());
        for state in &self.states {
            if !seen.insert(state.id) {
                return Err(ModelError::DuplicateState(state.id));
            }
        }
        Ok(())
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.iter().find(|state| state.id == id)
    }
}

impl ParseResponse {
    pub fn validate(&self) -> Result<(), ModelError> {
        for (idx, step) in self.trace.iter().enumerate() {
            if step.stack_states.is_empty() {
                return Err(ModelError::EmptyStack { step: idx + 1 });
            }
        }
        Ok(())
    }
}

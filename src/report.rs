//! Plain-text views of a build or parse response for the terminal.

use std::fmt::Write as FmtWrite;

use crate::*;

const EMPTY_CELL: &str = "-";
const EMPTY_STACK: &str = "(empty)";

pub const ACCEPTED_VERDICT: &str = "✓ Input accepted";
pub const REJECTED_VERDICT: &str = "✗ Input rejected";

/// Column-aligned table with a dashed rule under the header.
struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (idx, cell) in row.iter().enumerate() {
                let len = cell.chars().count();
                match widths.get_mut(idx) {
                    Some(width) => *width = (*width).max(len),
                    None => widths.push(len),
                }
            }
        }

        let mut out = String::new();
        out.push_str(&format_row(&self.headers, &widths));
        let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
        out.push_str(&rule.join("-+-"));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&format_row(row, &widths));
        }
        out
    }
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = widths
        .iter()
        .enumerate()
        .map(|(idx, width)| {
            let cell = cells.get(idx).map(String::as_str).unwrap_or("");
            let pad = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(pad))
        })
        .collect();
    let mut line = padded.join(" | ").trim_end().to_string();
    line.push('\n');
    line
}

pub fn grammar_info(build: &BuildResponse) -> String {
    format!(
        "Initial symbol: {}\nTerminals: {}\nNon-terminals: {}\n",
        build.initial,
        build.terminals.join(" "),
        build.nonterminals.join(" ")
    )
}

pub fn states_report(states: &[State]) -> String {
    let mut out = String::new();
    for state in states {
        let _ = writeln!(out, "State {}", state.id);
        for item in &state.items {
            let _ = writeln!(out, "  {}", item.display_text());
        }
        if !state.transitions.is_empty() {
            let transitions: Vec<String> = state
                .transitions
                .iter()
                .map(|t| format!("{} → {}", t.symbol, t.to))
                .collect();
            let _ = writeln!(out, "  Transitions: {}", transitions.join(", "));
        }
        out.push('\n');
    }
    out
}

pub fn closure_report(rows: &[ClosureRow]) -> String {
    let mut out = String::new();
    for row in rows {
        let _ = writeln!(out, "State {}", row.id);
        if !row.transitions.is_empty() {
            let gotos: Vec<String> = row
                .transitions
                .iter()
                .map(|t| format!("goto({}, {})", row.id, t.symbol))
                .collect();
            let _ = writeln!(out, "  Goto: {}", gotos.join(", "));
        }
        out.push_str("  Kernel:\n");
        for item in &row.kernel {
            let _ = writeln!(out, "    {}", item.display_text());
        }
        out.push_str("  Closure:\n");
        for item in &row.closure {
            let _ = writeln!(out, "    {}", item.display_text());
        }
        out.push('\n');
    }
    out
}

pub fn action_table(tables: &ParseTables) -> String {
    let mut table = TextTable::new(
        std::iter::once("State".to_string()).chain(tables.terminals.iter().cloned()),
    );
    for state in sorted_state_keys(tables.action.keys()) {
        let actions = &tables.action[state];
        let mut row = vec![state.to_string()];
        row.extend(tables.terminals.iter().map(|terminal| {
            actions
                .get(terminal)
                .map(TableAction::short_label)
                .unwrap_or_else(|| EMPTY_CELL.to_string())
        }));
        table.push(row);
    }
    table.render()
}

pub fn goto_table(tables: &ParseTables) -> String {
    let mut table = TextTable::new(
        std::iter::once("State".to_string()).chain(tables.nonterminals.iter().cloned()),
    );
    for state in sorted_state_keys(tables.goto.keys()) {
        let gotos = &tables.goto[state];
        let mut row = vec![state.to_string()];
        row.extend(tables.nonterminals.iter().map(|nonterminal| {
            gotos
                .get(nonterminal)
                .map(|to| to.to_string())
                .unwrap_or_else(|| EMPTY_CELL.to_string())
        }));
        table.push(row);
    }
    table.render()
}

pub fn trace_table(trace: &[TraceStep]) -> String {
    let mut table = TextTable::new(["Step", "Stack", "Symbols", "Input", "Action"]);
    for (idx, step) in trace.iter().enumerate() {
        let states: Vec<String> = step.stack_states.iter().map(u32::to_string).collect();
        let symbols = if step.stack_symbols.is_empty() {
            EMPTY_STACK.to_string()
        } else {
            step.stack_symbols.join(", ")
        };
        table.push(vec![
            (idx + 1).to_string(),
            states.join(", "),
            symbols,
            step.input.clone(),
            step.action.describe(),
        ]);
    }
    table.render()
}

/// Draws `node` and its descendants with box-drawing connectors, root first.
pub fn render_tree(node: &TreeNode) -> String {
    let mut lines = vec![node.label.clone()];
    let count = node.children.len();
    for (idx, child) in node.children.iter().enumerate() {
        push_subtree(child, "", idx + 1 == count, &mut lines);
    }
    lines.join("\n")
}

fn push_subtree(node: &TreeNode, prefix: &str, is_last: bool, lines: &mut Vec<String>) {
    let connector = if is_last { "└── " } else { "├── " };
    lines.push(format!("{prefix}{connector}{}", node.label));

    let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
    let count = node.children.len();
    for (idx, child) in node.children.iter().enumerate() {
        push_subtree(child, &child_prefix, idx + 1 == count, lines);
    }
}

/// Prefers the service's own drawing and falls back to the structured tree.
pub fn derivation_tree(parse: &ParseResponse) -> Option<String> {
    match (&parse.tree_ascii, &parse.tree) {
        (Some(ascii), _) if !ascii.trim().is_empty() => Some(ascii.clone()),
        (_, Some(tree)) => Some(render_tree(tree)),
        _ => None,
    }
}

pub fn verdict(accepted: bool) -> &'static str {
    if accepted {
        ACCEPTED_VERDICT
    } else {
        REJECTED_VERDICT
    }
}

pub fn build_report(build: &BuildResponse, include_tables: bool) -> String {
    let mut out = String::new();
    out.push_str(&grammar_info(build));
    let _ = writeln!(out, "States: {}\n", build.states.len());
    if include_tables {
        out.push_str("LR(1) States\n\n");
        out.push_str(&states_report(&build.states));
        if !build.closure_table.is_empty() {
            out.push_str("LR(1) Closure Table\n\n");
            out.push_str(&closure_report(&build.closure_table));
        }
        out.push_str("ACTION Table\n\n");
        out.push_str(&action_table(&build.tables));
        out.push_str("\nGOTO Table\n\n");
        out.push_str(&goto_table(&build.tables));
    }
    out
}

pub fn parse_report(parse: &ParseResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}\n", verdict(parse.accepted));
    if !parse.trace.is_empty() {
        out.push_str("Parse Trace\n\n");
        out.push_str(&trace_table(&parse.trace));
    }
    if let Some(tree) = derivation_tree(parse) {
        out.push_str("\nDerivation Tree\n\n");
        out.push_str(&tree);
        out.push('\n');
    }
    out
}

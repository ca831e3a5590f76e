//! DOT export.
//!
//! Renders an automaton for Graphviz. Parallel regions become clusters
//! attached to their anchor state with a dotted edge, final states are drawn
//! as double circles and the interrupt transition is dashed.

use crate::automaton::Automaton;
use std::fmt::{self, Display, Formatter};

/// Wrapper for exporting an automaton in DOT format.
pub struct Dot<'a>(&'a Automaton);

impl<'a> Dot<'a> {
    pub fn new(fsm: &'a Automaton) -> Self {
        Self(fsm)
    }

    fn write_body(&self, f: &mut Formatter<'_>, fsm: &Automaton, depth: usize) -> fmt::Result {
        let indent = "    ".repeat(depth);

        for &state in fsm.states() {
            let shape = if fsm.is_final(state) {
                "doublecircle"
            } else {
                "circle"
            };
            writeln!(
                f,
                "{indent}{state} [label=\"{}\", shape={shape}];",
                self.0.display_name(state)
            )?;
        }

        for t in fsm.transitions() {
            let mut label = escape(&t.label.to_string());
            if let Some(guard) = &t.guard {
                label.push(' ');
                label.push_str(&escape(&guard.to_string()));
            }
            let style = if fsm.interrupts().iter().any(|i| &i.transition == t) {
                ", style=dashed"
            } else {
                ""
            };
            writeln!(f, "{indent}{} -> {} [label=\"{label}\"{style}];", t.from, t.to)?;
        }

        for (anchor, children) in fsm.nested() {
            for (index, child) in children.iter().enumerate() {
                writeln!(f, "{indent}subgraph \"cluster_{anchor}_{index}\" {{")?;
                self.write_body(f, child, depth + 1)?;
                writeln!(f, "{indent}}}")?;
                writeln!(
                    f,
                    "{indent}{anchor} -> {} [style=dotted];",
                    child.initial_state()
                )?;
            }
        }

        Ok(())
    }
}

impl Display for Dot<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph \"{}\" {{", escape(self.0.name().unwrap_or("automaton")))?;
        writeln!(f, "    rankdir=LR;")?;
        self.write_body(f, self.0, 1)?;
        write!(f, "}}")
    }
}

/// Renders `fsm` as a DOT document.
pub fn render(fsm: &Automaton) -> String {
    Dot::new(fsm).to_string()
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

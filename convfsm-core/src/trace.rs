//! Construction trace.
//!
//! The builder reports what it does as structured [`TraceEvent`]s to an
//! injected [`TraceSink`]. [`Trace`] collects events in order; [`NoopSink`]
//! drops them and lets the builder skip constructing them at all.

use crate::activity::{DispatchKey, Message, Role};
use crate::automaton::{StateId, TransitionLabel};
use std::fmt;

/// A single construction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    ProtocolStart {
        name: String,
    },
    Transition {
        from: StateId,
        label: TransitionLabel,
        to: StateId,
    },
    ChoiceEnter {
        start: StateId,
        branches: usize,
    },
    ChoiceBranch {
        index: usize,
        start: StateId,
    },
    ChoiceExit {
        end: StateId,
    },
    DispatchRegistered {
        state: StateId,
        key: DispatchKey,
        target: StateId,
    },
    ParallelEnter {
        anchor: StateId,
        join: StateId,
        branches: usize,
    },
    ParallelBranch {
        index: usize,
        anchor: StateId,
        states: usize,
    },
    ParallelExit {
        join: StateId,
    },
    RepeatEnter {
        loop_start: StateId,
    },
    RepeatExit {
        back_edge: bool,
    },
    RecursionEnter {
        label: String,
        start: StateId,
    },
    RecursionExit {
        label: String,
    },
    RecursionCall {
        label: String,
        target: StateId,
    },
    InterruptArmed {
        anchor: StateId,
        role: Role,
    },
    InterruptRegistered {
        anchor: StateId,
        message: Message,
    },
    FinalState {
        state: StateId,
    },
    ProtocolEnd {
        states: usize,
        transitions: usize,
    },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::ProtocolStart { name } => write!(f, "enter protocol {}", name),
            TraceEvent::Transition { from, label, to } => {
                write!(f, "transition {} --{}--> {}", from, label, to)
            }
            TraceEvent::ChoiceEnter { start, branches } => {
                write!(f, "enter choice at {} ({} branches)", start, branches)
            }
            TraceEvent::ChoiceBranch { index, start } => {
                write!(f, "enter choice branch {} from {}", index, start)
            }
            TraceEvent::ChoiceExit { end } => write!(f, "exit choice at {}", end),
            TraceEvent::DispatchRegistered { state, key, target } => {
                write!(f, "dispatch {} at {} to {}", key, state, target)
            }
            TraceEvent::ParallelEnter {
                anchor,
                join,
                branches,
            } => write!(
                f,
                "enter parallel at {} ({} branches, join {})",
                anchor, branches, join
            ),
            TraceEvent::ParallelBranch {
                index,
                anchor,
                states,
            } => write!(
                f,
                "exit parallel branch {} under {} ({} states)",
                index, anchor, states
            ),
            TraceEvent::ParallelExit { join } => write!(f, "exit parallel at {}", join),
            TraceEvent::RepeatEnter { loop_start } => write!(f, "enter repeat at {}", loop_start),
            TraceEvent::RepeatExit { back_edge } => {
                if *back_edge {
                    f.write_str("exit repeat with back-edge")
                } else {
                    f.write_str("exit repeat without back-edge")
                }
            }
            TraceEvent::RecursionEnter { label, start } => {
                write!(f, "enter rec {} at {}", label, start)
            }
            TraceEvent::RecursionExit { label } => write!(f, "exit rec {}", label),
            TraceEvent::RecursionCall { label, target } => {
                write!(f, "call rec {} -> {}", label, target)
            }
            TraceEvent::InterruptArmed { anchor, role } => {
                write!(f, "arm interrupt by {} at {}", role, anchor)
            }
            TraceEvent::InterruptRegistered { anchor, message } => {
                write!(f, "interrupt {} resumes at {}", message, anchor)
            }
            TraceEvent::FinalState { state } => write!(f, "final state {}", state),
            TraceEvent::ProtocolEnd {
                states,
                transitions,
            } => write!(
                f,
                "exit protocol ({} states, {} transitions)",
                states, transitions
            ),
        }
    }
}

/// Receiver of construction events.
pub trait TraceSink {
    fn record(&mut self, event: TraceEvent);

    /// Returning false lets the builder skip building events.
    fn enabled(&self) -> bool {
        true
    }
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&mut self, _event: TraceEvent) {}

    fn enabled(&self) -> bool {
        false
    }
}

/// Ordered in-memory collection of events.
#[derive(Debug, Default, Clone)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Human-readable rendering, one line per event.
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }
}

impl TraceSink for Trace {
    fn record(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

impl TraceSink for Vec<TraceEvent> {
    fn record(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_collects_in_order() {
        let mut trace = Trace::new();
        assert!(trace.enabled());
        trace.record(TraceEvent::ProtocolStart {
            name: "P".to_string(),
        });
        trace.record(TraceEvent::Transition {
            from: StateId::new(0),
            label: TransitionLabel::Epsilon,
            to: StateId::new(1),
        });

        assert_eq!(trace.len(), 2);
        assert_eq!(
            trace.lines(),
            vec!["enter protocol P", "transition s0 --ε--> s1"]
        );
    }

    #[test]
    fn test_noop_sink_disabled() {
        let mut sink = NoopSink;
        assert!(!sink.enabled());
        sink.record(TraceEvent::ChoiceExit {
            end: StateId::new(3),
        });
    }
}

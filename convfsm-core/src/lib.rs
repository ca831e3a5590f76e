//! # convfsm-core
//!
//! Protocol compiler for convfsm.
//!
//! This crate provides:
//! - Activity trees describing multi-party conversation protocols
//! - The automaton model handed to runtime monitors
//! - The builder that flattens activity trees into automata
//! - Construction traces and DOT export for inspection

pub mod activity;
pub mod automaton;
pub mod builder;
pub mod dot;
pub mod error;
pub mod scope;
pub mod trace;

pub use activity::{
    Activity, ActivityList, Assertion, DirectedBranch, Direction, DispatchKey, Interaction,
    Message, PrimitiveType, Protocol, Role, ValueDecl,
};
pub use automaton::{
    Automaton, AutomatonShape, DispatchEntry, InterruptTransition, StateArena, StateId, Transition,
    TransitionLabel,
};
pub use builder::{compile, CompileOptions, Compiler, RepeatMode};
pub use dot::Dot;
pub use error::BuildError;
pub use trace::{NoopSink, Trace, TraceEvent, TraceSink};

//! Automaton model produced by the builder and consumed by the monitor.
//!
//! States are opaque handles allocated from a per-compilation arena, so a
//! handle is unique across the top-level automaton and every nested
//! sub-automaton. Identity never depends on how a state is displayed.

use crate::activity::{Assertion, DispatchKey, Message, Role, ValueDecl};
use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Opaque state handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(u32);

impl StateId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Sequential allocator for state handles.
///
/// Also keeps the anchor side table: for a state owned by a parallel
/// sub-automaton, the state in the enclosing automaton it hangs off. The
/// table is only used for display.
#[derive(Debug, Default)]
pub struct StateArena {
    next: u32,
    anchors: BTreeMap<StateId, StateId>,
}

impl StateArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, anchor: Option<StateId>) -> StateId {
        let id = StateId(self.next);
        self.next += 1;
        if let Some(anchor) = anchor {
            self.anchors.insert(id, anchor);
        }
        id
    }

    pub fn allocated(&self) -> usize {
        self.next as usize
    }

    pub fn into_anchors(self) -> BTreeMap<StateId, StateId> {
        self.anchors
    }
}

/// What a transition is labelled with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionLabel {
    /// An observable message.
    Message(Message),
    /// Silent move used to merge or advance control flow.
    Epsilon,
    /// Completion marker at the end of a parallel branch.
    ParallelEnd,
}

impl TransitionLabel {
    pub fn is_epsilon(&self) -> bool {
        matches!(self, TransitionLabel::Epsilon)
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            TransitionLabel::Message(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for TransitionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionLabel::Message(m) => write!(f, "{}", m),
            TransitionLabel::Epsilon => f.write_str("ε"),
            TransitionLabel::ParallelEnd => f.write_str("END_PAR"),
        }
    }
}

/// A labelled edge between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StateId,
    pub label: TransitionLabel,
    pub to: StateId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Assertion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<ValueDecl>>,
}

impl Transition {
    pub fn epsilon(from: StateId, to: StateId) -> Self {
        Self {
            from,
            label: TransitionLabel::Epsilon,
            to,
            guard: None,
            payload: None,
        }
    }

    pub fn is_epsilon(&self) -> bool {
        self.label.is_epsilon()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --{}--> {}", self.from, self.label, self.to)?;
        if let Some(guard) = &self.guard {
            write!(f, " {}", guard)?;
        }
        Ok(())
    }
}

/// A transition that may preempt normal flow, resuming at its anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptTransition {
    pub anchor: StateId,
    pub transition: Transition,
}

/// One directed-choice branch as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEntry {
    pub key: DispatchKey,
    pub target: StateId,
}

/// A compiled protocol automaton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Automaton {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,

    initial: StateId,

    states: Vec<StateId>,

    transitions: Vec<Transition>,

    finals: BTreeSet<StateId>,

    #[serde(default)]
    roles: Vec<Role>,

    /// Sub-automata of parallel regions, keyed by the state they hang off.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    nested: BTreeMap<StateId, Vec<Automaton>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    interrupts: Vec<InterruptTransition>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    dispatch: BTreeMap<StateId, Vec<DispatchEntry>>,

    /// Anchor side table for display; populated on the top-level automaton.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    anchors: BTreeMap<StateId, StateId>,
}

impl Automaton {
    /// Creates an automaton containing only its initial state.
    pub fn new(initial: StateId) -> Self {
        Self {
            name: None,
            checksum: None,
            initial,
            states: vec![initial],
            transitions: Vec::new(),
            finals: BTreeSet::new(),
            roles: Vec::new(),
            nested: BTreeMap::new(),
            interrupts: Vec::new(),
            dispatch: BTreeMap::new(),
            anchors: BTreeMap::new(),
        }
    }

    // =========================================================================
    // Construction (append-only)
    // =========================================================================

    pub(crate) fn add_state(&mut self, state: StateId) {
        self.states.push(state);
    }

    pub(crate) fn add_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// Registers `transition` as the interrupt resuming at `anchor`.
    ///
    /// An anchor carries at most one interrupt.
    pub(crate) fn add_interrupt_transition(
        &mut self,
        anchor: StateId,
        transition: Transition,
    ) -> Result<(), BuildError> {
        if self.interrupt_at(anchor).is_some() {
            return Err(BuildError::InterruptConflict { state: anchor });
        }
        self.interrupts.push(InterruptTransition { anchor, transition });
        Ok(())
    }

    pub(crate) fn register_sub_automaton(&mut self, anchor: StateId, child: Automaton) {
        self.nested.entry(anchor).or_default().push(child);
    }

    pub(crate) fn register_dispatch(&mut self, state: StateId, key: DispatchKey, target: StateId) {
        self.dispatch
            .entry(state)
            .or_default()
            .push(DispatchEntry { key, target });
    }

    pub(crate) fn mark_final(&mut self, state: StateId) {
        self.finals.insert(state);
    }

    pub(crate) fn add_role(&mut self, role: &Role) {
        if !self.roles.contains(role) {
            self.roles.push(role.clone());
        }
    }

    pub(crate) fn set_roles(&mut self, roles: Vec<Role>) {
        self.roles = roles;
    }

    pub(crate) fn set_identity(&mut self, name: String, checksum: String) {
        self.name = Some(name);
        self.checksum = Some(checksum);
    }

    pub(crate) fn set_anchors(&mut self, anchors: BTreeMap<StateId, StateId>) {
        self.anchors = anchors;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Protocol name, on the top-level automaton.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Checksum of the source protocol, on the top-level automaton.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn initial_state(&self) -> StateId {
        self.initial
    }

    /// States owned by this automaton, in allocation order.
    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn final_states(&self) -> &BTreeSet<StateId> {
        &self.finals
    }

    pub fn is_final(&self, state: StateId) -> bool {
        self.finals.contains(&state)
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn contains_state(&self, state: StateId) -> bool {
        self.states.contains(&state)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn epsilon_count(&self) -> usize {
        self.transitions.iter().filter(|t| t.is_epsilon()).count()
    }

    /// All parallel regions, keyed by anchor state.
    pub fn nested(&self) -> &BTreeMap<StateId, Vec<Automaton>> {
        &self.nested
    }

    /// Sub-automata registered against `state`; empty if none.
    pub fn sub_automata(&self, state: StateId) -> &[Automaton] {
        self.nested.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn interrupts(&self) -> &[InterruptTransition] {
        &self.interrupts
    }

    pub fn interrupt_at(&self, anchor: StateId) -> Option<&InterruptTransition> {
        self.interrupts.iter().find(|i| i.anchor == anchor)
    }

    /// Returns the interrupt triggered by `message`, if any.
    pub fn interrupt_for(&self, message: &Message) -> Option<&InterruptTransition> {
        self.interrupts
            .iter()
            .find(|i| i.transition.label.message() == Some(message))
    }

    pub fn dispatch_table(&self, state: StateId) -> &[DispatchEntry] {
        self.dispatch.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Branch entered when a directed choice at `state` sees `key`.
    pub fn dispatch_target(&self, state: StateId, key: &DispatchKey) -> Option<StateId> {
        self.dispatch_table(state)
            .iter()
            .find(|e| &e.key == key)
            .map(|e| e.target)
    }

    pub fn transitions_from(&self, state: StateId) -> impl Iterator<Item = &Transition> {
        self.transitions.iter().filter(move |t| t.from == state)
    }

    /// States reachable from `state` through ε-transitions only, including
    /// `state` itself.
    pub fn epsilon_closure(&self, state: StateId) -> BTreeSet<StateId> {
        let mut closure = BTreeSet::new();
        let mut queue = VecDeque::new();
        closure.insert(state);
        queue.push_back(state);

        while let Some(current) = queue.pop_front() {
            for t in self.transitions_from(current).filter(|t| t.is_epsilon()) {
                if closure.insert(t.to) {
                    queue.push_back(t.to);
                }
            }
        }

        closure
    }

    /// States reached by observing `message` in `state`.
    ///
    /// The ε-closure of `state` is taken first. Parallel regions are not
    /// entered; their sub-automata are queried separately.
    pub fn step(&self, state: StateId, message: &Message) -> Vec<StateId> {
        let closure = self.epsilon_closure(state);
        let targets: BTreeSet<StateId> = self
            .transitions
            .iter()
            .filter(|t| closure.contains(&t.from) && t.label.message() == Some(message))
            .map(|t| t.to)
            .collect();
        targets.into_iter().collect()
    }

    /// True if a final state is reachable from `state` through ε-transitions.
    pub fn accepts_at(&self, state: StateId) -> bool {
        self.epsilon_closure(state)
            .iter()
            .any(|s| self.finals.contains(s))
    }

    /// Hierarchical display name: nested states are prefixed by their anchor.
    ///
    /// Meaningful on the top-level automaton, which carries the anchor table.
    pub fn display_name(&self, state: StateId) -> String {
        match self.anchors.get(&state) {
            Some(anchor) => format!("{}_{}", self.display_name(*anchor), state.index()),
            None => state.to_string(),
        }
    }

    /// Total number of states including every nested sub-automaton.
    pub fn total_state_count(&self) -> usize {
        self.states.len()
            + self
                .nested
                .values()
                .flatten()
                .map(Automaton::total_state_count)
                .sum::<usize>()
    }

    /// Structural summary, independent of handle values.
    pub fn shape(&self) -> AutomatonShape {
        let position = |s: &StateId| self.states.iter().position(|x| x == s);
        AutomatonShape {
            states: self.states.len(),
            transitions: self.transitions.len(),
            epsilons: self.epsilon_count(),
            finals: self.finals.len(),
            interrupts: self.interrupts.len(),
            nested: self
                .nested
                .iter()
                .map(|(anchor, children)| {
                    (
                        position(anchor),
                        children.iter().map(Automaton::shape).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Serializes the automaton for an out-of-process monitor.
    pub fn to_json(&self) -> Result<serde_json::Value, BuildError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, BuildError> {
        Ok(serde_json::from_value(json.clone())?)
    }
}

/// Handle-independent summary of an automaton, used to compare compilations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomatonShape {
    pub states: usize,
    pub transitions: usize,
    pub epsilons: usize,
    pub finals: usize,
    pub interrupts: usize,
    /// Parallel regions as (position of the anchor among the states, branches).
    pub nested: Vec<(Option<usize>, Vec<AutomatonShape>)>,
}

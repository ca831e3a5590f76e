//! Scope bookkeeping used while building an automaton.
//!
//! Scopes form an explicit stack. A frame is pushed for every recursion
//! definition and for every parallel branch; a parallel branch additionally
//! suspends the enclosing automaton and makes a fresh sub-automaton current.
//! Recursion lookups scan frames from the top down and never cross into the
//! frames of an enclosing automaton.

use crate::automaton::{Automaton, StateId};
use std::collections::HashMap;
use std::mem;

/// Recorded recursion entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionEntry {
    pub start: StateId,
    pub active: bool,
}

/// An open choice: shared entry state, and the shared exit once allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceFrame {
    pub start: StateId,
    pub end: Option<StateId>,
}

/// Why a frame was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Root,
    Recursion { label: String },
    Branch { anchor: StateId },
}

/// A single scope.
#[derive(Debug)]
pub struct ScopeFrame {
    kind: FrameKind,
    /// Depth of the automaton this frame builds into (0 = top level).
    owner: usize,
    cursor: StateId,
    recursion: HashMap<String, RecursionEntry>,
    choices: Vec<ChoiceFrame>,
}

impl ScopeFrame {
    fn new(kind: FrameKind, owner: usize, cursor: StateId) -> Self {
        Self {
            kind,
            owner,
            cursor,
            recursion: HashMap::new(),
            choices: Vec::new(),
        }
    }
}

/// The scope stack together with the automata under construction.
#[derive(Debug)]
pub struct ScopeStack {
    automaton: Automaton,
    suspended: Vec<Automaton>,
    current: ScopeFrame,
    parents: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new(root: Automaton) -> Self {
        let cursor = root.initial_state();
        Self {
            automaton: root,
            suspended: Vec::new(),
            current: ScopeFrame::new(FrameKind::Root, 0, cursor),
            parents: Vec::new(),
        }
    }

    pub fn cursor(&self) -> StateId {
        self.current.cursor
    }

    pub fn set_cursor(&mut self, state: StateId) {
        self.current.cursor = state;
    }

    /// The automaton the current frame builds into.
    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    pub fn automaton_mut(&mut self) -> &mut Automaton {
        &mut self.automaton
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.parents.len() + 1
    }

    /// Nesting depth of the current automaton (0 = top level).
    pub fn owner(&self) -> usize {
        self.current.owner
    }

    /// Anchor of the innermost open parallel branch, if any.
    pub fn current_anchor(&self) -> Option<StateId> {
        std::iter::once(&self.current)
            .chain(self.parents.iter().rev())
            .find_map(|frame| match frame.kind {
                FrameKind::Branch { anchor } => Some(anchor),
                _ => None,
            })
    }

    fn push(&mut self, frame: ScopeFrame) {
        let parent = mem::replace(&mut self.current, frame);
        self.parents.push(parent);
    }

    fn pop(&mut self) -> Option<ScopeFrame> {
        let parent = self.parents.pop()?;
        Some(mem::replace(&mut self.current, parent))
    }

    // =========================================================================
    // Parallel branches
    // =========================================================================

    /// Suspends the current automaton and starts building `child`.
    pub fn enter_branch(&mut self, anchor: StateId, child: Automaton) {
        let cursor = child.initial_state();
        let parent = mem::replace(&mut self.automaton, child);
        self.suspended.push(parent);
        let owner = self.suspended.len();
        self.push(ScopeFrame::new(FrameKind::Branch { anchor }, owner, cursor));
    }

    /// Closes the current branch, returning its finished automaton and
    /// resuming the enclosing one.
    pub fn exit_branch(&mut self) -> Option<Automaton> {
        if !matches!(self.current.kind, FrameKind::Branch { .. }) {
            return None;
        }
        let parent = self.suspended.pop()?;
        self.pop()?;
        Some(mem::replace(&mut self.automaton, parent))
    }

    // =========================================================================
    // Recursion
    // =========================================================================

    /// Opens a recursion scope whose label re-enters at `start`.
    pub fn enter_recursion(&mut self, label: &str, start: StateId) {
        let mut frame = ScopeFrame::new(
            FrameKind::Recursion {
                label: label.to_string(),
            },
            self.current.owner,
            start,
        );
        frame.recursion.insert(
            label.to_string(),
            RecursionEntry {
                start,
                active: true,
            },
        );
        self.push(frame);
    }

    /// Closes the current recursion scope.
    ///
    /// The cursor carries over to the enclosing frame. Labels defined in the
    /// closed scope stay visible to lookups, marked inactive, unless the
    /// enclosing frame already knows the label.
    pub fn exit_recursion(&mut self) -> Option<String> {
        let label = match &self.current.kind {
            FrameKind::Recursion { label } => label.clone(),
            _ => return None,
        };
        let closed = self.pop()?;
        self.current.cursor = closed.cursor;
        for (name, entry) in closed.recursion {
            self.current.recursion.entry(name).or_insert(RecursionEntry {
                start: entry.start,
                active: false,
            });
        }
        Some(label)
    }

    /// Looks a label up, innermost scope first, within the current automaton.
    pub fn lookup_recursion(&self, label: &str) -> Option<RecursionEntry> {
        let owner = self.current.owner;
        std::iter::once(&self.current)
            .chain(self.parents.iter().rev())
            .take_while(|frame| frame.owner == owner)
            .find_map(|frame| frame.recursion.get(label).copied())
    }

    /// Entry state for a call to `label`, if the label is in scope and active.
    pub fn resolve_recursion(&self, label: &str) -> Option<StateId> {
        self.lookup_recursion(label)
            .filter(|entry| entry.active)
            .map(|entry| entry.start)
    }

    // =========================================================================
    // Choice
    // =========================================================================

    pub fn push_choice(&mut self, start: StateId) {
        self.current.choices.push(ChoiceFrame { start, end: None });
    }

    pub fn choice(&self) -> Option<ChoiceFrame> {
        self.current.choices.last().copied()
    }

    pub fn set_choice_end(&mut self, end: StateId) {
        if let Some(frame) = self.current.choices.last_mut() {
            frame.end = Some(end);
        }
    }

    pub fn pop_choice(&mut self) -> Option<ChoiceFrame> {
        self.current.choices.pop()
    }

    /// Consumes the stack, returning the top-level automaton.
    ///
    /// Branches still open are discarded along with their automata.
    pub fn into_root(self) -> Automaton {
        let mut suspended = self.suspended;
        if suspended.is_empty() {
            self.automaton
        } else {
            suspended.swap_remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::StateArena;

    fn stack() -> (StateArena, ScopeStack) {
        let mut arena = StateArena::new();
        let root = Automaton::new(arena.alloc(None));
        (arena, ScopeStack::new(root))
    }

    #[test]
    fn test_recursion_active_only_inside_scope() {
        let (mut arena, mut stack) = stack();
        let start = stack.cursor();

        stack.enter_recursion("x", start);
        assert_eq!(stack.resolve_recursion("x"), Some(start));

        let next = arena.alloc(None);
        stack.set_cursor(next);
        assert_eq!(stack.exit_recursion(), Some("x".to_string()));

        assert_eq!(stack.cursor(), next);
        assert_eq!(stack.resolve_recursion("x"), None);
        assert_eq!(
            stack.lookup_recursion("x"),
            Some(RecursionEntry {
                start,
                active: false
            })
        );
    }

    #[test]
    fn test_shadowed_label_restored() {
        let (mut arena, mut stack) = stack();
        let outer = stack.cursor();
        stack.enter_recursion("x", outer);

        let inner = arena.alloc(None);
        stack.set_cursor(inner);
        stack.enter_recursion("x", inner);
        assert_eq!(stack.resolve_recursion("x"), Some(inner));
        stack.exit_recursion();

        assert_eq!(stack.resolve_recursion("x"), Some(outer));
        stack.exit_recursion();
        assert_eq!(stack.resolve_recursion("x"), None);
    }

    #[test]
    fn test_lookup_does_not_cross_branch() {
        let (mut arena, mut stack) = stack();
        let anchor = stack.cursor();
        stack.enter_recursion("x", anchor);

        let child = Automaton::new(arena.alloc(Some(anchor)));
        stack.enter_branch(anchor, child);
        assert_eq!(stack.owner(), 1);
        assert_eq!(stack.current_anchor(), Some(anchor));
        assert_eq!(stack.resolve_recursion("x"), None);

        let finished = stack.exit_branch().unwrap();
        assert_eq!(finished.initial_state().index(), 1);
        assert_eq!(stack.owner(), 0);
        assert_eq!(stack.resolve_recursion("x"), Some(anchor));
    }

    #[test]
    fn test_choice_stack_nests() {
        let (mut arena, mut stack) = stack();
        let outer = stack.cursor();
        stack.push_choice(outer);
        let inner = arena.alloc(None);
        stack.push_choice(inner);
        stack.set_choice_end(arena.alloc(None));

        let popped = stack.pop_choice().unwrap();
        assert_eq!(popped.start, inner);
        assert!(popped.end.is_some());
        assert_eq!(stack.choice().unwrap().start, outer);
        assert!(stack.choice().unwrap().end.is_none());
    }

    #[test]
    fn test_into_root_returns_top_level() {
        let (mut arena, mut stack) = stack();
        let start = stack.cursor();
        stack.enter_recursion("x", start);
        assert_eq!(stack.depth(), 2);
        assert!(stack.exit_branch().is_none());

        let child = Automaton::new(arena.alloc(Some(start)));
        stack.enter_branch(start, child);
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.into_root().initial_state(), start);
    }
}

//! Protocol compiler.
//!
//! [`Compiler::compile`] walks a protocol's activity tree depth-first and
//! emits states and transitions into an [`Automaton`], threading a cursor
//! state through each construct:
//!
//! - interaction: one new state, one message transition
//! - choice: branches share the entry state and converge on one exit via ε
//! - directed choice: as choice, each branch selected by its dispatch key
//! - parallel: one sub-automaton per branch under the entry state, ε to a join
//! - repeat: body compiled once; [`RepeatMode::Loop`] hangs it off a fresh
//!   head state and adds an ε back-edge to that head
//! - rec / call: ε back to the recorded entry state while the label is active
//! - global escape: the first handler transition doubles as the interrupt
//!
//! Compilation aborts on the first [`BuildError`].

use crate::activity::{Activity, ActivityList, DirectedBranch, Interaction, Protocol, Role};
use crate::automaton::{Automaton, StateArena, StateId, Transition, TransitionLabel};
use crate::error::BuildError;
use crate::scope::ScopeStack;
use crate::trace::{NoopSink, TraceEvent, TraceSink};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How `repeat` bodies are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// The body hangs off a fresh head state entered by ε, with an ε
    /// back-edge from the end of the body to the head; the body runs one or
    /// more times.
    #[default]
    Loop,
    /// No back-edge; the body runs exactly once.
    Once,
}

impl std::str::FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "loop" => Ok(RepeatMode::Loop),
            "once" => Ok(RepeatMode::Once),
            other => Err(format!("unknown repeat mode '{}'", other)),
        }
    }
}

/// Compiler options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub repeat: RepeatMode,
}

impl CompileOptions {
    pub fn with_repeat(mut self, repeat: RepeatMode) -> Self {
        self.repeat = repeat;
        self
    }
}

/// Compiles a protocol with default options.
pub fn compile(protocol: &Protocol) -> Result<Automaton, BuildError> {
    Compiler::default().compile(protocol)
}

/// Reusable, stateless protocol compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile(&self, protocol: &Protocol) -> Result<Automaton, BuildError> {
        self.compile_traced(protocol, &mut NoopSink)
    }

    /// Compiles `protocol`, reporting each construction step to `sink`.
    pub fn compile_traced(
        &self,
        protocol: &Protocol,
        sink: &mut dyn TraceSink,
    ) -> Result<Automaton, BuildError> {
        Builder::new(self.options, sink).run(protocol)
    }
}

/// Interrupt waiting for the first message transition of its handler.
#[derive(Debug, Clone, Copy)]
struct PendingInterrupt {
    anchor: StateId,
    owner: usize,
}

/// State of a single compilation.
struct Builder<'a> {
    options: CompileOptions,
    sink: &'a mut dyn TraceSink,
    arena: StateArena,
    scopes: ScopeStack,
    pending_interrupt: Option<PendingInterrupt>,
    /// Every role referenced anywhere, in first-reference order.
    roles: Vec<Role>,
}

impl<'a> Builder<'a> {
    fn new(options: CompileOptions, sink: &'a mut dyn TraceSink) -> Self {
        let mut arena = StateArena::new();
        let root = Automaton::new(arena.alloc(None));
        Self {
            options,
            sink,
            arena,
            scopes: ScopeStack::new(root),
            pending_interrupt: None,
            roles: Vec::new(),
        }
    }

    fn run(mut self, protocol: &Protocol) -> Result<Automaton, BuildError> {
        tracing::debug!(protocol = %protocol.name, "compiling protocol");
        self.trace(|| TraceEvent::ProtocolStart {
            name: protocol.name.clone(),
        });

        require_non_empty(&protocol.activities, "protocol")?;
        for role in protocol.at.iter().chain(protocol.roles.iter()) {
            self.add_role(role);
        }

        self.compile_list(&protocol.activities)?;
        let last = self.scopes.cursor();
        self.mark_final(last);

        let checksum = protocol.checksum()?;
        let Builder {
            arena,
            scopes,
            sink,
            roles,
            ..
        } = self;
        let mut automaton = scopes.into_root();
        automaton.set_identity(protocol.name.clone(), checksum);
        automaton.set_roles(roles);
        automaton.set_anchors(arena.into_anchors());

        if sink.enabled() {
            sink.record(TraceEvent::ProtocolEnd {
                states: automaton.total_state_count(),
                transitions: automaton.transition_count(),
            });
        }
        tracing::debug!(
            protocol = %protocol.name,
            states = automaton.total_state_count(),
            transitions = automaton.transition_count(),
            "protocol compiled"
        );

        Ok(automaton)
    }

    fn trace(&mut self, event: impl FnOnce() -> TraceEvent) {
        if self.sink.enabled() {
            self.sink.record(event());
        }
    }

    // =========================================================================
    // Automaton primitives
    // =========================================================================

    /// Allocates a state in the automaton currently being built.
    fn new_state(&mut self) -> StateId {
        let state = self.arena.alloc(self.scopes.current_anchor());
        self.scopes.automaton_mut().add_state(state);
        state
    }

    fn add_transition(&mut self, transition: Transition) -> Result<(), BuildError> {
        let (from, to) = (transition.from, transition.to);
        let label = transition.label.clone();

        if let TransitionLabel::Message(message) = &transition.label {
            let owner = self.scopes.owner();
            if let Some(pending) = self.pending_interrupt.filter(|p| p.owner == owner) {
                self.pending_interrupt = None;
                self.scopes
                    .automaton_mut()
                    .add_interrupt_transition(pending.anchor, transition.clone())?;
                tracing::trace!(anchor = %pending.anchor, message = %message, "interrupt registered");
                let message = message.clone();
                self.trace(|| TraceEvent::InterruptRegistered {
                    anchor: pending.anchor,
                    message,
                });
            }
        }

        self.scopes.automaton_mut().add_transition(transition);
        tracing::trace!(from = %from, to = %to, label = %label, "transition added");
        self.trace(|| TraceEvent::Transition { from, label, to });
        Ok(())
    }

    fn add_epsilon(&mut self, from: StateId, to: StateId) -> Result<(), BuildError> {
        self.add_transition(Transition::epsilon(from, to))
    }

    fn mark_final(&mut self, state: StateId) {
        self.scopes.automaton_mut().mark_final(state);
        self.trace(|| TraceEvent::FinalState { state });
    }

    /// Records `role` on the automaton being built and on the top level.
    fn add_role(&mut self, role: &Role) {
        self.scopes.automaton_mut().add_role(role);
        if !self.roles.contains(role) {
            self.roles.push(role.clone());
        }
    }

    // =========================================================================
    // Visitor
    // =========================================================================

    fn compile_list(&mut self, activities: &[Activity]) -> Result<(), BuildError> {
        for activity in activities {
            self.compile_activity(activity)?;
        }
        Ok(())
    }

    fn compile_activity(&mut self, activity: &Activity) -> Result<(), BuildError> {
        match activity {
            Activity::Interaction(interaction) => self.interaction(interaction),
            Activity::Choice { branches } => self.choice(branches),
            Activity::DirectedChoice {
                from,
                to,
                on_message,
            } => self.directed_choice(from, to, on_message),
            Activity::Parallel { branches } => self.parallel(branches),
            Activity::Repeat { body } => self.repeat(body),
            Activity::RecursionDef { label, body } => self.recursion_def(label, body),
            Activity::RecursionCall { label } => self.recursion_call(label),
            Activity::GlobalEscape {
                body,
                interrupt_role,
                interrupt_body,
            } => self.global_escape(body, interrupt_role, interrupt_body),
            Activity::End => {
                let state = self.scopes.cursor();
                self.mark_final(state);
                Ok(())
            }
        }
    }

    fn interaction(&mut self, interaction: &Interaction) -> Result<(), BuildError> {
        let from = self.scopes.cursor();
        let to = self.new_state();
        self.add_role(&interaction.partner);

        let payload = if interaction.payload.is_empty() {
            None
        } else {
            Some(interaction.payload.clone())
        };
        self.add_transition(Transition {
            from,
            label: TransitionLabel::Message(interaction.message()),
            to,
            guard: interaction.assertion.clone(),
            payload,
        })?;

        self.scopes.set_cursor(to);
        Ok(())
    }

    /// Joins the cursor onto the open choice's exit, allocating the exit on
    /// the first branch to finish.
    fn converge_choice(&mut self) -> Result<(), BuildError> {
        let end = match self.scopes.choice().and_then(|c| c.end) {
            Some(end) => end,
            None => {
                let end = self.new_state();
                self.scopes.set_choice_end(end);
                end
            }
        };
        let from = self.scopes.cursor();
        self.add_epsilon(from, end)
    }

    fn close_choice(&mut self, start: StateId) {
        let end = self
            .scopes
            .pop_choice()
            .and_then(|c| c.end)
            .unwrap_or(start);
        self.scopes.set_cursor(end);
        self.trace(|| TraceEvent::ChoiceExit { end });
    }

    fn choice(&mut self, branches: &[ActivityList]) -> Result<(), BuildError> {
        if branches.is_empty() {
            return Err(BuildError::EmptyActivityList {
                construct: "choice",
            });
        }
        for branch in branches {
            require_non_empty(branch, "choice branch")?;
        }

        let start = self.scopes.cursor();
        let count = branches.len();
        self.trace(|| TraceEvent::ChoiceEnter {
            start,
            branches: count,
        });
        self.scopes.push_choice(start);

        for (index, branch) in branches.iter().enumerate() {
            self.scopes.set_cursor(start);
            self.trace(|| TraceEvent::ChoiceBranch { index, start });
            self.compile_list(branch)?;
            self.converge_choice()?;
        }

        self.close_choice(start);
        Ok(())
    }

    fn directed_choice(
        &mut self,
        from: &Role,
        to: &[Role],
        on_message: &[DirectedBranch],
    ) -> Result<(), BuildError> {
        if on_message.is_empty() {
            return Err(BuildError::EmptyActivityList {
                construct: "directed choice",
            });
        }

        let mut seen = HashSet::new();
        for branch in on_message {
            let key = branch.message.dispatch_key();
            if !seen.insert(key.clone()) {
                return Err(BuildError::AmbiguousDispatchKey {
                    key: key.to_string(),
                });
            }
        }

        self.add_role(from);
        for role in to {
            self.add_role(role);
        }

        let start = self.scopes.cursor();
        let count = on_message.len();
        self.trace(|| TraceEvent::ChoiceEnter {
            start,
            branches: count,
        });
        self.scopes.push_choice(start);

        for (index, branch) in on_message.iter().enumerate() {
            self.scopes.set_cursor(start);
            self.trace(|| TraceEvent::ChoiceBranch { index, start });

            self.interaction(&branch.message)?;
            let target = self.scopes.cursor();
            let key = branch.message.dispatch_key();
            self.scopes
                .automaton_mut()
                .register_dispatch(start, key.clone(), target);
            self.trace(|| TraceEvent::DispatchRegistered {
                state: start,
                key,
                target,
            });

            self.compile_list(&branch.body)?;
            self.converge_choice()?;
        }

        self.close_choice(start);
        Ok(())
    }

    fn parallel(&mut self, branches: &[ActivityList]) -> Result<(), BuildError> {
        if branches.is_empty() {
            return Err(BuildError::EmptyActivityList {
                construct: "parallel",
            });
        }
        for branch in branches {
            require_non_empty(branch, "parallel branch")?;
        }

        let anchor = self.scopes.cursor();
        let join = self.new_state();
        let count = branches.len();
        self.trace(|| TraceEvent::ParallelEnter {
            anchor,
            join,
            branches: count,
        });

        for (index, branch) in branches.iter().enumerate() {
            let initial = self.arena.alloc(Some(anchor));
            self.scopes.enter_branch(anchor, Automaton::new(initial));

            self.compile_list(branch)?;
            let last = self.scopes.cursor();
            let done = self.new_state();
            self.add_transition(Transition {
                from: last,
                label: TransitionLabel::ParallelEnd,
                to: done,
                guard: None,
                payload: None,
            })?;
            self.mark_final(done);

            if let Some(child) = self.scopes.exit_branch() {
                let states = child.state_count();
                tracing::trace!(anchor = %anchor, index, states, "parallel branch compiled");
                self.scopes
                    .automaton_mut()
                    .register_sub_automaton(anchor, child);
                self.trace(|| TraceEvent::ParallelBranch {
                    index,
                    anchor,
                    states,
                });
            }
        }

        self.add_epsilon(anchor, join)?;
        self.scopes.set_cursor(join);
        self.trace(|| TraceEvent::ParallelExit { join });
        Ok(())
    }

    fn repeat(&mut self, body: &[Activity]) -> Result<(), BuildError> {
        require_non_empty(body, "repeat body")?;

        let back_edge = self.options.repeat == RepeatMode::Loop;
        let loop_start = if back_edge {
            // The back-edge must not land on the entry state, which may be
            // shared with sibling branches.
            let entry = self.scopes.cursor();
            let head = self.new_state();
            self.add_epsilon(entry, head)?;
            self.scopes.set_cursor(head);
            head
        } else {
            self.scopes.cursor()
        };
        self.trace(|| TraceEvent::RepeatEnter { loop_start });
        self.compile_list(body)?;

        if back_edge {
            let end = self.scopes.cursor();
            self.add_epsilon(end, loop_start)?;
        }
        self.trace(|| TraceEvent::RepeatExit { back_edge });
        Ok(())
    }

    fn recursion_def(&mut self, label: &str, body: &[Activity]) -> Result<(), BuildError> {
        require_non_empty(body, "rec body")?;

        let start = self.scopes.cursor();
        self.scopes.enter_recursion(label, start);
        tracing::trace!(label, start = %start, depth = self.scopes.depth(), "recursion scope opened");
        self.trace(|| TraceEvent::RecursionEnter {
            label: label.to_string(),
            start,
        });

        self.compile_list(body)?;

        self.scopes.exit_recursion();
        self.trace(|| TraceEvent::RecursionExit {
            label: label.to_string(),
        });
        Ok(())
    }

    fn recursion_call(&mut self, label: &str) -> Result<(), BuildError> {
        let target = self.scopes.resolve_recursion(label).ok_or_else(|| {
            BuildError::UndefinedOrInactiveRecursionLabel {
                label: label.to_string(),
            }
        })?;

        let from = self.scopes.cursor();
        self.add_epsilon(from, target)?;
        self.trace(|| TraceEvent::RecursionCall {
            label: label.to_string(),
            target,
        });

        // The call never falls through; anything after it hangs off a state
        // nothing reaches.
        let unreachable = self.new_state();
        self.scopes.set_cursor(unreachable);
        Ok(())
    }

    fn global_escape(
        &mut self,
        body: &[Activity],
        interrupt_role: &Role,
        handler: &[Activity],
    ) -> Result<(), BuildError> {
        require_non_empty(body, "global escape body")?;
        require_non_empty(handler, "interrupt handler")?;
        if let Some(first) = handler.first() {
            first
                .leading_interaction()
                .map_err(|construct| BuildError::AmbiguousInterrupt {
                    reason: format!(
                        "interrupt handler must start with a single interaction, found {}",
                        construct
                    ),
                })?;
        }

        self.add_role(interrupt_role);
        self.compile_list(body)?;

        let anchor = self.scopes.cursor();
        self.mark_final(anchor);

        if self.scopes.automaton().interrupt_at(anchor).is_some() {
            return Err(BuildError::InterruptConflict { state: anchor });
        }

        self.pending_interrupt = Some(PendingInterrupt {
            anchor,
            owner: self.scopes.owner(),
        });
        let role = interrupt_role.clone();
        self.trace(|| TraceEvent::InterruptArmed { anchor, role });
        tracing::trace!(anchor = %anchor, role = %interrupt_role, "interrupt armed");

        self.compile_list(handler)?;
        self.pending_interrupt = None;
        Ok(())
    }
}

fn require_non_empty(list: &[Activity], construct: &'static str) -> Result<(), BuildError> {
    if list.is_empty() {
        Err(BuildError::EmptyActivityList { construct })
    } else {
        Ok(())
    }
}

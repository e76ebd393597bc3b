// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright © 2024 RemasteredArch
//
// This file is part of smtp_maildir.
//
// smtp_maildir is free software: you can redistribute it and/or modify it under the terms of the
// GNU Affero General Public License as published by the Free Software Foundation, either version
// 3 of the License, or (at your option) any later version.
//
// smtp_maildir is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License along with
// smtp_maildir. If not, see <https://www.gnu.org/licenses/>.

//! A table-driven, byte-at-a-time parser engine.
//!
//! A grammar is a [`Definition`]: a set of states, each with optional arrival and departure
//! actions, and for each state an ordered list of transitions. Feeding a byte tries the current
//! state's transitions in the order they were declared; the first one whose [`ByteSet`] contains
//! the byte fires the departure action of the state being left, then the arrival action of the
//! state being entered. When nothing matches, the arrival action of the designated error state
//! fires and the error state is returned.
//!
//! Actions receive a caller-owned context, so the same [`Definition`] can be shared by every
//! connection while each keeps its own scratch data. Because the engine only ever looks at one
//! byte, grammars with lookback (such as the `CRLF "." CRLF` data terminator) are spelled out as
//! states and stream across any split of the input.

use std::fmt::Debug;

use thiserror::Error;

mod byte_set;

pub use byte_set::ByteSet;

/// A callback run with the parser's context and the byte being consumed.
pub type Action<C> = fn(&mut C, u8);

/// A state in a grammar.
///
/// Implemented by small `Copy` enums; [`Self::index`] must be unique per variant and dense enough
/// to index a table.
pub trait StateId: Copy + Eq + Debug + 'static {
    fn index(self) -> usize;
}

/// A [`Definition`] referenced a state it did not declare, or declared one twice.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("state {0} is used but never declared")]
    Undeclared(String),
    #[error("state {0} is declared more than once")]
    Duplicate(String),
}

/// One edge of a grammar.
#[derive(Debug, Clone, Copy)]
pub struct Transition<S> {
    pub accepts: ByteSet,
    pub to: S,
}

/// Everything the engine knows about one state.
pub struct StateSpec<S, C> {
    id: S,
    is_final: bool,
    on_arrival: Option<Action<C>>,
    on_departure: Option<Action<C>>,
    transitions: Vec<Transition<S>>,
}

impl<S: StateId, C> StateSpec<S, C> {
    #[must_use]
    pub fn new(id: S) -> Self {
        Self {
            id,
            is_final: false,
            on_arrival: None,
            on_departure: None,
            transitions: Vec::new(),
        }
    }

    /// Mark this state as accepting.
    #[must_use]
    pub fn final_state(mut self) -> Self {
        self.is_final = true;
        self
    }

    #[must_use]
    pub fn on_arrival(mut self, action: Action<C>) -> Self {
        self.on_arrival = Some(action);
        self
    }

    #[must_use]
    pub fn on_departure(mut self, action: Action<C>) -> Self {
        self.on_departure = Some(action);
        self
    }

    /// Add a transition, tried after every transition added before it.
    #[must_use]
    pub fn to(mut self, accepts: ByteSet, to: S) -> Self {
        self.transitions.push(Transition { accepts, to });
        self
    }
}

/// A complete grammar: its states, its start state, and its error state.
pub struct Definition<S, C> {
    states: Vec<Option<StateSpec<S, C>>>,
    initial: S,
    error: S,
}

impl<S: StateId, C> Definition<S, C> {
    /// Assemble a grammar from its states.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if a state is declared twice, or if `initial`, `error`, or any
    /// transition target was never declared.
    pub fn new(
        initial: S,
        error: S,
        states: impl IntoIterator<Item = StateSpec<S, C>>,
    ) -> Result<Self, DefinitionError> {
        let mut table: Vec<Option<StateSpec<S, C>>> = Vec::new();

        for state in states {
            let index = state.id.index();
            if table.len() <= index {
                table.resize_with(index + 1, || None);
            }
            if table[index].is_some() {
                return Err(DefinitionError::Duplicate(format!("{:?}", state.id)));
            }
            table[index] = Some(state);
        }

        let declared = |id: S| {
            table
                .get(id.index())
                .is_some_and(|state| state.as_ref().is_some_and(|state| state.id == id))
        };
        let targets = table
            .iter()
            .flatten()
            .flat_map(|state| state.transitions.iter().map(|t| t.to));
        if let Some(missing) = [initial, error]
            .into_iter()
            .chain(targets)
            .find(|&id| !declared(id))
        {
            return Err(DefinitionError::Undeclared(format!("{missing:?}")));
        }

        Ok(Self {
            states: table,
            initial,
            error,
        })
    }

    pub const fn initial(&self) -> S {
        self.initial
    }

    pub const fn error(&self) -> S {
        self.error
    }

    pub fn is_final(&self, state: S) -> bool {
        self.spec(state).is_final
    }

    /// Consume one byte from `current`, firing its actions against `context`.
    ///
    /// Always returns exactly one state: the first matching transition's target, or the error
    /// state.
    pub fn feed(&self, current: S, context: &mut C, byte: u8) -> S {
        let from = self.spec(current);

        if let Some(transition) = from.transitions.iter().find(|t| t.accepts.contains(byte)) {
            if let Some(depart) = from.on_departure {
                depart(context, byte);
            }
            if let Some(arrive) = self.spec(transition.to).on_arrival {
                arrive(context, byte);
            }

            return transition.to;
        }

        if let Some(arrive) = self.spec(self.error).on_arrival {
            arrive(context, byte);
        }

        self.error
    }

    fn spec(&self, state: S) -> &StateSpec<S, C> {
        // `Self::new` checked that every reachable state is in the table.
        match self.states.get(state.index()) {
            Some(Some(spec)) => spec,
            _ => unreachable!("{state:?} is not part of this definition"),
        }
    }
}

/// A cursor over a [`Definition`].
pub struct Parser<S: 'static, C: 'static> {
    definition: &'static Definition<S, C>,
    current: S,
}

impl<S: StateId, C: 'static> Parser<S, C> {
    #[must_use]
    pub const fn new(definition: &'static Definition<S, C>) -> Self {
        Self {
            definition,
            current: definition.initial,
        }
    }

    pub const fn state(&self) -> S {
        self.current
    }

    pub fn is_final(&self) -> bool {
        self.definition.is_final(self.current)
    }

    pub fn is_error(&self) -> bool {
        self.current == self.definition.error
    }

    /// Feed one byte and return the new state.
    pub fn feed(&mut self, context: &mut C, byte: u8) -> S {
        self.current = self.definition.feed(self.current, context, byte);
        self.current
    }

    /// Go back to the initial state without touching the context.
    pub fn reset(&mut self) {
        self.current = self.definition.initial;
    }
}

impl<S: Debug + 'static, C: 'static> Debug for Parser<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

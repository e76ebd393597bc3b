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

//! The protocol states of a session, and the table of which verb moves where.
//!
//! Verbs that work in (almost) every state, like `NOOP` and `RSET`, are not in the table; see
//! [`super::session::Session::handle`].

use std::fmt::Display;

use super::command::Verb;

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Clone, Copy)]
pub enum State {
    /// Waiting for `HELO` or `EHLO`.
    Greeting,
    /// Waiting for `MAIL FROM` or `XAUTH`.
    From,
    /// Waiting for the first `RCPT TO`.
    To,
    /// Waiting for `DATA` or more `RCPT TO`.
    Data,
    /// Streaming the message body.
    Body,
    /// Authenticated, waiting for `XFROM`.
    XFrom,
    /// A mailbox is selected, waiting for `XGET` (or another `XFROM`).
    XGet,
    /// The session is over.
    Done,
    /// The session failed beyond repair.
    Error,
}

impl State {
    /// Whether the administrative sub-protocol is in progress.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::XFrom | Self::XGet)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Greeting => "GREETING",
            Self::From => "FROM",
            Self::To => "TO",
            Self::Data => "DATA",
            Self::Body => "BODY",
            Self::XFrom => "XFROM",
            Self::XGet => "XGET",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        })
    }
}

/// `(from, verb, to)`: in state `from`, a successful `verb` moves to `to`. A failed one stays.
pub const TRANSITIONS: &[(State, Verb, State)] = &[
    (State::Greeting, Verb::Helo, State::From),
    (State::Greeting, Verb::Ehlo, State::From),
    (State::From, Verb::Mail, State::To),
    (State::From, Verb::XAuth, State::XFrom),
    (State::To, Verb::Rcpt, State::Data),
    (State::Data, Verb::Rcpt, State::Data),
    (State::Data, Verb::Data, State::Body),
    (State::XFrom, Verb::XFrom, State::XGet),
    (State::XGet, Verb::XGet, State::XFrom),
    (State::XGet, Verb::XFrom, State::XGet),
];

/// Where a successful `verb` leads from `state`, if it is accepted there at all.
#[must_use]
pub fn next(state: State, verb: Verb) -> Option<State> {
    TRANSITIONS
        .iter()
        .find(|&&(from, accepted, _)| from == state && accepted == verb)
        .map(|&(_, _, to)| to)
}

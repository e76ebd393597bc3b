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

//! The SMTP session state machine, free of any I/O.
//!
//! A [`Session`] takes one [`Command`] at a time and answers with a [`Response`]: the reply to
//! send, and what the connection should do next. Verbs that work regardless of state are handled
//! here; everything else goes through [`state::TRANSITIONS`] and [`commands`].

use tracing::debug;

use super::{
    command::{commands, Command, Verb},
    state::{self, State},
    CloseReason,
};
use crate::{
    delivery::{Delivered, DeliveryError},
    reply::Reply,
    request::LineError,
    shared::Shared,
    str::Mailbox,
};

/// The mail transaction in progress.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Transaction {
    pub(in crate::connection) sender: Option<Mailbox>,
    pub(in crate::connection) recipients: Vec<Mailbox>,
}

impl Transaction {
    #[must_use]
    pub const fn sender(&self) -> Option<&Mailbox> {
        self.sender.as_ref()
    }

    #[must_use]
    pub fn recipients(&self) -> &[Mailbox] {
        &self.recipients
    }

    pub fn clear(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

/// What the connection should do after sending a reply.
#[derive(PartialEq, Eq, Debug)]
pub enum Action {
    /// Keep reading commands.
    None,
    /// Start staging the message body.
    BeginBody,
    /// Close the connection once the reply is sent.
    Close(CloseReason),
}

#[derive(PartialEq, Eq, Debug)]
pub struct Response {
    pub reply: Reply,
    pub action: Action,
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Self {
            reply,
            action: Action::None,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub(in crate::connection) state: State,
    /// The name the client gave in `HELO` or `EHLO`.
    pub(in crate::connection) client: Option<String>,
    pub(in crate::connection) transaction: Transaction,
    /// The mailbox chosen with `XFROM`.
    pub(in crate::connection) selected: Option<Mailbox>,
}

impl Session {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Greeting,
            client: None,
            transaction: Transaction {
                sender: None,
                recipients: Vec::new(),
            },
            selected: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub const fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    #[must_use]
    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }

    /// The opening `220`.
    #[must_use]
    pub fn greeting(&self, shared: &Shared) -> Reply {
        Reply::greeting(&shared.config.domain)
    }

    /// React to one command.
    pub fn handle(&mut self, command: &Command, shared: &Shared) -> Response {
        let verb = command.verb();

        let reply = match verb {
            Verb::Noop => Reply::ok("2.0.0"),
            Verb::Rset => self.reset(),
            Verb::XQuit if self.state.is_admin() => {
                self.selected = None;
                self.state = State::From;
                Reply::ok("2.0.0")
            }
            Verb::Quit | Verb::XQuit => return self.quit(shared),
            Verb::NotImplemented => Reply::not_implemented(),
            Verb::Unknown => Reply::not_recognized(),
            _ => {
                let Some(next) = state::next(self.state, verb) else {
                    debug!(state = %self.state, ?verb, "out of sequence");
                    return Reply::bad_sequence().into();
                };

                match commands::dispatch(self, command, shared) {
                    Ok(reply) => {
                        self.state = next;
                        if next == State::Body {
                            return Response {
                                reply,
                                action: Action::BeginBody,
                            };
                        }
                        reply
                    }
                    Err(reply) => reply,
                }
            }
        };

        reply.into()
    }

    /// The reply to a line the command grammar rejected. The state does not change.
    #[must_use]
    pub fn line_error(&self, error: LineError) -> Reply {
        Reply::line_error(error)
    }

    /// Something went wrong in the connection itself; no further commands are accepted.
    pub fn fail(&mut self) {
        self.transaction.clear();
        self.state = State::Error;
    }

    /// The message body could not be staged after all; drop the transaction.
    pub fn staging_failed(&mut self) -> Reply {
        self.transaction.clear();
        self.state = State::From;

        Reply::local_error("Requested action aborted: local error in processing")
    }

    /// The body is complete and delivery is over, one way or another.
    ///
    /// The transaction is cleared and the session waits for a new greeting.
    pub fn body_received(&mut self, result: &Result<Delivered, DeliveryError>) -> Reply {
        self.transaction.clear();
        self.state = State::Greeting;

        match result {
            Ok(delivered) if delivered.is_partial() => Reply::new(
                250,
                format!(
                    "2.0.0 Ok: queued as {} ({} of {} recipients)",
                    delivered.name, delivered.delivered, delivered.recipients
                ),
            ),
            Ok(delivered) => Reply::new(250, format!("2.0.0 Ok: queued as {}", delivered.name)),
            Err(DeliveryError::TooLarge { .. }) => Reply::new(
                552,
                "5.3.4 Message size exceeds fixed maximum message size",
            ),
            Err(DeliveryError::NoRecipients) => Reply::local_error("Delivery failed"),
            Err(_) => Reply::local_error("Requested action aborted: local error in processing"),
        }
    }

    fn reset(&mut self) -> Reply {
        if self.state != State::Greeting {
            self.transaction.clear();
            self.selected = None;
            self.state = State::From;
        }

        Reply::ok("2.0.0")
    }

    fn quit(&mut self, shared: &Shared) -> Response {
        self.state = State::Done;

        Response {
            reply: Reply::new(
                221,
                format!("2.0.0 {} closing connection", shared.config.domain),
            ),
            action: Action::Close(CloseReason::Quit),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

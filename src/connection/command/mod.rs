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

//! Turns parsed command lines into [`Command`]s, and replies to them.
//!
//! See [`commands`] for the reply to each verb.

pub mod commands;
#[cfg(test)]
mod test;

use std::fmt::Display;

use ascii::{AsciiStr, AsciiString};

use crate::request::{LineError, RawCommand};

/// Every verb this server knows about.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Clone, Copy)]
pub enum Verb {
    Helo,
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Noop,
    Quit,
    /// Authenticate for the administrative sub-protocol.
    XAuth,
    /// Select a sender whose deliveries to list.
    XFrom,
    /// List deliveries, all of them or by day.
    XGet,
    /// Leave the administrative sub-protocol.
    XQuit,
    /// A verb from RFC 5321 or a common extension that this server does not implement.
    NotImplemented,
    Unknown,
}

/// Verbs that get [`Verb::NotImplemented`] instead of [`Verb::Unknown`].
const NOT_IMPLEMENTED: [&str; 10] = [
    "VRFY", "EXPN", "HELP", "TURN", "SEND", "SOML", "SAML", "AUTH", "STARTTLS", "BDAT",
];

impl Verb {
    /// Recognize a verb, ignoring case.
    #[must_use]
    pub fn parse(name: &AsciiStr) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "HELO" => Self::Helo,
            "EHLO" => Self::Ehlo,
            "MAIL" => Self::Mail,
            "RCPT" => Self::Rcpt,
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "QUIT" => Self::Quit,
            "XAUTH" => Self::XAuth,
            "XFROM" => Self::XFrom,
            "XGET" => Self::XGet,
            "XQUIT" => Self::XQuit,
            name if NOT_IMPLEMENTED.contains(&name) => Self::NotImplemented,
            _ => Self::Unknown,
        }
    }

    /// How the verb is used, for syntax error replies.
    #[must_use]
    pub const fn usage(self) -> &'static str {
        match self {
            Self::Helo => "HELO <domain>",
            Self::Ehlo => "EHLO <domain>",
            Self::Mail => "MAIL FROM:<address>",
            Self::Rcpt => "RCPT TO:<address>",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::XAuth => "XAUTH <secret>",
            Self::XFrom => "XFROM <mailbox>",
            Self::XGet => "XGET ALL | XGET <dd/mm/yyyy>",
            Self::XQuit => "XQUIT",
            Self::NotImplemented | Self::Unknown => "",
        }
    }
}

/// One command from the client.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Command {
    verb: Verb,
    /// The verb as sent, in uppercase.
    name: AsciiString,
    /// Everything after the verb, without surrounding whitespace.
    argument: Option<AsciiString>,
}

impl Command {
    /// Build a command directly, trimming `argument`.
    #[must_use]
    pub fn new(name: &AsciiStr, argument: Option<&AsciiStr>) -> Self {
        let mut name = name.to_ascii_string();
        name.make_ascii_uppercase();

        Self {
            verb: Verb::parse(&name),
            name,
            argument: argument
                .map(AsciiStr::trim)
                .filter(|argument| !argument.is_empty())
                .map(AsciiStr::to_ascii_string),
        }
    }

    #[must_use]
    pub const fn verb(&self) -> Verb {
        self.verb
    }

    /// The verb as sent, in uppercase.
    #[must_use]
    pub fn name(&self) -> &AsciiStr {
        &self.name
    }

    #[must_use]
    pub fn argument(&self) -> Option<&AsciiStr> {
        self.argument.as_deref()
    }
}

impl TryFrom<RawCommand> for Command {
    type Error = LineError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let ascii = |bytes: &[u8]| {
            AsciiStr::from_ascii(bytes)
                .map(AsciiStr::to_ascii_string)
                .map_err(|error| LineError::InvalidByte(bytes[error.valid_up_to()]))
        };

        let name = ascii(&raw.verb)?;
        let argument = ascii(&raw.argument)?;

        Ok(Self::new(&name, Some(&argument)))
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.argument {
            Some(argument) => write!(f, "{} {argument}", self.name),
            None => self.name.fmt(f),
        }
    }
}

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

//! SMTP replies: a three digit code and one or more lines of text.
//!
//! Multi-line replies repeat the code on every line, with a `-` after it on every line but the
//! last ([RFC 5321 section 4.2.1](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.2.1)).

use std::fmt::Display;

use crate::{
    buffer::{Buffer, BufferFull},
    str::{max_lengths, CRLF},
};

/// A reply to be queued into a connection's write buffer.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// Append another line of text.
    #[must_use]
    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.lines.push(text.into());
        self
    }

    /// Insert a line of text before the last one.
    pub fn insert_before_last(&mut self, text: impl Into<String>) {
        let index = self.lines.len().saturating_sub(1);
        self.lines.insert(index, text.into());
    }

    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The number of bytes [`Self::write_to`] would write.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.encoded_lines().map(|line| line.len()).sum()
    }

    /// Queue the whole reply into `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`BufferFull`] and queues nothing if the reply does not fit.
    pub fn write_to(&self, buffer: &mut Buffer) -> Result<(), BufferFull> {
        let encoded = self.to_string();
        buffer.push(encoded.as_bytes())
    }

    fn encoded_lines(&self) -> impl Iterator<Item = String> + '_ {
        let last = self.lines.len().saturating_sub(1);

        self.lines.iter().enumerate().map(move |(index, text)| {
            let multiline = if index == last {
                MultiLine::LastLine
            } else {
                MultiLine::HasNext
            };
            let mut line = format!("{:03}{}{text}", self.code, multiline.split());

            // Leave room for the line ending.
            let mut limit = max_lengths::REPLY_LINE - CRLF.len();
            if line.len() > limit {
                while !line.is_char_boundary(limit) {
                    limit -= 1;
                }
                line.truncate(limit);
            }
            line.push_str(CRLF);

            line
        })
    }

    /// `220 <domain> ESMTP ready`.
    #[must_use]
    pub fn greeting(domain: &str) -> Self {
        Self::new(220, format!("{domain} ESMTP ready"))
    }

    /// A `250` with an enhanced status code.
    #[must_use]
    pub fn ok(status: &str) -> Self {
        Self::new(250, format!("{status} Ok"))
    }

    /// `501` with the expected syntax.
    #[must_use]
    pub fn syntax(usage: &str) -> Self {
        Self::new(501, format!("5.5.4 Syntax: {usage}"))
    }

    /// `500` for a line the command grammar rejected.
    #[must_use]
    pub fn line_error(error: impl Display) -> Self {
        Self::new(500, format!("5.5.2 Syntax error - {error}"))
    }

    /// `502` for a verb this server has never heard of.
    ///
    /// See [`Self::not_implemented`] for verbs that are recognized, but not implemented.
    #[must_use]
    pub fn not_recognized() -> Self {
        Self::new(502, "5.5.2 Command not recognized")
    }

    /// `502` for a verb that is recognized but not implemented.
    ///
    /// [RFC 5321 section 4.2.4](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.2.4).
    #[must_use]
    pub fn not_implemented() -> Self {
        Self::new(502, "5.5.1 Command not implemented")
    }

    /// `503` for a known verb sent in the wrong state.
    #[must_use]
    pub fn bad_sequence() -> Self {
        Self::new(503, "5.5.1 Bad sequence of commands")
    }

    /// `451` for a local failure that aborted the current transaction.
    #[must_use]
    pub fn local_error(what: &str) -> Self {
        Self::new(451, format!("4.3.0 {what}"))
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.encoded_lines().try_for_each(|line| f.write_str(&line))
    }
}

/// Indicates if a reply line is the last one of its reply.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
enum MultiLine {
    /// This is the last line of the reply.
    LastLine,
    /// There will be more lines after this one.
    HasNext,
}

impl MultiLine {
    /// Get the character written between the code and the text of a reply line.
    #[must_use]
    pub const fn split(self) -> char {
        match self {
            Self::LastLine => ' ',
            Self::HasNext => '-',
        }
    }
}

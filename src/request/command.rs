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

//! Recognizes a single SMTP command line.
//!
//! ```text
//! line = *WSP verb [ 1*SP argument ] CRLF
//! ```
//!
//! Leading whitespace is skipped for the sake of Postel's Law. The argument keeps any inner and
//! trailing whitespace; trimming it is left to the command handlers, since RFC 5321 section 4.1.1
//! only asks servers to tolerate trailing whitespace.

use std::sync::LazyLock;

use thiserror::Error;

use crate::{
    buffer::Buffer,
    parser::{ByteSet, Definition, Parser, StateId, StateSpec},
    str::max_lengths,
};

/// The longest verb that will be collected. Every verb this server knows is at most five bytes.
const MAX_VERB: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LineState {
    /// Skipping leading whitespace.
    Start,
    Verb,
    /// Between the verb and the argument.
    Separator,
    Argument,
    /// Saw the `CR` of the line ending.
    Cr,
    Done,
    Error,
}

impl StateId for LineState {
    fn index(self) -> usize {
        self as usize
    }
}

/// Why a line could not be read as a command.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum LineError {
    /// The line was `CRLF` with nothing (or only whitespace) before it.
    #[error("empty command")]
    Empty,
    /// The line is longer than RFC 5321 section 4.5.3.1.4 allows.
    #[error("line too long")]
    TooLong,
    /// A byte that cannot appear at its position, such as a bare `LF` or a non-ASCII byte.
    #[error("invalid character")]
    InvalidByte(u8),
}

/// The scratch fields filled while parsing a line.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct RawCommand {
    pub verb: Vec<u8>,
    pub argument: Vec<u8>,
    /// Bytes consumed so far, line ending included.
    length: usize,
    overflow: bool,
}

fn count(scratch: &mut RawCommand, _: u8) {
    scratch.length += 1;
    if scratch.length > max_lengths::COMMAND_LINE {
        scratch.overflow = true;
    }
}

fn push_verb(scratch: &mut RawCommand, byte: u8) {
    count(scratch, byte);
    if scratch.verb.len() < MAX_VERB {
        scratch.verb.push(byte);
    } else {
        scratch.overflow = true;
    }
}

fn push_argument(scratch: &mut RawCommand, byte: u8) {
    count(scratch, byte);
    if !scratch.overflow {
        scratch.argument.push(byte);
    }
}

const SP: ByteSet = ByteSet::of(b" \t");
const CR: ByteSet = ByteSet::single(b'\r');
const LF: ByteSet = ByteSet::single(b'\n');

static GRAMMAR: LazyLock<Definition<LineState, RawCommand>> = LazyLock::new(|| {
    use LineState::{Argument, Cr, Done, Error, Separator, Start, Verb};

    Definition::new(
        Start,
        Error,
        [
            StateSpec::new(Start)
                .on_arrival(count)
                .to(SP, Start)
                .to(ByteSet::ALPHA, Verb)
                .to(CR, Cr),
            StateSpec::new(Verb)
                .on_arrival(push_verb)
                .to(ByteSet::ALPHA, Verb)
                .to(SP, Separator)
                .to(CR, Cr),
            StateSpec::new(Separator)
                .on_arrival(count)
                .to(SP, Separator)
                .to(CR, Cr)
                .to(ByteSet::PRINTABLE, Argument),
            StateSpec::new(Argument)
                .on_arrival(push_argument)
                .to(CR, Cr)
                .to(ByteSet::PRINTABLE.union(SP), Argument),
            StateSpec::new(Cr).on_arrival(count).to(LF, Done),
            StateSpec::new(Done).final_state().on_arrival(count),
            StateSpec::new(Error),
        ],
    )
    .expect("command line grammar is well formed")
});

/// Pulls command lines out of a connection's read buffer, across as many reads as it takes.
#[derive(Debug)]
pub struct LineReader {
    parser: Parser<LineState, RawCommand>,
    scratch: RawCommand,
    /// The last line was rejected before its `LF` arrived; drop bytes until it does.
    discarding: bool,
}

impl LineReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parser: Parser::new(&GRAMMAR),
            scratch: RawCommand::default(),
            discarding: false,
        }
    }

    /// Consume bytes from `buffer` until a line is complete or the buffer runs dry.
    ///
    /// Returns `None` if more bytes are needed. After `Some`, the reader is ready for the next
    /// line: a rejected line is skipped through its `LF`, even if that arrives in a later read.
    pub fn consume(&mut self, buffer: &mut Buffer) -> Option<Result<RawCommand, LineError>> {
        if self.discarding {
            if !buffer.skip_through(b'\n') {
                return None;
            }
            self.discarding = false;
        }

        while let Some(byte) = buffer.read_byte() {
            self.parser.feed(&mut self.scratch, byte);

            if self.parser.is_error() {
                return Some(Err(self.reject(LineError::InvalidByte(byte), byte == b'\n')));
            }
            if self.scratch.overflow {
                let ended = self.parser.is_final();
                return Some(Err(self.reject(LineError::TooLong, ended)));
            }
            if self.parser.is_final() {
                let line = std::mem::take(&mut self.scratch);
                self.parser.reset();

                return Some(if line.verb.is_empty() {
                    Err(LineError::Empty)
                } else {
                    Ok(line)
                });
            }
        }

        None
    }

    /// Whether part of a line has been consumed or is being skipped.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.discarding || self.scratch.length > 0
    }

    fn reject(&mut self, error: LineError, line_ended: bool) -> LineError {
        self.scratch = RawCommand::default();
        self.parser.reset();
        self.discarding = !line_ended;

        error
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

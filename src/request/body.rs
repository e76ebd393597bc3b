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

//! Recognizes a DATA body and its `CRLF "." CRLF` terminator.
//!
//! The body is assumed to start right after the `CRLF` that ended the `DATA` command, so a lone
//! `.` line at the very start ends an empty body. Dot-stuffing is undone as bytes stream through
//! (RFC 5321 section 4.5.2): a line that starts with `.` and carries anything else loses that
//! first `.`.
//!
//! The line ending before the terminating `.` belongs to the terminator and is never emitted.
//! Bytes that may turn out to be part of the terminator are held back until the next byte
//! settles it, so the output is correct however the input is split across reads.

use std::sync::LazyLock;

use crate::{
    buffer::Buffer,
    parser::{ByteSet, Definition, Parser, StateId, StateSpec},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BodyState {
    /// At the start of a line.
    LineStart,
    /// Inside a line.
    Text,
    /// Saw a `CR` inside a line.
    Cr,
    /// Saw a `.` at the start of a line.
    Dot,
    /// Saw `.` `CR` at the start of a line.
    DotCr,
    /// Saw the whole terminator.
    Done,
    Error,
}

impl StateId for BodyState {
    fn index(self) -> usize {
        self as usize
    }
}

/// Bytes emitted by the grammar's actions, and bytes held back pending the next byte.
#[derive(Default, Debug)]
struct Scratch {
    /// At most `CR LF . CR`; the `.` is implied by being in [`BodyState::Dot`] or
    /// [`BodyState::DotCr`] and is never emitted, which is the un-stuffing.
    held: Vec<u8>,
    output: Vec<u8>,
}

fn flush(scratch: &mut Scratch) {
    scratch.output.append(&mut scratch.held);
}

fn enter_text(scratch: &mut Scratch, byte: u8) {
    flush(scratch);
    scratch.output.push(byte);
}

fn enter_cr(scratch: &mut Scratch, byte: u8) {
    flush(scratch);
    scratch.held.push(byte);
}

fn enter_line_start(scratch: &mut Scratch, byte: u8) {
    scratch.held.push(byte);
}

/// `. CR` followed by anything but `LF` was not the terminator; keep the `CR`.
fn leave_dot_cr(scratch: &mut Scratch, byte: u8) {
    if byte != b'\n' {
        scratch.held.push(b'\r');
    }
}

fn enter_done(scratch: &mut Scratch, _: u8) {
    scratch.held.clear();
}

const CR: ByteSet = ByteSet::single(b'\r');
const LF: ByteSet = ByteSet::single(b'\n');
const DOT: ByteSet = ByteSet::single(b'.');

static GRAMMAR: LazyLock<Definition<BodyState, Scratch>> = LazyLock::new(|| {
    use BodyState::{Cr, Done, Dot, DotCr, Error, LineStart, Text};

    Definition::new(
        LineStart,
        Error,
        [
            StateSpec::new(LineStart)
                .on_arrival(enter_line_start)
                .to(DOT, Dot)
                .to(CR, Cr)
                .to(ByteSet::ANY, Text),
            StateSpec::new(Text)
                .on_arrival(enter_text)
                .to(CR, Cr)
                .to(ByteSet::ANY, Text),
            StateSpec::new(Cr)
                .on_arrival(enter_cr)
                .to(LF, LineStart)
                .to(CR, Cr)
                .to(ByteSet::ANY, Text),
            StateSpec::new(Dot).to(CR, DotCr).to(ByteSet::ANY, Text),
            StateSpec::new(DotCr)
                .on_departure(leave_dot_cr)
                .to(LF, Done)
                .to(CR, Cr)
                .to(ByteSet::ANY, Text),
            StateSpec::new(Done).final_state().on_arrival(enter_done),
            StateSpec::new(Error),
        ],
    )
    .expect("data body grammar is well formed")
});

/// Streams a DATA body out of a connection's read buffer.
#[derive(Debug)]
pub struct BodyReader {
    parser: Parser<BodyState, Scratch>,
    scratch: Scratch,
}

impl BodyReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parser: Parser::new(&GRAMMAR),
            scratch: Scratch::default(),
        }
    }

    /// Consume bytes from `buffer`, appending un-stuffed body content to `output`.
    ///
    /// Stops right after the terminator, leaving any pipelined bytes behind it in `buffer`.
    /// Returns `true` once the terminator has been consumed.
    pub fn consume(&mut self, buffer: &mut Buffer, output: &mut Vec<u8>) -> bool {
        while !self.is_done() {
            let Some(byte) = buffer.read_byte() else {
                break;
            };
            self.parser.feed(&mut self.scratch, byte);
        }

        output.append(&mut self.scratch.output);

        self.is_done()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.parser.is_final()
    }
}

impl Default for BodyReader {
    fn default() -> Self {
        Self::new()
    }
}

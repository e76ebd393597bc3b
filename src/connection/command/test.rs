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

//! Tests for [`super`].

use ascii::AsAsciiStr;

use super::*;
use crate::{buffer::Buffer, request::LineReader, str::max_lengths};

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// Parse one complete line the way a connection does.
fn parse(line: &[u8]) -> std::result::Result<Command, LineError> {
    let mut buffer = Buffer::with_capacity(max_lengths::COMMAND_LINE * 2);
    buffer.push(line).expect("test line fits");

    LineReader::new()
        .consume(&mut buffer)
        .expect("test line is complete")
        .and_then(Command::try_from)
}

#[test]
fn test_verbs_ignore_case() -> Result {
    assert_eq!(Verb::parse("helo".as_ascii_str()?), Verb::Helo);
    assert_eq!(Verb::parse("MaIl".as_ascii_str()?), Verb::Mail);
    assert_eq!(Verb::parse("xget".as_ascii_str()?), Verb::XGet);
    assert_eq!(Verb::parse("vrfy".as_ascii_str()?), Verb::NotImplemented);
    assert_eq!(Verb::parse("STARTTLS".as_ascii_str()?), Verb::NotImplemented);
    assert_eq!(Verb::parse("FOO".as_ascii_str()?), Verb::Unknown);
    assert_eq!(Verb::parse("HELOX".as_ascii_str()?), Verb::Unknown);

    Ok(())
}

#[test]
fn test_command_from_line() -> Result {
    let command = parse(b"  mail FROM:<a@b.example>   \r\n")?;

    assert_eq!(command.verb(), Verb::Mail);
    assert_eq!(command.name(), "MAIL".as_ascii_str()?);
    assert_eq!(command.argument(), Some("FROM:<a@b.example>".as_ascii_str()?));
    assert_eq!(command.to_string(), "MAIL FROM:<a@b.example>");

    let command = parse(b"quit\r\n")?;
    assert_eq!(command.verb(), Verb::Quit);
    assert_eq!(command.argument(), None);
    assert_eq!(command.to_string(), "QUIT");

    Ok(())
}

#[test]
fn test_command_rejects_bad_lines() {
    assert_eq!(parse(b"\r\n"), Err(LineError::Empty));
    assert_eq!(parse(b"HELO x\n"), Err(LineError::InvalidByte(b'\n')));

    let mut long = b"HELO ".to_vec();
    long.resize(max_lengths::COMMAND_LINE + 10, b'a');
    long.extend_from_slice(b"\r\n");
    assert_eq!(parse(&long), Err(LineError::TooLong));
}

#[test]
fn test_blank_argument_is_none() -> Result {
    let command = Command::new("noop".as_ascii_str()?, Some("   ".as_ascii_str()?));

    assert_eq!(command.name(), "NOOP".as_ascii_str()?);
    assert_eq!(command.argument(), None);

    Ok(())
}

fn records(count: usize) -> Vec<String> {
    (0..count)
        .map(|index| format!("2024-02-01T10:00:{index:02}Z a@b.example c@d.example 42 mail/d/c"))
        .collect()
}

#[test]
fn test_listing_fits() {
    let reply = commands::listing(records(3), 4096);

    assert_eq!(reply.code(), 250);
    assert_eq!(reply.lines().len(), 4);
    assert_eq!(reply.lines()[3], "2.0.0 3 message(s)");
    assert!(reply.lines()[0].starts_with("2024-02-01T10:00:00Z"));

    let reply = commands::listing(Vec::new(), 4096);
    assert_eq!(reply.lines(), ["2.0.0 0 message(s)"]);
}

#[test]
fn test_listing_is_truncated_to_the_limit() {
    let limit = 400;
    let reply = commands::listing(records(20), limit);

    assert!(reply.encoded_len() <= limit);

    let shown = reply.lines().len() - 1;
    assert!(shown > 0 && shown < 20);
    assert_eq!(
        reply.lines()[shown],
        format!("2.0.0 {shown} of 20 message(s) listed, the rest did not fit")
    );
}

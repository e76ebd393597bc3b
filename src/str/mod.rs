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

//! Strings with SMTP-specific rules.
//!
//! [RFC 5321](https://www.rfc-editor.org/rfc/rfc5321.html) requires US-ASCII (sections 2.3.1 and
//! 2.4) and `CRLF` line endings (section 2.3.8). Everything here is built on [`AsciiString`], and
//! the command line grammar only ever hands out printable ASCII, so conversion is checked once at
//! the edge.

use std::fmt::Display;

use ascii::{AsciiChar, AsciiStr, AsciiString};
use thiserror::Error;

pub mod max_lengths;
#[cfg(test)]
mod test;

pub const CRLF: &str = "\r\n";

/// Why a string is not an acceptable mailbox.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum MailboxError {
    #[error("address must be enclosed in angle brackets")]
    MissingBrackets,
    #[error("address has no `@`")]
    MissingAt,
    #[error("address has an empty local part or domain")]
    Empty,
    #[error("local part is longer than {} bytes", max_lengths::LOCAL_PART)]
    LocalPartTooLong,
    #[error("domain is longer than {} bytes", max_lengths::DOMAIN)]
    DomainTooLong,
    #[error("path is longer than {} bytes", max_lengths::PATH)]
    PathTooLong,
    /// Would be unsafe as a maildir directory name.
    #[error("address contains a character or name that is not allowed")]
    Forbidden,
}

/// A validated `local@domain` address.
///
/// Both halves become directory names under the mail root, so they may not be `.` or `..` and may
/// not contain path separators. The domain is stored in lowercase, as domains are
/// case-insensitive while the local part is not (RFC 5321 section 2.4).
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Clone)]
pub struct Mailbox {
    address: AsciiString,
    /// The index of the `@` separating the local part from the domain.
    at: usize,
}

impl Mailbox {
    /// Parse a path argument of the form `<local@domain>`, as taken by `MAIL FROM:` and
    /// `RCPT TO:`.
    ///
    /// # Errors
    ///
    /// Returns [`MailboxError::MissingBrackets`] unless `path` starts with `<` and ends with `>`,
    /// and otherwise the same errors as [`Self::parse`].
    pub fn parse_path(path: &AsciiStr) -> Result<Self, MailboxError> {
        if path.len() > max_lengths::PATH {
            return Err(MailboxError::PathTooLong);
        }

        match path.as_slice() {
            [AsciiChar::LessThan, inner @ .., AsciiChar::GreaterThan] => Self::parse(inner.into()),
            _ => Err(MailboxError::MissingBrackets),
        }
    }

    /// Parse a bare `local@domain` address.
    ///
    /// # Errors
    ///
    /// Returns [`MailboxError`] if the address has no `@`, either half is empty, too long, or
    /// unsafe as a directory name.
    pub fn parse(address: &AsciiStr) -> Result<Self, MailboxError> {
        let at = address
            .as_str()
            .rfind('@')
            .ok_or(MailboxError::MissingAt)?;
        let (local, domain) = (&address[..at], &address[at + 1..]);

        if local.is_empty() || domain.is_empty() {
            return Err(MailboxError::Empty);
        }
        if local.len() > max_lengths::LOCAL_PART {
            return Err(MailboxError::LocalPartTooLong);
        }
        if domain.len() > max_lengths::DOMAIN {
            return Err(MailboxError::DomainTooLong);
        }
        if !is_safe_name(local) || !is_safe_name(domain) {
            return Err(MailboxError::Forbidden);
        }

        let mut address = address.to_ascii_string();
        address[at + 1..].make_ascii_lowercase();

        Ok(Self { address, at })
    }

    /// The part before the `@`.
    #[must_use]
    pub fn local_part(&self) -> &AsciiStr {
        &self.address[..self.at]
    }

    /// The part after the `@`, in lowercase.
    #[must_use]
    pub fn domain(&self) -> &AsciiStr {
        &self.address[self.at + 1..]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.address.as_str()
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.address.fmt(f)
    }
}

/// Whether `name` can be used as a single path component.
fn is_safe_name(name: &AsciiStr) -> bool {
    let forbidden = |ch: &AsciiChar| {
        matches!(
            ch,
            AsciiChar::Slash
                | AsciiChar::BackSlash
                | AsciiChar::Null
                | AsciiChar::LessThan
                | AsciiChar::GreaterThan
        ) || ch.is_ascii_whitespace()
            || ch.is_ascii_control()
    };

    name != "." && name != ".." && !name.chars().any(|ch| forbidden(&ch))
}

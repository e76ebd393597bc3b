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

//! Size limits, in bytes, that every SMTP implementation must be able to handle.
//!
//! This server enforces them as upper bounds. Per
//! [RFC 5321 section 4.5.3.1](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.1).

/// The local part of an address, such as `smith` in `smith@example.com`.
pub const LOCAL_PART: usize = 64;

/// A domain name or address literal.
pub const DOMAIN: usize = 255;

/// A reverse-path or forward-path, angle brackets included.
pub const PATH: usize = 256;

/// A command line, verb and `CRLF` included.
pub const COMMAND_LINE: usize = 512;

/// A reply line, code and `CRLF` included.
pub const REPLY_LINE: usize = 512;

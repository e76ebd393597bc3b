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

//! Concrete grammars built on [`crate::parser`].
//!
//! - [`command`]: one SMTP command line, `VERB[ SP ARG] CRLF`.
//! - [`body`]: the DATA body up to `CRLF "." CRLF`, un-stuffing leading dots on the way.
//! - [`date`]: the `dd/mm/yyyy` argument of the administrative `XGET` command.

pub mod body;
pub mod command;
pub mod date;

pub use body::BodyReader;
pub use command::{LineError, LineReader, RawCommand};
pub use date::parse_date;

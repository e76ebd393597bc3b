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

//! How long the server waits on an idle client, and how often the reactor wakes up on its own.
//!
//! [RFC 5321 4.5.3.2](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2) defines its
//! timeouts in minutes. Only the ones a server waits on are kept here.
//!
//! Note that, when testing, all RFC timeouts are overridden to [`EXPECTED`]; because a testing
//! environment can be expected to have better performance than the real world.

use std::time::Duration;

/// A very strict timeout for how long participants should wait for anything.
///
/// Not specified by RFC 5321. This is for identifying unusual performance for testing and logging.
pub const EXPECTED: Duration = Duration::from_secs(3);

/// The longest the reactor blocks without any readiness before running housekeeping, such as the
/// idle connection sweep.
pub const SELECT: Duration = Duration::from_secs(10);

/// Generate `const` items with [`Duration`] values in minutes, optionally including documentation
/// comments.
///
/// Does not account for leap seconds or similar shenanigans. A "minute" is 60 of whatever
/// [`Duration`] considers to be a "second."
macro_rules! minute_durations {
        [$(
            $( #[$attr:meta] )*
            $label:ident = $minutes:expr
        ),+ ,] => {
            $(
                $( #[$attr] )*
                #[cfg(not(test))]
                pub const $label: ::std::time::Duration =
                    ::std::time::Duration::from_secs($minutes * 60);

                // For stricter performance checks during testing.
                $( #[$attr] )*
                #[cfg(test)]
                pub const $label: ::std::time::Duration =
                    $crate::timeouts::EXPECTED;
            )+
        };
    }

minute_durations![
    /// How long to wait for the next chunk of a DATA body before giving up on the client.
    ///
    /// [RFC 5321 § 4.5.3.2.5](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.5).
    DATA_BLOCK = 3,
    /// How long to wait for a message to be processed after its terminating `.`, which here
    /// covers the transform program.
    ///
    /// [RFC 5321 § 4.5.3.2.6](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.6).
    DATA_TERMINATION = 10,
    /// How long to wait for the next command before giving up on the client.
    ///
    /// [RFC 5321 § 4.5.3.2.7](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.2.7).
    SERVER_TIMEOUT = 5,
];

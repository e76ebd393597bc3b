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

//! A non-blocking SMTP server that files every accepted message into a maildir tree.
//!
//! Everything runs on one thread: a [`selector`] multiplexes the SMTP listeners, client
//! connections, the UDP monitor, and the pipes of an optional transform program. See [`Server`]
//! for how to start one.

#![warn(clippy::nursery, clippy::pedantic)]
#![cfg_attr(debug_assertions, allow(clippy::missing_errors_doc))]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod monitor;
pub mod parser;
pub mod registry;
pub mod reply;
pub mod request;
pub mod selector;
pub mod server;
pub mod shared;
pub mod str;
pub mod timeouts;

#[cfg(test)]
mod test;

pub use config::Config;
pub use error::Error;
pub use server::Server;

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

//! Errors that stop the whole server.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::selector::SelectorError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("no address could be bound")]
    NothingBound,
    #[error("reactor failure: {0}")]
    Selector(#[from] SelectorError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The process exit status this error maps to: `2` for reactor-layer failures, `1` for
    /// everything else.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Selector(_) => 2,
            Self::Bind { .. } | Self::NothingBound | Self::Io(_) => 1,
        }
    }
}

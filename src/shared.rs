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

//! State shared by every handler on the reactor.
//!
//! The reactor runs one handler at a time on one thread, so this is passed around as a plain
//! `&mut` instead of being locked or counted atomically.

use std::process::Child;

use tracing::{debug, warn};

use crate::{
    config::Config, delivery::transform::TransformSwitch, monitor::Counters,
    registry::AccessRegistry,
};

#[derive(Debug)]
pub struct Shared {
    pub config: Config,
    pub counters: Counters,
    pub registry: AccessRegistry,
    pub transform: TransformSwitch,
    /// Transform processes that have been abandoned or have not exited yet.
    zombies: Vec<Child>,
}

impl Shared {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            transform: TransformSwitch::new(config.transform.clone()),
            config,
            counters: Counters::default(),
            registry: AccessRegistry::new(),
            zombies: Vec::new(),
        }
    }

    /// Wait for `child` on a later [`Self::reap`], without blocking now.
    pub fn reap_later(&mut self, child: Child) {
        self.zombies.push(child);
    }

    /// Collect every child that has exited since the last call.
    pub fn reap(&mut self) {
        self.zombies.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), %status, "reaped transform process");
                false
            }
            Ok(None) => true,
            Err(error) => {
                warn!(pid = child.id(), %error, "could not wait for transform process");
                false
            }
        });
    }

    /// How many children are still waiting to be reaped.
    #[must_use]
    pub fn unreaped(&self) -> usize {
        self.zombies.len()
    }
}

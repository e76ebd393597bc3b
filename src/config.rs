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

//! Everything a [`crate::Server`] can be told at start-up.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    path::PathBuf,
    time::Duration,
};

use crate::{monitor::wire::DEFAULT_TOKEN, timeouts};

pub const DEFAULT_PORT: u16 = 2525;
pub const DEFAULT_MONITOR_PORT: u16 = 2526;

#[derive(Clone, Debug)]
pub struct Config {
    /// The SMTP port. `0` picks an ephemeral port.
    pub port: u16,
    /// The UDP monitor port. `0` picks an ephemeral port.
    pub monitor_port: u16,
    /// Addresses to listen on, for both SMTP and the monitor.
    pub bind: Vec<IpAddr>,
    /// The root of the maildir tree.
    pub mail_dir: PathBuf,
    /// A filter program every message is piped through before delivery.
    pub transform: Option<PathBuf>,
    /// The name this server gives itself in replies.
    pub domain: String,
    /// The secret `XAUTH` expects. Without one, `XAUTH` always fails.
    pub admin_secret: Option<String>,
    pub monitor_token: u64,
    /// The most file descriptors the reactor will watch, listeners and pipes included.
    pub max_connections: usize,
    pub max_recipients: usize,
    /// The largest DATA body accepted, in bytes, after dot-unstuffing.
    pub max_message_size: usize,
    /// The capacity of each connection's read and write buffers.
    pub buffer_size: usize,
    /// How long the reactor waits for readiness before running housekeeping.
    pub select_timeout: Duration,
    /// How long a client may stay silent before it is disconnected.
    pub idle_timeout: Duration,
    /// How long the transform program may take to finish a message before it is killed.
    pub filter_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            monitor_port: DEFAULT_MONITOR_PORT,
            bind: vec![
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            ],
            mail_dir: PathBuf::from("mail"),
            transform: None,
            domain: "localhost".to_owned(),
            admin_secret: None,
            monitor_token: DEFAULT_TOKEN,
            max_connections: 1024,
            max_recipients: 100,
            max_message_size: 10 * 1024 * 1024,
            buffer_size: 16 * 1024,
            select_timeout: timeouts::SELECT,
            idle_timeout: timeouts::SERVER_TIMEOUT,
            filter_timeout: timeouts::DATA_TERMINATION,
        }
    }
}

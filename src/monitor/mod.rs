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

//! The UDP monitor: live counters and the transform switch, over a fixed binary wire format.
//!
//! Every datagram is handled on its own; nothing is remembered between requests.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    os::fd::{AsRawFd, RawFd},
};

use tracing::{debug, warn};

use crate::{
    selector::{Control, Flow, Handler},
    shared::Shared,
};
use wire::{Command, Payload, Rejection, Response, Status, MESSAGE_LEN};

pub mod wire;

/// Process-wide connection and traffic counters.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct Counters {
    total_connections: u64,
    current_connections: u64,
    sent_bytes: u64,
}

impl Counters {
    pub fn connection_opened(&mut self) {
        self.total_connections += 1;
        self.current_connections += 1;
    }

    pub fn connection_closed(&mut self) {
        self.current_connections = self.current_connections.saturating_sub(1);
    }

    pub fn add_sent_bytes(&mut self, count: usize) {
        self.sent_bytes += count as u64;
    }

    /// Connections accepted since start-up.
    #[must_use]
    pub const fn total_connections(&self) -> u64 {
        self.total_connections
    }

    #[must_use]
    pub const fn current_connections(&self) -> u64 {
        self.current_connections
    }

    #[must_use]
    pub const fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }
}

fn count(value: u64) -> Payload {
    Payload::Count(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Carry out a validated command.
pub fn execute(command: Command, shared: &mut Shared) -> (Status, Payload) {
    let counters = &shared.counters;

    match command {
        Command::HistoricalConnections => (Status::Success, count(counters.total_connections())),
        Command::CurrentConnections => (Status::Success, count(counters.current_connections())),
        Command::SentBytes => (Status::Success, Payload::Bytes(counters.sent_bytes())),
        Command::TransformStatus => (
            Status::Success,
            Payload::Flag(shared.transform.is_enabled()),
        ),
        Command::TransformOn => {
            if shared.transform.enable() {
                (Status::Success, Payload::Flag(true))
            } else {
                (Status::Unexpected, Payload::Flag(false))
            }
        }
        Command::TransformOff => {
            shared.transform.disable();
            (Status::Success, Payload::Flag(false))
        }
    }
}

/// Answer one datagram, or `None` if it should be dropped silently.
pub fn answer(datagram: &[u8], shared: &mut Shared) -> Option<Response> {
    match wire::parse_request(datagram, shared.config.monitor_token) {
        Ok(request) => {
            let (status, payload) = execute(request.command, shared);
            Some(Response::new(request.request_id, status, payload))
        }
        Err(Rejection::Reply(response)) => Some(response),
        Err(Rejection::Drop) => None,
    }
}

/// The most datagrams answered in one dispatch.
const DATAGRAMS_PER_DISPATCH: usize = 64;

/// The monitor's UDP socket, registered with the selector for reading.
#[derive(Debug)]
pub struct MonitorService {
    socket: UdpSocket,
}

impl MonitorService {
    /// Wrap an already bound socket.
    ///
    /// # Errors
    ///
    /// Returns any error from making the socket non-blocking.
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;

        Ok(Self { socket })
    }

    /// # Errors
    ///
    /// See [`UdpSocket::local_addr`].
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl AsRawFd for MonitorService {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Handler<Shared> for MonitorService {
    fn on_readable(&mut self, ctl: &mut Control<'_, Shared>) -> io::Result<Flow> {
        // Room for more than one message, so oversized datagrams are seen as oversized.
        let mut datagram = [0; MESSAGE_LEN * 4];

        for _ in 0..DATAGRAMS_PER_DISPATCH {
            let (length, peer) = match self.socket.recv_from(&mut datagram) {
                Ok(received) => received,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Drained),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(%error, "monitor receive failed");
                    return Ok(Flow::Drained);
                }
            };

            let Some(response) = answer(&datagram[..length], ctl.state()) else {
                debug!(%peer, length, "dropped monitor datagram");
                continue;
            };
            if response.status == Status::AuthFailed {
                warn!(%peer, "monitor request with a bad token");
            } else {
                debug!(%peer, status = ?response.status, "monitor request");
            }

            // Best effort: UDP replies may be lost anyway.
            if let Err(error) = self.socket.send_to(&response.encode(), peer) {
                debug!(%peer, %error, "monitor reply failed");
            }
        }

        // Let the other handlers run; the socket is still readable.
        Ok(Flow::Continue)
    }
}

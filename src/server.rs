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

//! Binding the listeners, and running the reactor until shutdown.

use std::{
    future::Future,
    io::{self, Write},
    net::{IpAddr, SocketAddr, TcpListener, TcpStream, UdpSocket},
    os::fd::{AsRawFd, RawFd},
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::{
    config::Config,
    connection::Connection,
    error::Error,
    monitor::MonitorService,
    reply::Reply,
    selector::{Control, Flow, Handler, Interest, Selector},
    shared::Shared,
};

/// Pending connections the kernel queues per listener.
const BACKLOG: i32 = 20;

/// Accepts SMTP clients and registers a [`Connection`] for each.
struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    fn admit(stream: TcpStream, peer: SocketAddr, ctl: &mut Control<'_, Shared>) {
        if let Err(error) = stream.set_nonblocking(true) {
            warn!(%peer, %error, "could not make connection non-blocking");
            return;
        }
        if let Err(error) = stream.set_nodelay(true) {
            debug!(%peer, %error, "could not disable Nagle's algorithm");
        }

        if !ctl.has_capacity() {
            warn!(%peer, "refusing connection, too many open");
            let reply = Reply::new(421, "4.3.2 Too many connections").to_string();
            // Best effort; the socket is fresh, so this fits in its send buffer.
            let _ = (&stream).write_all(reply.as_bytes());
            return;
        }

        let connection = Connection::new(stream, peer, ctl.state());
        match ctl.register(Box::new(connection), Interest::Write) {
            Ok(token) => {
                ctl.state().counters.connection_opened();
                info!(%peer, %token, "connection opened");
            }
            Err(error) => warn!(%peer, %error, "could not register connection"),
        }
    }
}

impl AsRawFd for Acceptor {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Handler<Shared> for Acceptor {
    fn on_readable(&mut self, ctl: &mut Control<'_, Shared>) -> io::Result<Flow> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => Self::admit(stream, peer, ctl),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Drained),
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!(%error, "accept interrupted");
                }
                Err(error) => {
                    // Out of descriptors, most likely. Wait for the next connection attempt.
                    warn!(%error, "could not accept connection");
                    return Ok(Flow::Drained);
                }
            }
        }
    }
}

fn socket_for(addr: SocketAddr, kind: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), kind, Some(protocol))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.bind(&SockAddr::from(addr))?;
    socket.set_nonblocking(true)?;

    Ok(socket)
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket_for(addr, Type::STREAM, Protocol::TCP)?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

fn monitor_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    Ok(socket_for(addr, Type::DGRAM, Protocol::UDP)?.into())
}

/// The SMTP listeners and UDP monitors for every bound address, ready to run.
#[derive(Debug)]
pub struct Server {
    shared: Shared,
    listeners: Vec<TcpListener>,
    monitors: Vec<UdpSocket>,
}

impl Server {
    /// Bind the SMTP and monitor ports on every configured address.
    ///
    /// An IPv6 address that cannot be bound only logs a warning, as long as some other address
    /// could be bound; hosts without IPv6 are common.
    ///
    /// # Errors
    ///
    /// - [`Error::Bind`] if an IPv4 address cannot be bound, or if nothing could be bound at all.
    /// - [`Error::NothingBound`] if no addresses are configured.
    pub fn bind(config: Config) -> Result<Self, Error> {
        let mut listeners = Vec::new();
        let mut monitors = Vec::new();
        let mut skipped = None;

        for &ip in &config.bind {
            match Self::bind_pair(ip, &config) {
                Ok((listener, monitor)) => {
                    listeners.push(listener);
                    monitors.push(monitor);
                }
                Err(error @ Error::Bind { .. }) if ip.is_ipv6() => skipped = Some(error),
                Err(error) => return Err(error),
            }
        }

        match skipped {
            Some(error) if listeners.is_empty() => return Err(error),
            Some(error) => warn!(%error, "skipping address"),
            None if listeners.is_empty() => return Err(Error::NothingBound),
            None => {}
        }

        Ok(Self {
            shared: Shared::new(config),
            listeners,
            monitors,
        })
    }

    fn bind_pair(ip: IpAddr, config: &Config) -> Result<(TcpListener, UdpSocket), Error> {
        let addr = SocketAddr::new(ip, config.port);
        let listener = listen(addr).map_err(|source| Error::Bind { addr, source })?;

        let addr = SocketAddr::new(ip, config.monitor_port);
        let monitor = monitor_socket(addr).map_err(|source| Error::Bind { addr, source })?;

        Ok((listener, monitor))
    }

    /// The address of the first SMTP listener.
    ///
    /// # Errors
    ///
    /// Any error from `getsockname`.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listeners
            .first()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?
            .local_addr()
    }

    /// The address of the first monitor socket.
    ///
    /// # Errors
    ///
    /// Any error from `getsockname`.
    pub fn monitor_addr(&self) -> io::Result<SocketAddr> {
        self.monitors
            .first()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?
            .local_addr()
    }

    /// Serve until `shutdown` completes, then close every connection.
    ///
    /// Must be called from within a Tokio runtime. Every handler runs on the calling task.
    ///
    /// # Errors
    ///
    /// - [`Error::Selector`] if registering the listeners fails, or the reactor itself fails.
    /// - [`Error::Io`] if a monitor socket cannot be set up.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let Self {
            mut shared,
            listeners,
            monitors,
        } = self;
        let mut selector = Selector::new(
            shared.config.max_connections,
            shared.config.select_timeout,
        );

        for listener in listeners {
            let addr = listener.local_addr()?;
            selector.register(Box::new(Acceptor { listener }), Interest::Read)?;
            info!(%addr, "listening for SMTP");
        }
        for socket in monitors {
            let service = MonitorService::new(socket)?;
            let addr = service.local_addr()?;
            selector.register(Box::new(service), Interest::Read)?;
            info!(%addr, "listening for monitor requests");
        }

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("shutting down");
                    break Ok(());
                }
                wakeup = selector.run_once(&mut shared) => match wakeup {
                    Ok(wakeup) => trace!(?wakeup, "reactor woke up"),
                    Err(error) => break Err(Error::from(error)),
                },
            }

            shared.reap();
        };

        selector.close_all(&mut shared);
        shared.reap();
        if shared.unreaped() > 0 {
            debug!(count = shared.unreaped(), "transform processes still running at exit");
        }

        result
    }
}

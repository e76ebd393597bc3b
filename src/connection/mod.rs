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

//! Handles TCP connections as SMTP sessions.
//!
//! A [`Connection`] is a [`Handler`] on the reactor. It reads into a fixed buffer, pulls complete
//! command lines (or body bytes) out of it, and queues one reply at a time into its write buffer.
//! Nothing is read from the buffer while a reply is waiting to be flushed, which keeps pipelined
//! clients answered in order.

pub mod command;
pub mod session;
pub mod state;
#[cfg(test)]
mod test;

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    buffer::Buffer,
    delivery::{Delivered, DeliveryError, Staging},
    reply::Reply,
    request::{BodyReader, LineReader},
    selector::{Control, Flow, Handler, Interest},
    shared::Shared,
    timeouts,
};
use command::Command;
use session::{Action, Session};

/// Indicates why a TCP connection should be closed.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum CloseReason {
    /// The SMTP client requested to quit the session.
    Quit,
    /// The client stayed silent for longer than the idle timeout.
    TimedOut,
    /// The TCP connection was ended by the client.
    ClosedByClient,
    /// An error occurred in the implementation.
    Error,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum Phase {
    /// Reading commands, or a message body.
    Reading,
    /// The body is complete; waiting for the transform to finish.
    Filtering,
    /// Flushing the last reply before closing.
    Closing(CloseReason),
}

/// A DATA body being received.
#[derive(Debug)]
struct Body {
    reader: BodyReader,
    /// Un-stuffed bytes on their way to the staged file.
    chunk: Vec<u8>,
    /// `None` once staging has failed, while the rest of the body is discarded.
    staging: Option<Staging>,
    failure: Option<DeliveryError>,
}

impl Body {
    fn new(staging: Staging) -> Self {
        Self {
            reader: BodyReader::new(),
            chunk: Vec::new(),
            staging: Some(staging),
            failure: None,
        }
    }

    fn is_backlogged(&self) -> bool {
        self.staging.as_ref().is_some_and(Staging::is_backlogged)
    }
}

/// One client.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    session: Session,
    input: Buffer,
    output: Buffer,
    lines: LineReader,
    body: Option<Body>,
    phase: Phase,
    idle_timeout: Duration,
    filter_timeout: Duration,
}

impl Connection {
    /// Wrap a non-blocking stream, queueing the greeting.
    #[must_use]
    pub fn new(stream: TcpStream, peer: SocketAddr, shared: &Shared) -> Self {
        let size = shared.config.buffer_size;
        let mut connection = Self {
            stream,
            peer,
            session: Session::new(),
            input: Buffer::with_capacity(size),
            output: Buffer::with_capacity(size),
            lines: LineReader::new(),
            body: None,
            phase: Phase::Reading,
            idle_timeout: shared.config.idle_timeout,
            filter_timeout: shared.config.filter_timeout,
        };
        let greeting = connection.session.greeting(shared);
        connection.queue(&greeting);

        connection
    }

    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a reply, giving up on the connection if it does not fit.
    fn queue(&mut self, reply: &Reply) {
        debug!(peer = %self.peer, code = reply.code(), "reply");

        if let Err(error) = reply.write_to(&mut self.output) {
            warn!(peer = %self.peer, %error, "reply does not fit the write buffer");
            self.session.fail();
            self.phase = Phase::Closing(CloseReason::Error);
        }
    }

    /// Handle buffered input until a reply is queued or more input is needed.
    fn process(&mut self, ctl: &mut Control<'_, Shared>) {
        while self.output.is_empty() {
            let progressed = match self.phase {
                Phase::Closing(_) => break,
                Phase::Filtering => self.poll_delivery(ctl),
                Phase::Reading if self.body.is_some() => self.read_body(ctl),
                Phase::Reading => self.read_command(ctl),
            };

            if !progressed {
                break;
            }
        }
    }

    fn read_command(&mut self, ctl: &mut Control<'_, Shared>) -> bool {
        let Some(line) = self.lines.consume(&mut self.input) else {
            return false;
        };

        let command = match line.and_then(Command::try_from) {
            Ok(command) => command,
            Err(error) => {
                debug!(peer = %self.peer, %error, "bad command line");
                let reply = self.session.line_error(error);
                self.queue(&reply);
                return true;
            }
        };
        debug!(peer = %self.peer, state = %self.session.state(), %command, "command");

        let response = self.session.handle(&command, ctl.state());
        match response.action {
            Action::None => self.queue(&response.reply),
            Action::BeginBody => self.begin_body(&response.reply, ctl),
            Action::Close(reason) => {
                self.queue(&response.reply);
                self.phase = Phase::Closing(reason);
            }
        }

        true
    }

    /// Start staging, then send `go_ahead` (the `354`), or a `451` if staging failed.
    fn begin_body(&mut self, go_ahead: &Reply, ctl: &mut Control<'_, Shared>) {
        let transaction = self.session.transaction();
        let staging = match transaction.sender() {
            Some(sender) => Staging::begin(ctl, sender, transaction.recipients()),
            None => Err(io::Error::other("transaction has no sender").into()),
        };

        match staging {
            Ok(staging) => {
                self.body = Some(Body::new(staging));
                self.queue(go_ahead);
            }
            Err(error) => {
                warn!(peer = %self.peer, %error, "could not stage message");
                let reply = self.session.staging_failed();
                self.queue(&reply);
            }
        }
    }

    fn read_body(&mut self, ctl: &mut Control<'_, Shared>) -> bool {
        let Some(body) = &mut self.body else {
            return false;
        };
        if body.is_backlogged() {
            return false;
        }

        let done = body.reader.consume(&mut self.input, &mut body.chunk);

        if !body.chunk.is_empty() {
            if let Some(staging) = &mut body.staging {
                if let Err(error) = staging.write(&body.chunk, ctl) {
                    warn!(peer = %self.peer, %error, "could not write message body");
                    body.failure = Some(error);
                    if let Some(staging) = body.staging.take() {
                        staging.abort(ctl);
                    }
                }
            }
            body.chunk.clear();
        }

        if !done {
            return false;
        }

        let finished = match (body.failure.take(), &mut body.staging) {
            (Some(error), _) => Err(error),
            (None, Some(staging)) => staging.finish(ctl),
            (None, None) => Err(io::Error::other("message body was not staged").into()),
        };

        match finished {
            Ok(()) => self.phase = Phase::Filtering,
            Err(error) => {
                if let Some(staging) = body.staging.take() {
                    staging.abort(ctl);
                }
                self.complete_body(&Err(error));
            }
        }

        true
    }

    /// Deliver once staging is complete.
    fn poll_delivery(&mut self, ctl: &mut Control<'_, Shared>) -> bool {
        let outcome = match self.body.as_mut().and_then(|body| body.staging.as_mut()) {
            Some(staging) => staging.take_outcome(),
            None => Some(Err(io::Error::other("message body was not staged").into())),
        };
        let Some(outcome) = outcome else {
            return false;
        };

        let staging = self.body.take().and_then(|body| body.staging);
        let result = match (outcome, staging) {
            (Ok(()), Some(staging)) => staging.deliver(ctl),
            (Ok(()), None) => Err(io::Error::other("message body was not staged").into()),
            (Err(error), staging) => {
                if let Some(staging) = staging {
                    staging.abort(ctl);
                }
                Err(error)
            }
        };

        self.complete_body(&result);

        true
    }

    fn complete_body(&mut self, result: &Result<Delivered, DeliveryError>) {
        match result {
            Ok(delivered) => debug!(peer = %self.peer, ?delivered, "message accepted"),
            Err(error) => warn!(peer = %self.peer, %error, "message rejected"),
        }

        self.body = None;
        self.phase = Phase::Reading;
        let reply = self.session.body_received(result);
        self.queue(&reply);
    }

    /// Ask for whatever the connection is waiting on.
    fn sync_interest(&self, ctl: &mut Control<'_, Shared>) {
        let interest = match self.phase {
            Phase::Closing(_) => Interest::Write,
            _ if !self.output.is_empty() => Interest::Write,
            Phase::Filtering => Interest::None,
            Phase::Reading if self.body.as_ref().is_some_and(Body::is_backlogged) => Interest::None,
            Phase::Reading => Interest::Read,
        };

        let _ = ctl.set_interest(ctl.token(), interest);
    }

    fn close(&self, reason: CloseReason, ctl: &mut Control<'_, Shared>) {
        info!(peer = %self.peer, ?reason, "closing connection");
        let _ = ctl.unregister(ctl.token());
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Handler<Shared> for Connection {
    fn on_readable(&mut self, ctl: &mut Control<'_, Shared>) -> io::Result<Flow> {
        if !self.input.can_write() {
            self.sync_interest(ctl);
            return Ok(Flow::Continue);
        }
        self.input.compact();

        let flow = match self.stream.read(self.input.writable_slice()) {
            Ok(0) => {
                if self.lines.in_progress() {
                    debug!(peer = %self.peer, "client left in the middle of a command");
                }
                self.close(CloseReason::ClosedByClient, ctl);
                return Ok(Flow::Drained);
            }
            Ok(count) => {
                self.input.advance_write(count);
                Flow::Continue
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Flow::Drained,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => Flow::Continue,
            Err(error) => return Err(error),
        };

        self.process(ctl);
        self.sync_interest(ctl);

        Ok(flow)
    }

    fn on_writable(&mut self, ctl: &mut Control<'_, Shared>) -> io::Result<Flow> {
        let mut flow = Flow::Continue;

        while !self.output.is_empty() {
            match self.stream.write(self.output.readable_slice()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(count) => {
                    self.output.advance_read(count);
                    ctl.state().counters.add_sent_bytes(count);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    flow = Flow::Drained;
                    break;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }

        if self.output.is_empty() {
            if let Phase::Closing(reason) = self.phase {
                self.close(reason, ctl);
                return Ok(flow);
            }

            self.process(ctl);
        }
        self.sync_interest(ctl);

        Ok(flow)
    }

    fn on_close(&mut self, ctl: &mut Control<'_, Shared>) {
        ctl.state().counters.connection_closed();

        if let Some(staging) = self.body.take().and_then(|body| body.staging) {
            staging.abort(ctl);
        }
        debug!(peer = %self.peer, state = %self.session.state(), "connection closed");
    }

    fn idle_timeout(&self) -> Option<Duration> {
        match self.phase {
            Phase::Filtering => Some(self.filter_timeout),
            Phase::Reading if self.body.is_some() => {
                Some(self.idle_timeout.min(timeouts::DATA_BLOCK))
            }
            _ => Some(self.idle_timeout),
        }
    }

    fn on_idle(&mut self, ctl: &mut Control<'_, Shared>) {
        if let Phase::Closing(_) = self.phase {
            // The client is not even reading its last reply.
            self.close(CloseReason::TimedOut, ctl);
            return;
        }

        if let Phase::Filtering = self.phase {
            if let Some(staging) = self.body.take().and_then(|body| body.staging) {
                staging.abort(ctl);
            }
            self.complete_body(&Err(DeliveryError::FilterTimedOut(self.filter_timeout)));
            self.sync_interest(ctl);
            return;
        }

        if let Some(staging) = self.body.take().and_then(|body| body.staging) {
            staging.abort(ctl);
        }
        self.output.reset();
        let reply = Reply::new(
            421,
            format!("4.4.2 {} Error: timeout exceeded", ctl.state().config.domain),
        );
        self.queue(&reply);
        self.phase = Phase::Closing(CloseReason::TimedOut);
        self.sync_interest(ctl);
    }
}

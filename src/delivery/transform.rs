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

//! Piping messages through an external transform program without blocking the reactor.
//!
//! The program gets the staged transcript on its stdin and its stdout becomes the staged file.
//! Both pipe ends are non-blocking and registered with the selector as handlers of their own:
//! [`FilterInput`] feeds stdin from a queue the connection fills, and [`FilterOutput`] copies
//! stdout into the staged file. They share a [`Pipe`] with the connection's [`Filter`].
//!
//! When the queue passes [`HIGH_WATER`] the connection is told to stop reading its client, and it
//! is woken again once the queue drains below [`LOW_WATER`]. End of file on stdout completes the
//! transform, and wakes the connection to finish delivery.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fs::File,
    io::{self, Read, Write},
    os::fd::{AsFd, AsRawFd, RawFd},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    rc::Rc,
};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::{debug, warn};

use super::DeliveryError;
use crate::{
    selector::{Control, Flow, Handler, Interest, Token},
    shared::Shared,
};

/// Queued bytes at which the connection stops reading.
pub const HIGH_WATER: usize = 64 * 1024;
/// Queued bytes at which a paused connection resumes.
pub const LOW_WATER: usize = 16 * 1024;

/// The configured transform program, and whether it is currently used.
#[derive(Debug)]
pub struct TransformSwitch {
    program: Option<PathBuf>,
    enabled: bool,
}

impl TransformSwitch {
    /// A switch that starts enabled whenever there is a program.
    #[must_use]
    pub const fn new(program: Option<PathBuf>) -> Self {
        let enabled = program.is_some();

        Self { program, enabled }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn the transform on. Returns `false`, leaving it off, if there is no program.
    pub fn enable(&mut self) -> bool {
        self.enabled = self.program.is_some();
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// The program new transactions should use, if any.
    #[must_use]
    pub fn active_program(&self) -> Option<&Path> {
        self.program.as_deref().filter(|_| self.enabled)
    }
}

/// State shared between a connection and its two pipe handlers.
#[derive(Debug)]
struct Pipe {
    /// The connection to wake.
    connection: Token,
    /// Bytes waiting to be written into the program's stdin.
    pending: VecDeque<u8>,
    /// The connection has queued everything it will.
    closing: bool,
    /// The program stopped accepting input; further bytes are discarded.
    broken: bool,
    /// The connection stopped reading because [`Self::pending`] is over [`HIGH_WATER`].
    paused: bool,
    child: Option<Child>,
    outcome: Option<Result<(), DeliveryError>>,
}

impl Pipe {
    const fn new(connection: Token) -> Self {
        Self {
            connection,
            pending: VecDeque::new(),
            closing: false,
            broken: false,
            paused: false,
            child: None,
            outcome: None,
        }
    }
}

/// The connection's handle on a running transform.
#[derive(Debug)]
pub struct Filter {
    pipe: Rc<RefCell<Pipe>>,
    input: Token,
    output: Token,
}

impl Filter {
    /// Start `program` writing into `file`, and register its pipes on behalf of the connection
    /// being dispatched.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Spawn`] if the program cannot be started.
    /// - [`DeliveryError::Register`] if the selector is full.
    /// - [`DeliveryError::Io`] if the pipes cannot be made non-blocking.
    pub fn spawn(
        program: &Path,
        file: File,
        ctl: &mut Control<'_, Shared>,
    ) -> Result<Self, DeliveryError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| DeliveryError::Spawn {
                program: program.to_owned(),
                source,
            })?;
        debug!(pid = child.id(), program = %program.display(), "started transform");

        match Self::wire(&mut child, file, ctl) {
            Ok(filter) => {
                filter.pipe.borrow_mut().child = Some(child);
                Ok(filter)
            }
            Err(error) => {
                stop(child, ctl.state());
                Err(error)
            }
        }
    }

    fn wire(
        child: &mut Child,
        file: File,
        ctl: &mut Control<'_, Shared>,
    ) -> Result<Self, DeliveryError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("transform stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("transform stdout is not piped"))?;
        set_nonblocking(&stdin)?;
        set_nonblocking(&stdout)?;

        let pipe = Rc::new(RefCell::new(Pipe::new(ctl.token())));
        let input = ctl.register(
            Box::new(FilterInput {
                stdin,
                pipe: Rc::clone(&pipe),
            }),
            Interest::None,
        )?;
        let output = ctl.register(
            Box::new(FilterOutput {
                stdout,
                file,
                pipe: Rc::clone(&pipe),
            }),
            Interest::Read,
        );
        let output = match output {
            Ok(token) => token,
            Err(error) => {
                let _ = ctl.unregister(input);
                return Err(error.into());
            }
        };

        Ok(Self {
            pipe,
            input,
            output,
        })
    }

    /// Queue bytes for the program.
    pub fn push(&mut self, bytes: &[u8], ctl: &mut Control<'_, Shared>) {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.broken {
            return;
        }

        pipe.pending.extend(bytes);
        if pipe.pending.len() >= HIGH_WATER {
            pipe.paused = true;
        }
        drop(pipe);

        let _ = ctl.set_interest(self.input, Interest::Write);
    }

    /// Close the program's stdin once everything queued is written.
    pub fn close_input(&mut self, ctl: &mut Control<'_, Shared>) {
        let mut pipe = self.pipe.borrow_mut();
        pipe.closing = true;
        let broken = pipe.broken;
        drop(pipe);

        if !broken {
            let _ = ctl.set_interest(self.input, Interest::Write);
        }
    }

    /// Whether the connection should stop reading its client.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pipe.borrow().paused
    }

    /// How the transform ended, once it has.
    pub fn take_outcome(&mut self) -> Option<Result<(), DeliveryError>> {
        self.pipe.borrow_mut().outcome.take()
    }

    /// Unregister whatever is left of the pipes and stop the program if it is still running.
    pub fn release(self, ctl: &mut Control<'_, Shared>) {
        // Either may already have unregistered itself.
        let _ = ctl.unregister(self.input);
        let _ = ctl.unregister(self.output);

        let child = self.pipe.borrow_mut().child.take();
        if let Some(child) = child {
            stop(child, ctl.state());
        }
    }
}

fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

    Ok(())
}

/// Kill `child` and leave it to be reaped later.
fn stop(mut child: Child, shared: &mut Shared) {
    if let Err(error) = child.kill() {
        debug!(pid = child.id(), %error, "could not kill transform");
    }
    shared.reap_later(child);
}

/// Writes queued bytes into the program's stdin.
struct FilterInput {
    stdin: ChildStdin,
    pipe: Rc<RefCell<Pipe>>,
}

impl AsRawFd for FilterInput {
    fn as_raw_fd(&self) -> RawFd {
        self.stdin.as_raw_fd()
    }
}

impl Handler<Shared> for FilterInput {
    fn on_writable(&mut self, ctl: &mut Control<'_, Shared>) -> io::Result<Flow> {
        let mut pipe = self.pipe.borrow_mut();

        let flow = loop {
            let (front, _) = pipe.pending.as_slices();
            if front.is_empty() {
                break Flow::Continue;
            }

            match self.stdin.write(front) {
                Ok(count) if count > 0 => {
                    pipe.pending.drain(..count);
                }
                Ok(_) => {
                    pipe.broken = true;
                    pipe.pending.clear();
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break Flow::Drained,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(%error, "transform stopped reading its input");
                    pipe.broken = true;
                    pipe.pending.clear();
                }
            }
        };

        let wake = pipe.paused && pipe.pending.len() <= LOW_WATER;
        if wake {
            pipe.paused = false;
        }
        let done = pipe.pending.is_empty() && (pipe.closing || pipe.broken);
        let idle = pipe.pending.is_empty();
        let connection = pipe.connection;
        drop(pipe);

        if wake {
            let _ = ctl.set_interest(connection, Interest::Write);
        }
        if done {
            // Dropping stdin gives the program its end of file.
            let _ = ctl.unregister(ctl.token());
        } else if idle {
            let _ = ctl.set_interest(ctl.token(), Interest::None);
        }

        Ok(flow)
    }
}

/// Copies the program's stdout into the staged file.
struct FilterOutput {
    stdout: ChildStdout,
    file: File,
    pipe: Rc<RefCell<Pipe>>,
}

impl FilterOutput {
    fn complete(&mut self, outcome: Result<(), DeliveryError>, ctl: &mut Control<'_, Shared>) {
        let mut pipe = self.pipe.borrow_mut();
        let outcome = outcome.and_then(|()| {
            if pipe.broken {
                Err(DeliveryError::FilterBroken)
            } else {
                Ok(())
            }
        });
        pipe.outcome = Some(outcome);
        let connection = pipe.connection;
        drop(pipe);

        let _ = ctl.unregister(ctl.token());
        let _ = ctl.set_interest(connection, Interest::Write);
    }

    fn wait(&mut self, ctl: &mut Control<'_, Shared>) -> Result<(), DeliveryError> {
        self.file.flush()?;

        let Some(mut child) = self.pipe.borrow_mut().child.take() else {
            return Ok(());
        };

        match child.try_wait() {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => Err(DeliveryError::FilterFailed(status)),
            Ok(None) => {
                // Its output is complete; the exit status is collected later.
                ctl.state().reap_later(child);
                Ok(())
            }
            Err(error) => {
                ctl.state().reap_later(child);
                Err(error.into())
            }
        }
    }
}

impl AsRawFd for FilterOutput {
    fn as_raw_fd(&self) -> RawFd {
        self.stdout.as_raw_fd()
    }
}

impl Handler<Shared> for FilterOutput {
    fn on_readable(&mut self, ctl: &mut Control<'_, Shared>) -> io::Result<Flow> {
        let mut chunk = [0; 8 * 1024];

        loop {
            match self.stdout.read(&mut chunk) {
                Ok(0) => {
                    let outcome = self.wait(ctl);
                    self.complete(outcome, ctl);
                    return Ok(Flow::Continue);
                }
                Ok(count) => {
                    if let Err(error) = self.file.write_all(&chunk[..count]) {
                        self.complete(Err(error.into()), ctl);
                        return Ok(Flow::Continue);
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Flow::Drained)
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }

    fn on_close(&mut self, ctl: &mut Control<'_, Shared>) {
        let unfinished = self.pipe.borrow().outcome.is_none();
        if unfinished {
            self.complete(
                Err(io::Error::other("transform output closed before end of file").into()),
                ctl,
            );
        }
    }
}

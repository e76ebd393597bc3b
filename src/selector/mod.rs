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

//! A single-threaded, readiness-based I/O multiplexer.
//!
//! Every registered file descriptor is paired with a [`Handler`] and an [`Interest`].
//! [`Selector::run_once`] waits until at least one descriptor is ready for what it is interested
//! in (or the wait times out), then calls exactly one of [`Handler::on_readable`],
//! [`Handler::on_writable`] or [`Handler::on_close`] per ready descriptor, one at a time, on the
//! calling task. Handlers get a [`Control`] through which they reach the shared state `S`,
//! register new descriptors, change interests, and unregister descriptors (themselves included).
//!
//! Readiness comes from Tokio's reactor through [`AsyncFd`], and behaves level-triggered: a
//! descriptor stays ready until its handler reports [`Flow::Drained`], meaning it saw
//! `WouldBlock`.
//!
//! Unregistering is deferred until the running handler returns, so a handler can tear itself or
//! anything else down from inside any callback. [`Handler::on_close`] runs exactly once per
//! registration, just before the descriptor is dropped.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::Display,
    io,
    os::fd::{AsRawFd, RawFd},
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures_util::{future::poll_fn, task::noop_waker_ref};
use thiserror::Error;
use tokio::io::{unix::AsyncFd, Interest as Readiness};
use tracing::{debug, trace};


/// Identifies one registration.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub struct Token(usize);

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a registration wants to be woken up for.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum Interest {
    /// Stay registered, but never dispatch.
    #[default]
    None,
    Read,
    Write,
}

/// What a handler learned about its descriptor's readiness.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Flow {
    /// The descriptor may still be ready; dispatch again if the interest stays the same.
    Continue,
    /// The descriptor returned `WouldBlock`; wait for the reactor before dispatching again.
    Drained,
}

#[derive(Error, Debug)]
pub enum SelectorError {
    /// Registering would exceed the configured number of registrations.
    #[error("selector is full ({capacity} registrations)")]
    Capacity { capacity: usize },
    #[error("{0} is not registered")]
    UnknownToken(Token),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How a call to [`Selector::run_once`] ended.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Wakeup {
    /// This many descriptors were dispatched.
    Dispatched(usize),
    /// Nothing became ready before the timeout.
    TimedOut,
}

/// The callbacks for one registered descriptor.
///
/// Errors returned from [`Self::on_readable`] and [`Self::on_writable`] unregister the handler.
///
/// The handler owns its descriptor: [`AsRawFd::as_raw_fd`] must return the same open descriptor
/// for as long as the handler is registered.
pub trait Handler<S>: AsRawFd {
    fn on_readable(&mut self, _ctl: &mut Control<'_, S>) -> io::Result<Flow> {
        Ok(Flow::Drained)
    }

    fn on_writable(&mut self, _ctl: &mut Control<'_, S>) -> io::Result<Flow> {
        Ok(Flow::Drained)
    }

    /// Called once, when the handler is unregistered for any reason.
    fn on_close(&mut self, _ctl: &mut Control<'_, S>) {}

    /// How long the handler may go without being dispatched before [`Self::on_idle`] runs.
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }

    /// Called when [`Self::idle_timeout`] has elapsed. Unregisters the handler by default.
    fn on_idle(&mut self, ctl: &mut Control<'_, S>) {
        let _ = ctl.unregister(ctl.token());
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum Event {
    Readable,
    Writable,
    Failed,
}

struct Slot<S> {
    // Declared before `handler` so the descriptor leaves the reactor before the handler closes
    // it.
    io: AsyncFd<RawFd>,
    interest: Interest,
    last_active: Instant,
    /// `None` while the handler is being dispatched.
    handler: Option<Box<dyn Handler<S>>>,
}

impl<S> Slot<S> {
    fn wants(&self, event: Event) -> bool {
        matches!(
            (self.interest, event),
            (Interest::Read, Event::Readable) | (Interest::Write, Event::Writable)
        )
    }
}

struct Slots<S> {
    map: BTreeMap<Token, Slot<S>>,
    capacity: usize,
    next: usize,
    closing: VecDeque<Token>,
}

impl<S> Slots<S> {
    fn insert(
        &mut self,
        handler: Box<dyn Handler<S>>,
        interest: Interest,
    ) -> Result<Token, SelectorError> {
        if self.map.len() >= self.capacity {
            return Err(SelectorError::Capacity {
                capacity: self.capacity,
            });
        }

        let fd = handler.as_raw_fd();
        // SAFETY: the slot owns `handler`, which owns `fd`, and drops `io` before `handler`.
        // Handlers return the same descriptor for as long as they are registered.
        let io = unsafe {
            AsyncFd::register_with_interest(fd, Readiness::READABLE | Readiness::WRITABLE)
        }
        .map_err(|error| error.into_parts().1)?;

        let token = loop {
            let token = Token(self.next);
            self.next = self.next.wrapping_add(1);
            if !self.map.contains_key(&token) {
                break token;
            }
        };

        self.map.insert(
            token,
            Slot {
                io,
                interest,
                last_active: Instant::now(),
                handler: Some(handler),
            },
        );
        trace!(%token, ?interest, "registered");

        Ok(token)
    }

    fn set_interest(&mut self, token: Token, interest: Interest) -> Result<(), SelectorError> {
        let slot = self
            .map
            .get_mut(&token)
            .ok_or(SelectorError::UnknownToken(token))?;
        slot.interest = interest;

        Ok(())
    }

    fn schedule_close(&mut self, token: Token) -> Result<(), SelectorError> {
        if !self.map.contains_key(&token) {
            return Err(SelectorError::UnknownToken(token));
        }
        if !self.closing.contains(&token) {
            self.closing.push_back(token);
        }

        Ok(())
    }
}

/// A handler's view of the selector while it is being dispatched.
pub struct Control<'a, S> {
    slots: &'a mut Slots<S>,
    state: &'a mut S,
    token: Token,
}

impl<'a, S> Control<'a, S> {
    fn new(slots: &'a mut Slots<S>, state: &'a mut S, token: Token) -> Self {
        Self {
            slots,
            state,
            token,
        }
    }

    /// The token of the handler being dispatched.
    #[must_use]
    pub const fn token(&self) -> Token {
        self.token
    }

    /// The state shared by every handler.
    pub fn state(&mut self) -> &mut S {
        self.state
    }

    /// Whether [`Self::register`] has room for another registration.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.slots.map.len() < self.slots.capacity
    }

    /// Register another descriptor.
    ///
    /// # Errors
    ///
    /// See [`Selector::register`].
    pub fn register(
        &mut self,
        handler: Box<dyn Handler<S>>,
        interest: Interest,
    ) -> Result<Token, SelectorError> {
        self.slots.insert(handler, interest)
    }

    /// Change the interest of any registration, this one included.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::UnknownToken`] if `token` is not registered.
    pub fn set_interest(&mut self, token: Token, interest: Interest) -> Result<(), SelectorError> {
        self.slots.set_interest(token, interest)
    }

    /// Unregister any registration, this one included, once the running callback returns.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::UnknownToken`] if `token` is not registered.
    pub fn unregister(&mut self, token: Token) -> Result<(), SelectorError> {
        self.slots.schedule_close(token)
    }
}

/// The reactor. See the [module documentation](self).
pub struct Selector<S> {
    slots: Slots<S>,
    timeout: Duration,
}

impl<S> Selector<S> {
    /// Create a selector holding at most `capacity` registrations, whose waits give up after
    /// `timeout`.
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            slots: Slots {
                map: BTreeMap::new(),
                capacity,
                next: 0,
                closing: VecDeque::new(),
            },
            timeout,
        }
    }

    /// Register a handler's descriptor with `interest`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`SelectorError::Capacity`] if the selector is full.
    /// - [`SelectorError::Io`] if the descriptor cannot be polled, such as a regular file.
    pub fn register(
        &mut self,
        handler: Box<dyn Handler<S>>,
        interest: Interest,
    ) -> Result<Token, SelectorError> {
        self.slots.insert(handler, interest)
    }

    /// # Errors
    ///
    /// Returns [`SelectorError::UnknownToken`] if `token` is not registered.
    pub fn set_interest(&mut self, token: Token, interest: Interest) -> Result<(), SelectorError> {
        self.slots.set_interest(token, interest)
    }

    /// Unregister `token` now, running its [`Handler::on_close`].
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::UnknownToken`] if `token` is not registered.
    pub fn unregister(&mut self, token: Token, state: &mut S) -> Result<(), SelectorError> {
        self.slots.schedule_close(token)?;
        self.process_closing(state);

        Ok(())
    }

    /// Unregister everything, running every [`Handler::on_close`].
    pub fn close_all(&mut self, state: &mut S) {
        let tokens: Vec<Token> = self.slots.map.keys().copied().collect();
        for token in tokens {
            let _ = self.slots.schedule_close(token);
        }
        self.process_closing(state);
    }

    /// Wait for readiness and dispatch it, then run housekeeping.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::Io`] if every registration with an interest failed to poll,
    /// which means the reactor itself is gone. A single descriptor failing only closes that
    /// descriptor.
    pub async fn run_once(&mut self, state: &mut S) -> Result<Wakeup, SelectorError> {
        let timeout = self.timeout;
        let waited = tokio::time::timeout(timeout, poll_fn(|cx| self.poll_ready(cx))).await;

        let wakeup = match waited {
            Ok(Ok(ready)) => {
                let count = ready.len();
                for (token, event) in ready {
                    self.dispatch(token, event, state);
                }

                Wakeup::Dispatched(count)
            }
            Ok(Err(error)) => return Err(SelectorError::Io(error)),
            Err(_elapsed) => Wakeup::TimedOut,
        };

        self.sweep_idle(state);

        Ok(wakeup)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.map.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.capacity
    }

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<Vec<(Token, Event)>>> {
        let mut ready = Vec::new();
        let mut interested = 0;
        let mut failure = None;

        for (&token, slot) in &self.slots.map {
            let (polled, event) = match slot.interest {
                Interest::None => continue,
                Interest::Read => (slot.io.poll_read_ready(cx).map_ok(|_| ()), Event::Readable),
                Interest::Write => (slot.io.poll_write_ready(cx).map_ok(|_| ()), Event::Writable),
            };
            interested += 1;

            match polled {
                Poll::Ready(Ok(())) => ready.push((token, event)),
                Poll::Ready(Err(error)) => {
                    debug!(%token, %error, "polling for readiness failed");
                    ready.push((token, Event::Failed));
                    failure.get_or_insert(error);
                }
                Poll::Pending => {}
            }
        }

        match failure {
            Some(error)
                if ready.len() == interested
                    && ready.iter().all(|&(_, event)| event == Event::Failed) =>
            {
                Poll::Ready(Err(error))
            }
            _ if ready.is_empty() => Poll::Pending,
            _ => Poll::Ready(Ok(ready)),
        }
    }

    fn dispatch(&mut self, token: Token, event: Event, state: &mut S) {
        // An earlier handler in this batch may have closed this one or changed its interest.
        let Some(slot) = self.slots.map.get_mut(&token) else {
            return;
        };
        if event == Event::Failed {
            let _ = self.slots.schedule_close(token);
            self.process_closing(state);
            return;
        }
        if !slot.wants(event) {
            return;
        }
        let Some(mut handler) = slot.handler.take() else {
            return;
        };
        slot.last_active = Instant::now();

        let result = {
            let mut ctl = Control::new(&mut self.slots, &mut *state, token);
            if event == Event::Readable {
                handler.on_readable(&mut ctl)
            } else {
                handler.on_writable(&mut ctl)
            }
        };

        match result {
            Ok(Flow::Drained) => {
                if let Some(slot) = self.slots.map.get(&token) {
                    clear_readiness(&slot.io, event);
                }
            }
            Ok(Flow::Continue) => {}
            Err(error) => {
                debug!(%token, %error, "handler failed");
                let _ = self.slots.schedule_close(token);
            }
        }

        if let Some(slot) = self.slots.map.get_mut(&token) {
            slot.handler = Some(handler);
        }
        self.process_closing(state);
    }

    fn sweep_idle(&mut self, state: &mut S) {
        let now = Instant::now();
        let idle: Vec<Token> = self
            .slots
            .map
            .iter()
            .filter(|(_, slot)| {
                slot.handler
                    .as_ref()
                    .and_then(|handler| handler.idle_timeout())
                    .is_some_and(|limit| now.duration_since(slot.last_active) >= limit)
            })
            .map(|(&token, _)| token)
            .collect();

        for token in idle {
            let Some(slot) = self.slots.map.get_mut(&token) else {
                continue;
            };
            let Some(mut handler) = slot.handler.take() else {
                continue;
            };
            slot.last_active = now;

            debug!(%token, "idle timeout");
            handler.on_idle(&mut Control::new(&mut self.slots, &mut *state, token));

            if let Some(slot) = self.slots.map.get_mut(&token) {
                slot.handler = Some(handler);
            }
        }

        self.process_closing(state);
    }

    fn process_closing(&mut self, state: &mut S) {
        while let Some(token) = self.slots.closing.pop_front() {
            let Some(mut slot) = self.slots.map.remove(&token) else {
                continue;
            };
            let Some(mut handler) = slot.handler.take() else {
                continue;
            };

            handler.on_close(&mut Control::new(&mut self.slots, &mut *state, token));

            drop(slot);
            drop(handler);
            trace!(%token, "unregistered");
        }
    }
}

/// Run `f` with a [`Control`] over an empty, unbounded set of registrations.
#[cfg(test)]
pub(crate) fn with_control<S, R>(state: &mut S, f: impl FnOnce(&mut Control<'_, S>) -> R) -> R {
    let mut slots = Slots {
        map: BTreeMap::new(),
        capacity: usize::MAX,
        next: 0,
        closing: VecDeque::new(),
    };

    f(&mut Control::new(&mut slots, state, Token(usize::MAX)))
}

/// Forget the readiness a handler just drained, so the next wait blocks until the reactor sees
/// new readiness.
fn clear_readiness(io: &AsyncFd<RawFd>, event: Event) {
    let mut cx = Context::from_waker(noop_waker_ref());
    let polled = match event {
        Event::Readable => io.poll_read_ready(&mut cx),
        Event::Writable => io.poll_write_ready(&mut cx),
        Event::Failed => return,
    };

    if let Poll::Ready(Ok(mut guard)) = polled {
        guard.clear_ready();
    }
}

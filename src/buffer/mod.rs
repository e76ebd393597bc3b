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

//! A fixed-capacity byte buffer with separate read and write cursors.
//!
//! Bytes are written into [`Buffer::writable_slice`] and committed with [`Buffer::advance_write`],
//! then consumed from [`Buffer::readable_slice`] and released with [`Buffer::advance_read`]. The
//! cursors always satisfy `read <= write <= capacity`; moving either past its bound panics rather
//! than corrupting the buffer.

use thiserror::Error;


/// There was not enough free space in a [`Buffer`] to hold the bytes being pushed.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[error("buffer full: {needed} bytes needed, {available} available")]
pub struct BufferFull {
    /// How many bytes were being pushed.
    pub needed: usize,
    /// How many bytes could have been accepted, after compacting.
    pub available: usize,
}

/// A linear byte buffer that compacts unread bytes to the front when it runs out of room.
#[derive(Clone)]
pub struct Buffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl Buffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// The total number of bytes this buffer can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The number of bytes written but not yet read.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.write - self.read
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Whether there is room to write at least one byte, counting space reclaimable by
    /// compacting.
    #[must_use]
    pub fn can_write(&self) -> bool {
        self.len() < self.capacity()
    }

    /// The free space at the end of the buffer.
    ///
    /// Call [`Self::compact`] first to also reclaim the space taken by already read bytes.
    pub fn writable_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    /// Commit `count` bytes previously written into [`Self::writable_slice`].
    ///
    /// # Panics
    ///
    /// Panics if `count` is larger than the writable slice.
    pub fn advance_write(&mut self, count: usize) {
        assert!(
            count <= self.data.len() - self.write,
            "advanced write cursor past the end of the buffer"
        );

        self.write += count;
    }

    /// The bytes written but not yet read.
    #[must_use]
    pub fn readable_slice(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Release `count` bytes from the front of [`Self::readable_slice`].
    ///
    /// # Panics
    ///
    /// Panics if `count` is larger than the readable slice.
    pub fn advance_read(&mut self, count: usize) {
        assert!(
            count <= self.len(),
            "advanced read cursor past the write cursor"
        );

        self.read += count;

        if self.read == self.write {
            self.reset();
        }
    }

    /// Read and release a single byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = *self.readable_slice().first()?;
        self.advance_read(1);

        Some(byte)
    }

    /// Copy `bytes` in behind any unread bytes, compacting if that makes them fit.
    ///
    /// # Errors
    ///
    /// Returns [`BufferFull`] and leaves the buffer untouched if `bytes` does not fit.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        let available = self.capacity() - self.len();
        if bytes.len() > available {
            return Err(BufferFull {
                needed: bytes.len(),
                available,
            });
        }

        if bytes.len() > self.data.len() - self.write {
            self.compact();
        }

        self.data[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();

        Ok(())
    }

    /// Move the unread bytes to the front of the buffer.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }

        self.data.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Discard every unread byte.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Release bytes up to and including the next `byte`.
    ///
    /// Returns `true` if `byte` was found. Otherwise every unread byte is released.
    pub fn skip_through(&mut self, byte: u8) -> bool {
        match self.readable_slice().iter().position(|&b| b == byte) {
            Some(index) => {
                self.advance_read(index + 1);
                true
            }
            None => {
                self.reset();
                false
            }
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish_non_exhaustive()
    }
}

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

//! Sets of input bytes that a parser transition accepts.

/// A set of bytes, stored as a 256-bit mask.
///
/// Every constructor is `const` so grammars can name their classes as constants.
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct ByteSet {
    bits: [u64; 4],
}

impl ByteSet {
    /// Contains no bytes.
    pub const EMPTY: Self = Self { bits: [0; 4] };
    /// Contains every byte.
    pub const ANY: Self = Self {
        bits: [u64::MAX; 4],
    };
    /// `0` through `9`.
    pub const DIGIT: Self = Self::range(b'0', b'9');
    /// `A` through `Z` and `a` through `z`.
    pub const ALPHA: Self = Self::range(b'A', b'Z').union(Self::range(b'a', b'z'));
    /// Printable US-ASCII, space included.
    pub const PRINTABLE: Self = Self::range(b' ', b'~');

    /// A set containing only `byte`.
    #[must_use]
    pub const fn single(byte: u8) -> Self {
        Self::EMPTY.with(byte)
    }

    /// A set containing every byte in `bytes`.
    #[must_use]
    pub const fn of(bytes: &[u8]) -> Self {
        let mut set = Self::EMPTY;
        let mut index = 0;
        while index < bytes.len() {
            set = set.with(bytes[index]);
            index += 1;
        }

        set
    }

    /// A set containing every byte from `first` to `last`, inclusive.
    #[must_use]
    pub const fn range(first: u8, last: u8) -> Self {
        let mut set = Self::EMPTY;
        let mut byte = first;
        while byte <= last {
            set = set.with(byte);
            if byte == u8::MAX {
                break;
            }
            byte += 1;
        }

        set
    }

    /// This set with `byte` added.
    #[must_use]
    pub const fn with(mut self, byte: u8) -> Self {
        self.bits[(byte / 64) as usize] |= 1 << (byte % 64);
        self
    }

    /// Bytes in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: [
                self.bits[0] | other.bits[0],
                self.bits[1] | other.bits[1],
                self.bits[2] | other.bits[2],
                self.bits[3] | other.bits[3],
            ],
        }
    }

    /// Bytes in this set but not in `other`.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self {
            bits: [
                self.bits[0] & !other.bits[0],
                self.bits[1] & !other.bits[1],
                self.bits[2] & !other.bits[2],
                self.bits[3] & !other.bits[3],
            ],
        }
    }

    #[must_use]
    pub const fn contains(&self, byte: u8) -> bool {
        self.bits[(byte / 64) as usize] & (1 << (byte % 64)) != 0
    }
}

impl std::fmt::Debug for ByteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(
                (0..=u8::MAX)
                    .filter(|&b| self.contains(b))
                    .map(|b| std::ascii::escape_default(b).to_string()),
            )
            .finish()
    }
}

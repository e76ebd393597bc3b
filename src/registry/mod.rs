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

//! An in-memory log of completed deliveries, indexed by sender and by time.
//!
//! Records are appended once per delivered recipient and never change or go away while the
//! process runs. Both indexes point into the same append-only list, so a record is stored once.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};

#[cfg(test)]
mod test;

/// One message delivered to one recipient.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MailRecord {
    sender: String,
    recipient: String,
    delivered_at: DateTime<Utc>,
    path: PathBuf,
    size: u64,
}

impl MailRecord {
    #[must_use]
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        delivered_at: DateTime<Utc>,
        path: impl Into<PathBuf>,
        size: u64,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            delivered_at,
            path: path.into(),
            size,
        }
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[must_use]
    pub const fn delivered_at(&self) -> DateTime<Utc> {
        self.delivered_at
    }

    /// Where the delivered file was placed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }
}

/// `<rfc3339 timestamp> <sender> <recipient> <size> <path>`, as listed by `XGET`.
impl Display for MailRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.delivered_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.sender,
            self.recipient,
            self.size,
            self.path.display()
        )
    }
}

/// The registry of every delivery since the process started.
#[derive(Default, Debug)]
pub struct AccessRegistry {
    records: Vec<MailRecord>,
    /// Sender to record indexes, in insertion order. Iterates senders alphabetically.
    by_sender: BTreeMap<String, Vec<usize>>,
    /// Delivery time, then insertion index to keep ties in arrival order.
    by_time: BTreeSet<(DateTime<Utc>, usize)>,
}

impl AccessRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to both indexes.
    pub fn record(&mut self, record: MailRecord) -> &MailRecord {
        let index = self.records.len();

        self.by_sender
            .entry(record.sender.clone())
            .or_default()
            .push(index);
        self.by_time.insert((record.delivered_at, index));
        self.records.push(record);

        &self.records[index]
    }

    /// Every record sent by `sender`, in the order they were recorded.
    pub fn query_by_sender<'a>(&'a self, sender: &str) -> impl Iterator<Item = &'a MailRecord> {
        self.by_sender
            .get(sender)
            .into_iter()
            .flatten()
            .map(|&index| &self.records[index])
    }

    /// Every record delivered within `start..=end`, oldest first.
    ///
    /// An inverted range yields nothing.
    pub fn query_by_time(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &MailRecord> {
        let range = (start <= end).then(|| self.by_time.range((start, 0)..=(end, usize::MAX)));

        range
            .into_iter()
            .flatten()
            .map(|&(_, index)| &self.records[index])
    }

    /// The most recent delivery.
    #[must_use]
    pub fn latest(&self) -> Option<&MailRecord> {
        self.by_time
            .last()
            .map(|&(_, index)| &self.records[index])
    }

    /// Every sender with at least one record, alphabetically.
    pub fn senders(&self) -> impl Iterator<Item = &str> {
        self.by_sender.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

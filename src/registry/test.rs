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

//! Tests for [`super`].

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::*;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("timestamp is in range")
}

fn record(sender: &str, recipient: &str, seconds: i64) -> MailRecord {
    MailRecord::new(sender, recipient, at(seconds), format!("mail/{recipient}"), 42)
}

/// Deliveries that mostly, but not always, arrive in time order.
fn populated() -> AccessRegistry {
    let mut registry = AccessRegistry::new();
    for (sender, recipient, seconds) in [
        ("zed@d", "a@d", 10),
        ("amy@d", "b@d", 20),
        ("zed@d", "c@d", 5),
        ("amy@d", "d@d", 20),
        ("bob@d", "e@d", 30),
        ("zed@d", "f@d", 25),
    ] {
        registry.record(record(sender, recipient, seconds));
    }

    registry
}

#[test]
fn test_query_by_time_is_ordered() {
    let registry = populated();
    let times: Vec<_> = registry
        .query_by_time(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
        .map(MailRecord::delivered_at)
        .collect();

    assert_eq!(times.len(), registry.len());
    assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));

    // Equal timestamps keep the order they were recorded in.
    let recipients: Vec<_> = registry
        .query_by_time(at(20), at(20))
        .map(MailRecord::recipient)
        .collect();
    assert_eq!(recipients, ["b@d", "d@d"]);
}

#[test]
fn test_query_by_time_bounds() {
    let registry = populated();

    let recipients: Vec<_> = registry
        .query_by_time(at(10), at(25))
        .map(MailRecord::recipient)
        .collect();
    assert_eq!(recipients, ["a@d", "b@d", "d@d", "f@d"]);

    assert_eq!(registry.query_by_time(at(25), at(10)).count(), 0);
    assert_eq!(registry.query_by_time(at(31), at(31) + Duration::days(1)).count(), 0);
}

#[test]
fn test_query_by_sender_keeps_insertion_order() {
    let registry = populated();

    let recipients: Vec<_> = registry
        .query_by_sender("zed@d")
        .map(MailRecord::recipient)
        .collect();
    assert_eq!(recipients, ["a@d", "c@d", "f@d"]);

    assert!(registry
        .query_by_sender("amy@d")
        .all(|record| record.sender() == "amy@d"));
    assert_eq!(registry.query_by_sender("nobody@d").count(), 0);
}

#[test]
fn test_latest_and_senders() -> Result {
    let mut registry = AccessRegistry::new();
    assert!(registry.latest().is_none());
    assert!(registry.is_empty());

    registry = populated();
    let latest = registry.latest().ok_or("registry has records")?;
    assert_eq!(latest.recipient(), "e@d");

    assert_eq!(registry.senders().collect::<Vec<_>>(), ["amy@d", "bob@d", "zed@d"]);

    Ok(())
}

#[test]
fn test_display() {
    let line = record("u1@d", "u2@d", 0).to_string();

    assert_eq!(line, "2023-11-14T22:13:20Z u1@d u2@d 42 mail/u2@d");
}

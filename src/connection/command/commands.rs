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

//! The reply to each verb that the state table routes somewhere.
//!
//! Every handler returns `Ok` when the command succeeded and the session should follow the
//! transition, or `Err` with the reply to send while staying in the current state.

use ascii::AsciiStr;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use super::{Command, Verb};
use crate::{
    connection::session::Session,
    reply::Reply,
    request::parse_date,
    shared::Shared,
    str::{max_lengths, Mailbox},
};

pub type Outcome = Result<Reply, Reply>;

/// Run the handler for `command`'s verb.
pub fn dispatch(session: &mut Session, command: &Command, shared: &Shared) -> Outcome {
    match command.verb() {
        Verb::Helo => greet(session, command, shared, false),
        Verb::Ehlo => greet(session, command, shared, true),
        Verb::Mail => mail(session, command),
        Verb::Rcpt => rcpt(session, command, shared),
        Verb::Data => data(session, command),
        Verb::XAuth => xauth(command, shared),
        Verb::XFrom => xfrom(session, command),
        Verb::XGet => xget(session, command, shared),
        Verb::Rset
        | Verb::Noop
        | Verb::Quit
        | Verb::XQuit
        | Verb::NotImplemented
        | Verb::Unknown => Err(Reply::bad_sequence()),
    }
}

fn syntax(verb: Verb) -> Reply {
    Reply::syntax(verb.usage())
}

/// `HELO <domain>` and `EHLO <domain>`.
///
/// `EHLO` also lists the extensions this server supports.
fn greet(session: &mut Session, command: &Command, shared: &Shared, extended: bool) -> Outcome {
    let client = command
        .argument()
        .ok_or_else(|| syntax(command.verb()))?;

    session.client = Some(client.to_string());
    session.transaction.clear();

    let reply = Reply::new(250, format!("{} Hello {client}", shared.config.domain));

    Ok(if extended {
        reply.line("8BITMIME").line("PIPELINING").line("XAUTH")
    } else {
        reply
    })
}

/// Pull the `<path>` out of `FROM:<path>` or `TO:<path>`, ignoring any parameters after it.
///
/// `keyword` is matched case-insensitively, and whitespace is allowed after it.
fn path_argument<'a>(argument: Option<&'a AsciiStr>, keyword: &str) -> Option<&'a AsciiStr> {
    let text = argument?.as_str();
    let head = text.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }

    let rest = text[keyword.len()..].trim_start();
    let path = rest.split_once(' ').map_or(rest, |(path, _parameters)| path);

    AsciiStr::from_ascii(path).ok()
}

/// `MAIL FROM:<address>`, which starts a new transaction.
fn mail(session: &mut Session, command: &Command) -> Outcome {
    let path = path_argument(command.argument(), "FROM:").ok_or_else(|| syntax(Verb::Mail))?;
    let sender = Mailbox::parse_path(path)
        .map_err(|error| Reply::new(501, format!("5.1.7 Bad sender address syntax: {error}")))?;

    session.transaction.clear();
    session.transaction.sender = Some(sender);

    Ok(Reply::ok("2.1.0"))
}

/// `RCPT TO:<address>`.
fn rcpt(session: &mut Session, command: &Command, shared: &Shared) -> Outcome {
    let path = path_argument(command.argument(), "TO:").ok_or_else(|| syntax(Verb::Rcpt))?;
    let recipient = Mailbox::parse_path(path).map_err(|error| {
        Reply::new(501, format!("5.1.3 Bad destination address syntax: {error}"))
    })?;

    if session.transaction.recipients.len() >= shared.config.max_recipients {
        return Err(Reply::new(452, "4.5.3 Too many recipients"));
    }
    session.transaction.recipients.push(recipient);

    Ok(Reply::ok("2.1.5"))
}

/// `DATA`, which hands the connection over to the body reader.
fn data(session: &Session, command: &Command) -> Outcome {
    if command.argument().is_some() {
        return Err(syntax(Verb::Data));
    }
    if session.transaction.sender.is_none() || session.transaction.recipients.is_empty() {
        return Err(Reply::bad_sequence());
    }

    Ok(Reply::new(354, "End data with <CR><LF>.<CR><LF>"))
}

/// `XAUTH <secret>`.
fn xauth(command: &Command, shared: &Shared) -> Outcome {
    let secret = command.argument().ok_or_else(|| syntax(Verb::XAuth))?;

    match &shared.config.admin_secret {
        Some(expected) if expected.as_str() == secret.as_str() => {
            Ok(Reply::new(235, "2.7.0 Authentication successful"))
        }
        _ => Err(Reply::new(535, "5.7.8 Authentication credentials invalid")),
    }
}

/// `XFROM <mailbox>`, with or without angle brackets.
fn xfrom(session: &mut Session, command: &Command) -> Outcome {
    let argument = command.argument().ok_or_else(|| syntax(Verb::XFrom))?;
    let mailbox = if argument.as_str().starts_with('<') {
        Mailbox::parse_path(argument)
    } else {
        Mailbox::parse(argument)
    }
    .map_err(|_| syntax(Verb::XFrom))?;

    let reply = Reply::new(250, format!("2.1.0 Mailbox {mailbox} selected"));
    session.selected = Some(mailbox);

    Ok(reply)
}

/// `XGET ALL` or `XGET <dd/mm/yyyy>`: list what the selected mailbox sent, then forget the
/// selection.
fn xget(session: &mut Session, command: &Command, shared: &Shared) -> Outcome {
    let argument = command.argument().ok_or_else(|| syntax(Verb::XGet))?;
    let sender = session
        .selected
        .as_ref()
        .ok_or_else(Reply::bad_sequence)?
        .as_str();
    let registry = &shared.registry;

    let records: Vec<String> = if argument.as_str().eq_ignore_ascii_case("ALL") {
        registry
            .query_by_sender(sender)
            .map(ToString::to_string)
            .collect()
    } else {
        let (start, end) = parse_date(argument.as_bytes())
            .and_then(day_bounds)
            .ok_or_else(|| syntax(Verb::XGet))?;

        registry
            .query_by_time(start, end)
            .filter(|record| record.sender() == sender)
            .map(ToString::to_string)
            .collect()
    };

    session.selected = None;

    Ok(listing(records, shared.config.buffer_size))
}

/// The first and last instant of `day`, in UTC.
fn day_bounds(day: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = day.and_hms_opt(0, 0, 0)?;
    let end = day.and_hms_nano_opt(23, 59, 59, 999_999_999)?;

    Some((Utc.from_utc_datetime(&start), Utc.from_utc_datetime(&end)))
}

/// The number of bytes a reply line with `text` takes up.
fn encoded_len(text: &str) -> usize {
    // Code, separator, text and `CRLF`, cut to the longest reply line.
    (text.len() + 6).min(max_lengths::REPLY_LINE)
}

/// A multi-line `250` with one line per record and a count at the end, dropping trailing
/// records to stay within `limit` bytes.
pub fn listing(records: Vec<String>, limit: usize) -> Reply {
    let total = records.len();
    let summary = |shown: usize| {
        if shown == total {
            format!("2.0.0 {total} message(s)")
        } else {
            format!("2.0.0 {shown} of {total} message(s) listed, the rest did not fit")
        }
    };

    let mut used = 0;
    let mut shown = 0;
    for record in &records {
        let next = used + encoded_len(record);
        if next + encoded_len(&summary(shown + 1)) > limit {
            break;
        }
        used = next;
        shown += 1;
    }
    // Truncating makes the summary longer.
    while shown > 0 && used + encoded_len(&summary(shown)) > limit {
        shown -= 1;
        used -= encoded_len(&records[shown]);
    }

    let mut reply = Reply::new(250, summary(shown));
    for record in records.into_iter().take(shown) {
        reply.insert_before_last(record);
    }

    reply
}

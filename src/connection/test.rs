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

//! Tests for [`session`] and [`state`].

use std::time::Duration;

use ascii::AsciiStr;
use chrono::{TimeZone, Utc};

use super::{
    command::{Command, Verb},
    session::{Action, Response, Session},
    state::{self, State},
    CloseReason,
};
use crate::{
    config::Config,
    delivery::{Delivered, DeliveryError},
    registry::MailRecord,
    shared::Shared,
};

fn shared() -> Shared {
    Shared::new(Config {
        domain: "mx.example".to_owned(),
        admin_secret: Some("sesame".to_owned()),
        max_recipients: 2,
        ..Config::default()
    })
}

fn command(line: &str) -> Command {
    let (name, argument) = line
        .split_once(' ')
        .map_or((line, None), |(name, argument)| (name, Some(argument)));
    fn ascii(text: &str) -> &AsciiStr {
        AsciiStr::from_ascii(text).expect("test commands are ASCII")
    }

    Command::new(ascii(name), argument.map(ascii))
}

/// Send `line`, returning the reply code.
fn send(session: &mut Session, shared: &Shared, line: &str) -> u16 {
    session.handle(&command(line), shared).reply.code()
}

/// A session with a sender and one recipient, ready for `DATA`.
fn ready_for_data(shared: &Shared) -> Session {
    let mut session = Session::new();
    assert_eq!(send(&mut session, shared, "HELO client.example"), 250);
    assert_eq!(send(&mut session, shared, "MAIL FROM:<a@b.example>"), 250);
    assert_eq!(send(&mut session, shared, "RCPT TO:<c@d.example>"), 250);

    session
}

#[test]
fn test_transition_table() {
    assert_eq!(state::next(State::Greeting, Verb::Ehlo), Some(State::From));
    assert_eq!(state::next(State::Data, Verb::Rcpt), Some(State::Data));
    assert_eq!(state::next(State::XGet, Verb::XGet), Some(State::XFrom));
    assert_eq!(state::next(State::Greeting, Verb::Mail), None);
    assert_eq!(state::next(State::To, Verb::Data), None);
    assert_eq!(state::next(State::Body, Verb::Mail), None);
}

#[test]
fn test_greeting() {
    let shared = shared();
    let mut session = Session::new();

    assert_eq!(session.greeting(&shared).to_string(), "220 mx.example ESMTP ready\r\n");

    let Response { reply, action } = session.handle(&command("EHLO client.example"), &shared);
    assert_eq!(action, Action::None);
    assert_eq!(reply.lines()[0], "mx.example Hello client.example");
    assert!(reply.lines().iter().any(|line| line == "XAUTH"));
    assert_eq!(session.state(), State::From);
    assert_eq!(session.client(), Some("client.example"));

    // A greeting needs a name.
    let mut session = Session::new();
    assert_eq!(send(&mut session, &shared, "HELO"), 501);
    assert_eq!(session.state(), State::Greeting);
}

#[test]
fn test_transaction() {
    let shared = shared();
    let mut session = ready_for_data(&shared);

    assert_eq!(send(&mut session, &shared, "RCPT TO:<e@f.example>"), 250);
    assert_eq!(session.state(), State::Data);

    let transaction = session.transaction();
    assert_eq!(
        transaction.sender().map(|sender| sender.as_str()),
        Some("a@b.example")
    );
    assert_eq!(transaction.recipients().len(), 2);

    let Response { reply, action } = session.handle(&command("DATA"), &shared);
    assert_eq!(reply.code(), 354);
    assert_eq!(action, Action::BeginBody);
    assert_eq!(session.state(), State::Body);
}

#[test]
fn test_path_arguments() {
    let shared = shared();
    let mut session = Session::new();
    send(&mut session, &shared, "HELO client.example");

    // The keyword ignores case, and parameters after the path are ignored.
    assert_eq!(send(&mut session, &shared, "MAIL from: <a@b.example> SIZE=100"), 250);
    assert_eq!(send(&mut session, &shared, "RCPT to:<c@d.example>"), 250);

    assert_eq!(send(&mut session, &shared, "RCPT <e@f.example>"), 501);
    assert_eq!(send(&mut session, &shared, "RCPT TO:<not an address>"), 501);
    assert_eq!(session.transaction().recipients().len(), 1);
}

#[test]
fn test_bad_sender_keeps_state() {
    let shared = shared();
    let mut session = Session::new();
    send(&mut session, &shared, "HELO client.example");

    let reply = session.handle(&command("MAIL FROM:<nobody>"), &shared).reply;
    assert_eq!(reply.code(), 501);
    assert!(reply.lines()[0].starts_with("5.1.7"));
    assert_eq!(session.state(), State::From);
    assert_eq!(session.transaction().sender(), None);
}

#[test]
fn test_too_many_recipients() {
    let shared = shared();
    let mut session = ready_for_data(&shared);

    assert_eq!(send(&mut session, &shared, "RCPT TO:<e@f.example>"), 250);
    assert_eq!(send(&mut session, &shared, "RCPT TO:<g@h.example>"), 452);
    assert_eq!(session.transaction().recipients().len(), 2);
}

#[test]
fn test_sequence_errors() {
    let shared = shared();
    let mut session = Session::new();

    assert_eq!(send(&mut session, &shared, "MAIL FROM:<a@b.example>"), 503);
    assert_eq!(send(&mut session, &shared, "DATA"), 503);
    assert_eq!(session.state(), State::Greeting);

    send(&mut session, &shared, "HELO client.example");
    assert_eq!(send(&mut session, &shared, "RCPT TO:<c@d.example>"), 503);
    assert_eq!(send(&mut session, &shared, "XGET ALL"), 503);
    assert_eq!(session.state(), State::From);
}

#[test]
fn test_verbs_in_any_state() {
    let shared = shared();
    let mut session = ready_for_data(&shared);

    assert_eq!(send(&mut session, &shared, "NOOP"), 250);
    assert_eq!(session.state(), State::Data);

    let reply = session.handle(&command("VRFY c@d.example"), &shared).reply;
    assert_eq!((reply.code(), reply.lines()[0].as_str()), (502, "5.5.1 Command not implemented"));
    let reply = session.handle(&command("FROB"), &shared).reply;
    assert_eq!((reply.code(), reply.lines()[0].as_str()), (502, "5.5.2 Command not recognized"));
    assert_eq!(session.state(), State::Data);
}

#[test]
fn test_reset() {
    let shared = shared();
    let mut session = ready_for_data(&shared);

    assert_eq!(send(&mut session, &shared, "RSET"), 250);
    assert_eq!(session.state(), State::From);
    assert_eq!(session.transaction().sender(), None);
    assert!(session.transaction().recipients().is_empty());

    // Before a greeting there is nothing to reset to.
    let mut session = Session::new();
    assert_eq!(send(&mut session, &shared, "RSET"), 250);
    assert_eq!(session.state(), State::Greeting);
}

#[test]
fn test_quit() {
    let shared = shared();
    let mut session = ready_for_data(&shared);

    let Response { reply, action } = session.handle(&command("QUIT"), &shared);
    assert_eq!(reply.to_string(), "221 2.0.0 mx.example closing connection\r\n");
    assert_eq!(action, Action::Close(CloseReason::Quit));
    assert_eq!(session.state(), State::Done);

    // Outside of the administrative sub-protocol, `XQUIT` is `QUIT`.
    let mut session = Session::new();
    let action = session.handle(&command("XQUIT"), &shared).action;
    assert_eq!(action, Action::Close(CloseReason::Quit));
}

#[test]
fn test_admin_flow() {
    let mut shared = shared();
    let day = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
    let other_day = Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap();
    shared.registry.record(MailRecord::new("a@b.example", "c@d.example", day, "mail/d/c/new/1", 10));
    shared.registry.record(MailRecord::new("a@b.example", "e@f.example", other_day, "mail/f/e/new/2", 20));
    shared.registry.record(MailRecord::new("x@y.example", "c@d.example", day, "mail/d/c/new/3", 30));

    let mut session = Session::new();
    send(&mut session, &shared, "HELO client.example");

    assert_eq!(send(&mut session, &shared, "XAUTH wrong"), 535);
    assert_eq!(session.state(), State::From);
    assert_eq!(send(&mut session, &shared, "XAUTH sesame"), 235);
    assert_eq!(session.state(), State::XFrom);

    assert_eq!(send(&mut session, &shared, "XGET ALL"), 503);
    assert_eq!(send(&mut session, &shared, "XFROM a@b.example"), 250);
    assert_eq!(session.state(), State::XGet);

    let reply = session.handle(&command("XGET all"), &shared).reply;
    assert_eq!(reply.code(), 250);
    assert_eq!(reply.lines().len(), 3);
    assert!(reply.lines()[0].contains("c@d.example"));
    assert!(reply.lines()[1].contains("e@f.example"));
    assert_eq!(reply.lines()[2], "2.0.0 2 message(s)");
    assert_eq!(session.state(), State::XFrom);

    // Selecting again, with angle brackets this time, then listing one day.
    assert_eq!(send(&mut session, &shared, "XFROM <a@b.example>"), 250);
    let reply = session.handle(&command("XGET 02/02/2024"), &shared).reply;
    assert_eq!(reply.lines().len(), 2);
    assert!(reply.lines()[0].contains("mail/f/e/new/2"));

    assert_eq!(send(&mut session, &shared, "XFROM a@b.example"), 250);
    assert_eq!(send(&mut session, &shared, "XGET 31/02/2024"), 501);
    assert_eq!(session.state(), State::XGet);

    assert_eq!(send(&mut session, &shared, "XQUIT"), 250);
    assert_eq!(session.state(), State::From);
}

#[test]
fn test_xauth_without_a_secret() {
    let shared = Shared::new(Config::default());
    let mut session = Session::new();
    send(&mut session, &shared, "HELO client.example");

    assert_eq!(send(&mut session, &shared, "XAUTH anything"), 535);
    assert_eq!(session.state(), State::From);
}

#[test]
fn test_body_received() {
    let shared = shared();

    let mut session = ready_for_data(&shared);
    send(&mut session, &shared, "DATA");
    let reply = session.body_received(&Ok(Delivered {
        name: "1700000000_abcdefghij".to_owned(),
        delivered: 1,
        recipients: 1,
    }));
    assert_eq!(reply.to_string(), "250 2.0.0 Ok: queued as 1700000000_abcdefghij\r\n");
    assert_eq!(session.state(), State::Greeting);
    assert_eq!(session.transaction().sender(), None);

    let mut session = ready_for_data(&shared);
    send(&mut session, &shared, "DATA");
    let reply = session.body_received(&Ok(Delivered {
        name: "x".to_owned(),
        delivered: 1,
        recipients: 2,
    }));
    assert!(reply.lines()[0].ends_with("(1 of 2 recipients)"));

    let mut session = ready_for_data(&shared);
    send(&mut session, &shared, "DATA");
    let reply = session.body_received(&Err(DeliveryError::TooLarge { limit: 10 }));
    assert_eq!(reply.code(), 552);

    let reply = session.body_received(&Err(DeliveryError::NoRecipients));
    assert_eq!(reply.code(), 451);

    let mut session = ready_for_data(&shared);
    send(&mut session, &shared, "DATA");
    let timed_out = DeliveryError::FilterTimedOut(Duration::from_secs(600));
    let reply = session.body_received(&Err(timed_out));
    assert_eq!(reply.code(), 451);
    assert_eq!(session.state(), State::Greeting);
}

#[test]
fn test_staging_failed() {
    let shared = shared();
    let mut session = ready_for_data(&shared);
    send(&mut session, &shared, "DATA");

    assert_eq!(session.staging_failed().code(), 451);
    assert_eq!(session.state(), State::From);
    assert!(session.transaction().recipients().is_empty());
}

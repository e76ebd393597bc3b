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

use ascii::AsAsciiStr;

use super::*;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

#[test]
fn test_parse_path() -> Result {
    let mailbox = Mailbox::parse_path("<Smith@Example.COM>".as_ascii_str()?)?;

    assert_eq!(mailbox.local_part(), "Smith".as_ascii_str()?);
    assert_eq!(mailbox.domain(), "example.com".as_ascii_str()?);
    assert_eq!(mailbox.to_string(), "Smith@example.com");

    // The `@` that counts is the last one.
    let mailbox = Mailbox::parse_path("<a@b@c>".as_ascii_str()?)?;
    assert_eq!(mailbox.local_part(), "a@b".as_ascii_str()?);

    Ok(())
}

#[test]
fn test_parse_path_errors() -> Result {
    macro_rules! err {
        ($str:expr, $expected:expr) => {
            assert_eq!(Mailbox::parse_path($str.as_ascii_str()?), Err($expected), "{}", $str)
        };
    }

    err!("nobrackets@d", MailboxError::MissingBrackets);
    err!("<a@d", MailboxError::MissingBrackets);
    err!("<>", MailboxError::MissingAt);
    err!("<ad>", MailboxError::MissingAt);
    err!("<@d>", MailboxError::Empty);
    err!("<a@>", MailboxError::Empty);
    err!("<../x@d>", MailboxError::Forbidden);
    err!("<..@d>", MailboxError::Forbidden);
    err!("<a@..>", MailboxError::Forbidden);
    err!("<a b@d>", MailboxError::Forbidden);
    err!(format!("<{}@d>", "a".repeat(65)), MailboxError::LocalPartTooLong);
    err!(format!("<a@{}>", "d".repeat(256)), MailboxError::PathTooLong);

    Ok(())
}

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

//! Recognizes the `dd/mm/yyyy` date taken by `XGET`.
//!
//! Single-digit days and months (`1/2/2024`) are accepted. The grammar only checks the shape;
//! [`parse_date`] hands the numbers to [`chrono`] to reject dates such as `31/02/2024`.

use std::sync::LazyLock;

use chrono::NaiveDate;

use crate::parser::{ByteSet, Definition, Parser, StateId, StateSpec};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DateState {
    Start,
    Day1,
    Day2,
    DaySlash,
    Month1,
    Month2,
    MonthSlash,
    Year1,
    Year2,
    Year3,
    Year4,
    Error,
}

impl StateId for DateState {
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default, Debug)]
struct Fields {
    day: u32,
    month: u32,
    year: i32,
}

const fn digit(byte: u8) -> u8 {
    byte - b'0'
}

fn push_day(fields: &mut Fields, byte: u8) {
    fields.day = fields.day * 10 + u32::from(digit(byte));
}

fn push_month(fields: &mut Fields, byte: u8) {
    fields.month = fields.month * 10 + u32::from(digit(byte));
}

fn push_year(fields: &mut Fields, byte: u8) {
    fields.year = fields.year * 10 + i32::from(digit(byte));
}

const SLASH: ByteSet = ByteSet::single(b'/');

static GRAMMAR: LazyLock<Definition<DateState, Fields>> = LazyLock::new(|| {
    use DateState::{
        Day1, Day2, DaySlash, Error, Month1, Month2, MonthSlash, Start, Year1, Year2, Year3,
        Year4,
    };
    let digit = ByteSet::DIGIT;

    Definition::new(
        Start,
        Error,
        [
            StateSpec::new(Start).to(digit, Day1),
            StateSpec::new(Day1)
                .on_arrival(push_day)
                .to(digit, Day2)
                .to(SLASH, DaySlash),
            StateSpec::new(Day2).on_arrival(push_day).to(SLASH, DaySlash),
            StateSpec::new(DaySlash).to(digit, Month1),
            StateSpec::new(Month1)
                .on_arrival(push_month)
                .to(digit, Month2)
                .to(SLASH, MonthSlash),
            StateSpec::new(Month2)
                .on_arrival(push_month)
                .to(SLASH, MonthSlash),
            StateSpec::new(MonthSlash).to(digit, Year1),
            StateSpec::new(Year1).on_arrival(push_year).to(digit, Year2),
            StateSpec::new(Year2).on_arrival(push_year).to(digit, Year3),
            StateSpec::new(Year3).on_arrival(push_year).to(digit, Year4),
            StateSpec::new(Year4).final_state().on_arrival(push_year),
            StateSpec::new(Error),
        ],
    )
    .expect("date grammar is well formed")
});

/// Parse `dd/mm/yyyy` into a calendar date.
///
/// Returns `None` if the text does not have that shape or names a day that does not exist.
#[must_use]
pub fn parse_date(text: &[u8]) -> Option<NaiveDate> {
    let mut parser = Parser::new(&GRAMMAR);
    let mut fields = Fields::default();

    for &byte in text {
        if parser.feed(&mut fields, byte) == DateState::Error {
            return None;
        }
    }

    if !parser.is_final() {
        return None;
    }

    NaiveDate::from_ymd_opt(fields.year, fields.month, fields.day)
}

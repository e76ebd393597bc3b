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

//! Maildir directories: `<mail root>/<domain>/<local part>/{tmp,new,cur}`.
//!
//! See <https://cr.yp.to/proto/maildir.html>.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use tracing::debug;

use crate::str::Mailbox;

const SUFFIX_LEN: usize = 10;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Subfolder {
    Tmp,
    New,
    Cur,
}

impl Subfolder {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tmp => "tmp",
            Self::New => "new",
            Self::Cur => "cur",
        }
    }
}

/// `<unix seconds>_<random alphanumerics>`.
#[must_use]
pub fn unique_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();

    format!("{}_{suffix}", Utc::now().timestamp())
}

/// One mailbox's maildir.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Maildir {
    path: PathBuf,
}

impl Maildir {
    /// The maildir of `mailbox` under `mail_dir`.
    ///
    /// [`Mailbox`] guarantees both of its halves are single, safe path components.
    #[must_use]
    pub fn for_mailbox(mail_dir: &Path, mailbox: &Mailbox) -> Self {
        Self {
            path: mail_dir
                .join(mailbox.domain().as_str())
                .join(mailbox.local_part().as_str()),
        }
    }

    #[must_use]
    pub fn subfolder(&self, subfolder: Subfolder) -> PathBuf {
        self.path.join(subfolder.as_str())
    }

    /// Create `tmp`, `new` and `cur`, along with any missing parents.
    ///
    /// # Errors
    ///
    /// See [`fs::create_dir_all`].
    pub fn create_dirs(&self) -> io::Result<()> {
        for subfolder in [Subfolder::Tmp, Subfolder::New, Subfolder::Cur] {
            fs::create_dir_all(self.subfolder(subfolder))?;
        }

        Ok(())
    }

    /// Create a new, empty file with a fresh [`unique_name`] in `subfolder`.
    ///
    /// # Errors
    ///
    /// Any error from creating the file, other than a name collision, which is retried.
    pub fn create_unique(&self, subfolder: Subfolder) -> io::Result<(PathBuf, File)> {
        let folder = self.subfolder(subfolder);

        loop {
            let path = folder.join(unique_name());
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
                Err(error) => return Err(error),
            }
        }
    }

    /// Place a copy of `staged` under `new`, returning its path.
    ///
    /// Hard links when possible, and copies otherwise. A failed copy leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Any error from creating, reading or writing the files involved.
    pub fn deliver(&self, staged: &Path) -> io::Result<PathBuf> {
        let new = self.subfolder(Subfolder::New);

        loop {
            let target = new.join(unique_name());
            match fs::hard_link(staged, &target) {
                Ok(()) => return Ok(target),
                Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
                Err(error) => {
                    debug!(%error, "cannot hard link, copying instead");
                    break;
                }
            }
        }

        let (target, mut file) = self.create_unique(Subfolder::New)?;
        let copied = File::open(staged).and_then(|mut source| io::copy(&mut source, &mut file));
        if let Err(error) = copied {
            fs::remove_file(&target).ok();
            return Err(error);
        }

        Ok(target)
    }
}

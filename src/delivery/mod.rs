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

//! Staging a DATA body to disk, optionally through a transform program, and delivering it into
//! every recipient's maildir.
//!
//! A [`Staging`] is created when a transaction enters its body. The staged file lives in the
//! sender's `tmp` folder and starts with a transcript of the transaction:
//!
//! ```text
//! MAIL FROM: <sender>
//! RCPT TO: <recipient>      (once per recipient)
//! DATA
//! ```
//!
//! followed by the body. Once the body is complete, [`Staging::deliver`] links (or copies) the
//! staged file into each recipient's `new` folder, records each delivery in the
//! [`crate::registry::AccessRegistry`], and removes the staged file. One recipient failing does
//! not stop delivery to the others.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    registry::MailRecord,
    selector::{Control, SelectorError},
    shared::Shared,
    str::{Mailbox, CRLF},
};
use maildir::{Maildir, Subfolder};
use transform::Filter;

pub mod maildir;
pub mod transform;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("could not start transform program {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not watch transform pipes: {0}")]
    Register(#[from] SelectorError),
    #[error("transform program failed: {0}")]
    FilterFailed(ExitStatus),
    #[error("transform program stopped reading its input")]
    FilterBroken,
    #[error("transform program did not finish within {0:?}")]
    FilterTimedOut(Duration),
    #[error("message is larger than {limit} bytes")]
    TooLarge { limit: usize },
    #[error("delivery failed for every recipient")]
    NoRecipients,
}

/// What a finished delivery achieved.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Delivered {
    /// The staged file's name, used as the queue identifier in replies.
    pub name: String,
    pub delivered: usize,
    pub recipients: usize,
}

impl Delivered {
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.delivered < self.recipients
    }
}

/// The staged file, removed when dropped.
#[derive(Debug)]
struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %error, "could not remove staged file");
            }
        }
    }
}

#[derive(Debug)]
enum Sink {
    File(File),
    Filter(Filter),
}

/// A message body on its way to disk.
#[derive(Debug)]
pub struct Staging {
    sender: Mailbox,
    recipients: Vec<Mailbox>,
    staged: StagedFile,
    sink: Sink,
    /// Body bytes received so far.
    received: usize,
    limit: usize,
    finished: bool,
}

impl Staging {
    /// Create the staged file, start the transform if it is on, and write the transcript header.
    ///
    /// `ctl` must be the dispatch of the connection the body belongs to; it is woken when the
    /// transform completes.
    ///
    /// # Errors
    ///
    /// Any [`DeliveryError`] from creating the file or starting the transform. Nothing is left
    /// behind on failure.
    pub fn begin(
        ctl: &mut Control<'_, Shared>,
        sender: &Mailbox,
        recipients: &[Mailbox],
    ) -> Result<Self, DeliveryError> {
        let shared = ctl.state();
        let maildir = Maildir::for_mailbox(&shared.config.mail_dir, sender);
        let limit = shared.config.max_message_size;
        let program = shared.transform.active_program().map(Path::to_path_buf);

        maildir.create_dirs()?;
        let (path, file) = maildir.create_unique(Subfolder::Tmp)?;
        let staged = StagedFile { path };

        let sink = match program {
            Some(program) => Sink::Filter(Filter::spawn(&program, file, ctl)?),
            None => Sink::File(file),
        };
        debug!(path = %staged.path.display(), "staging message");

        let mut staging = Self {
            sender: sender.clone(),
            recipients: recipients.to_vec(),
            staged,
            sink,
            received: 0,
            limit,
            finished: false,
        };
        if let Err(error) = staging.forward(&transcript_header(sender, recipients), ctl) {
            staging.abort(ctl);
            return Err(error);
        }

        Ok(staging)
    }

    /// Append body bytes. Bytes past the size limit are counted, but not kept.
    ///
    /// # Errors
    ///
    /// Any error writing to the staged file.
    pub fn write(
        &mut self,
        bytes: &[u8],
        ctl: &mut Control<'_, Shared>,
    ) -> Result<(), DeliveryError> {
        self.received = self.received.saturating_add(bytes.len());
        if self.is_oversized() {
            return Ok(());
        }

        self.forward(bytes, ctl)
    }

    /// Mark the body as complete.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::TooLarge`] if the body went over the limit, or any error writing to the
    /// staged file.
    pub fn finish(&mut self, ctl: &mut Control<'_, Shared>) -> Result<(), DeliveryError> {
        if self.is_oversized() {
            return Err(DeliveryError::TooLarge { limit: self.limit });
        }
        if self.received > 0 {
            self.forward(CRLF.as_bytes(), ctl)?;
        }

        self.finished = true;
        if let Sink::Filter(filter) = &mut self.sink {
            filter.close_input(ctl);
        }

        Ok(())
    }

    /// `Some` once the staged file is complete: right after [`Self::finish`] without a
    /// transform, or once the transform has exited.
    pub fn take_outcome(&mut self) -> Option<Result<(), DeliveryError>> {
        match &mut self.sink {
            Sink::File(_) => self.finished.then_some(Ok(())),
            Sink::Filter(filter) if self.finished => filter.take_outcome(),
            Sink::Filter(_) => None,
        }
    }

    /// Whether the connection should stop reading until the transform catches up.
    #[must_use]
    pub fn is_backlogged(&self) -> bool {
        match &self.sink {
            Sink::File(_) => false,
            Sink::Filter(filter) => filter.is_paused(),
        }
    }

    #[must_use]
    pub const fn is_oversized(&self) -> bool {
        self.received > self.limit
    }

    /// Deliver the staged file to every recipient.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Io`] if the staged file cannot be inspected.
    /// - [`DeliveryError::NoRecipients`] if every recipient failed.
    pub fn deliver(self, ctl: &mut Control<'_, Shared>) -> Result<Delivered, DeliveryError> {
        let Self {
            sender,
            recipients,
            staged,
            sink,
            ..
        } = self;
        if let Sink::Filter(filter) = sink {
            filter.release(ctl);
        }

        let size = fs::metadata(&staged.path)?.len();
        let shared = ctl.state();
        let mut delivered = 0;

        for recipient in &recipients {
            let maildir = Maildir::for_mailbox(&shared.config.mail_dir, recipient);
            let result = maildir
                .create_dirs()
                .and_then(|()| maildir.deliver(&staged.path));

            match result {
                Ok(path) => {
                    info!(%sender, %recipient, path = %path.display(), size, "delivered");
                    shared.registry.record(MailRecord::new(
                        sender.as_str(),
                        recipient.as_str(),
                        Utc::now(),
                        path,
                        size,
                    ));
                    delivered += 1;
                }
                Err(error) => warn!(%sender, %recipient, %error, "delivery failed"),
            }
        }

        if delivered == 0 {
            return Err(DeliveryError::NoRecipients);
        }

        Ok(Delivered {
            name: staged.name(),
            delivered,
            recipients: recipients.len(),
        })
    }

    /// Give up on the transaction, stopping the transform and removing the staged file.
    pub fn abort(self, ctl: &mut Control<'_, Shared>) {
        debug!(path = %self.staged.path.display(), "aborting staged message");

        if let Sink::Filter(filter) = self.sink {
            filter.release(ctl);
        }
    }

    fn forward(
        &mut self,
        bytes: &[u8],
        ctl: &mut Control<'_, Shared>,
    ) -> Result<(), DeliveryError> {
        match &mut self.sink {
            Sink::File(file) => file.write_all(bytes)?,
            Sink::Filter(filter) => filter.push(bytes, ctl),
        }

        Ok(())
    }
}

fn transcript_header(sender: &Mailbox, recipients: &[Mailbox]) -> Vec<u8> {
    let mut header = format!("MAIL FROM: <{sender}>{CRLF}");
    for recipient in recipients {
        header.push_str(&format!("RCPT TO: <{recipient}>{CRLF}"));
    }
    header.push_str("DATA");
    header.push_str(CRLF);

    header.into_bytes()
}

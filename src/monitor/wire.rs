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

//! The monitor's fixed 14 byte datagrams.
//!
//! Request, all fields big-endian:
//!
//! ```text
//! 0..2   signature   always SIGNATURE
//! 2      version     always VERSION
//! 3..5   request id  echoed back
//! 5..13  token       shared secret
//! 13     command     see Command
//! ```
//!
//! Response: signature, version and request id as in the request, the [`Status`] at 5, then the
//! payload starting at 6, padded with zeroes to 14 bytes.

/// The first two bytes of every monitor datagram.
pub const SIGNATURE: u16 = 0xfffe;
/// The only protocol version there is.
pub const VERSION: u8 = 0;
/// The exact length of every request and response.
pub const MESSAGE_LEN: usize = 14;
/// The token a server accepts unless configured otherwise.
pub const DEFAULT_TOKEN: u64 = 0xffe9_1a2b_3c4d_5e6f;

const PAYLOAD: usize = 6;

#[repr(u8)]
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Command {
    /// Connections accepted since start-up, as a `u32`.
    HistoricalConnections = 0,
    /// Connections open right now, as a `u32`.
    CurrentConnections = 1,
    /// Bytes written to SMTP clients since start-up, as a `u64`.
    SentBytes = 2,
    /// Whether the transform program is in use, as one byte.
    TransformStatus = 3,
    TransformOn = 4,
    TransformOff = 5,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::HistoricalConnections,
            1 => Self::CurrentConnections,
            2 => Self::SentBytes,
            3 => Self::TransformStatus,
            4 => Self::TransformOn,
            5 => Self::TransformOff,
            other => return Err(other),
        })
    }
}

#[repr(u8)]
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Status {
    Success = 0,
    InvalidVersion = 1,
    AuthFailed = 2,
    InvalidCommand = 3,
    InvalidLength = 4,
    /// The command was valid, but could not be carried out.
    Unexpected = 5,
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Success,
            1 => Self::InvalidVersion,
            2 => Self::AuthFailed,
            3 => Self::InvalidCommand,
            4 => Self::InvalidLength,
            5 => Self::Unexpected,
            other => return Err(other),
        })
    }
}

/// A request that passed every check.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Request {
    pub request_id: u16,
    pub token: u64,
    pub command: Command,
}

impl Request {
    #[must_use]
    pub const fn new(request_id: u16, token: u64, command: Command) -> Self {
        Self {
            request_id,
            token,
            command,
        }
    }

    /// Encode the request as a client would send it.
    #[must_use]
    pub fn encode(&self) -> [u8; MESSAGE_LEN] {
        let mut bytes = [0; MESSAGE_LEN];
        bytes[0..2].copy_from_slice(&SIGNATURE.to_be_bytes());
        bytes[2] = VERSION;
        bytes[3..5].copy_from_slice(&self.request_id.to_be_bytes());
        bytes[5..13].copy_from_slice(&self.token.to_be_bytes());
        bytes[13] = self.command as u8;

        bytes
    }
}

/// Why a datagram was not accepted as a [`Request`].
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Rejection {
    /// Not recognizably a monitor datagram; do not answer it.
    Drop,
    /// Answer with this error response.
    Reply(Response),
}

/// Validate a datagram against the wire format and `token`.
///
/// Checks run in order and the first failure wins: length too short and signature (dropped),
/// then version, token, command and finally the exact length.
///
/// # Errors
///
/// Returns the [`Rejection`] of the first failed check.
pub fn parse_request(datagram: &[u8], token: u64) -> Result<Request, Rejection> {
    if datagram.len() < MESSAGE_LEN {
        return Err(Rejection::Drop);
    }
    if u16::from_be_bytes([datagram[0], datagram[1]]) != SIGNATURE {
        return Err(Rejection::Drop);
    }

    let version = datagram[2];
    let request_id = u16::from_be_bytes([datagram[3], datagram[4]]);
    let reject = |status| Err(Rejection::Reply(Response::error(version, request_id, status)));

    if version != VERSION {
        return reject(Status::InvalidVersion);
    }

    let mut token_bytes = [0; 8];
    token_bytes.copy_from_slice(&datagram[5..13]);
    if u64::from_be_bytes(token_bytes) != token {
        return reject(Status::AuthFailed);
    }

    let Ok(command) = Command::try_from(datagram[13]) else {
        return reject(Status::InvalidCommand);
    };
    if datagram.len() != MESSAGE_LEN {
        return reject(Status::InvalidLength);
    }

    Ok(Request::new(request_id, token, command))
}

/// Command-specific response data.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Payload {
    None,
    Count(u32),
    Bytes(u64),
    Flag(bool),
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Response {
    pub version: u8,
    pub request_id: u16,
    pub status: Status,
    pub payload: Payload,
}

impl Response {
    #[must_use]
    pub const fn new(request_id: u16, status: Status, payload: Payload) -> Self {
        Self {
            version: VERSION,
            request_id,
            status,
            payload,
        }
    }

    /// A response without payload, echoing whatever version the request claimed.
    #[must_use]
    pub const fn error(version: u8, request_id: u16, status: Status) -> Self {
        Self {
            version,
            request_id,
            status,
            payload: Payload::None,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; MESSAGE_LEN] {
        let mut bytes = [0; MESSAGE_LEN];
        bytes[0..2].copy_from_slice(&SIGNATURE.to_be_bytes());
        bytes[2] = self.version;
        bytes[3..5].copy_from_slice(&self.request_id.to_be_bytes());
        bytes[5] = self.status as u8;

        match self.payload {
            Payload::None => {}
            Payload::Count(count) => {
                bytes[PAYLOAD..PAYLOAD + 4].copy_from_slice(&count.to_be_bytes());
            }
            Payload::Bytes(sent) => bytes[PAYLOAD..].copy_from_slice(&sent.to_be_bytes()),
            Payload::Flag(flag) => bytes[PAYLOAD] = u8::from(flag),
        }

        bytes
    }

    /// Decode a response to `command`, as a client would.
    ///
    /// Returns `None` if `bytes` is not a well-formed response.
    #[must_use]
    pub fn decode(bytes: &[u8], command: Command) -> Option<Self> {
        if bytes.len() != MESSAGE_LEN || u16::from_be_bytes([bytes[0], bytes[1]]) != SIGNATURE {
            return None;
        }

        let status = Status::try_from(bytes[5]).ok()?;
        let payload = &bytes[PAYLOAD..];
        let payload = match (status, command) {
            (Status::Success, Command::HistoricalConnections | Command::CurrentConnections) => {
                Payload::Count(u32::from_be_bytes(payload[..4].try_into().ok()?))
            }
            (Status::Success, Command::SentBytes) => {
                Payload::Bytes(u64::from_be_bytes(payload.try_into().ok()?))
            }
            (_, Command::TransformStatus | Command::TransformOn | Command::TransformOff)
                if matches!(status, Status::Success | Status::Unexpected) =>
            {
                Payload::Flag(payload[0] != 0)
            }
            _ => Payload::None,
        };

        Some(Self {
            version: bytes[2],
            request_id: u16::from_be_bytes([bytes[3], bytes[4]]),
            status,
            payload,
        })
    }
}

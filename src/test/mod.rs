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

//! End-to-end tests: a real [`crate::Server`] on loopback, driven over TCP and UDP.

use std::{
    error::Error,
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    thread::JoinHandle,
    time::Duration,
};

use tempfile::TempDir;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, UdpSocket,
    },
    sync::oneshot,
};

use crate::{
    config::Config,
    monitor::wire::{Command, Payload, Request, Response, Status, DEFAULT_TOKEN, MESSAGE_LEN},
    timeouts,
};


type Result<T = ()> = std::result::Result<T, Box<dyn Error>>;

/// Read one line, `CRLF` included, giving up after [`timeouts::EXPECTED`].
///
/// Resolves to an empty string at end of file.
macro_rules! read_line {
    ($reader:expr) => {
        async {
            let read = async {
                let mut line = ::std::string::String::new();
                ::tokio::io::AsyncBufReadExt::read_line(&mut $reader, &mut line).await?;
                ::std::io::Result::Ok(line)
            };

            match ::tokio::time::timeout($crate::timeouts::EXPECTED, read).await {
                Ok(result) => result,
                Err(elapsed) => Err(::std::io::Error::new(::std::io::ErrorKind::TimedOut, elapsed)),
            }
        }
    };
}

/// Write `line` followed by `CRLF`.
macro_rules! write_line {
    ($writer:expr, $line:expr) => {
        ::tokio::io::AsyncWriteExt::write_all(&mut $writer, format!("{}\r\n", $line).as_bytes())
            .await
    };
}

/// A server running on its own thread, shut down when dropped.
struct TestServer {
    smtp: SocketAddr,
    monitor: SocketAddr,
    mail_dir: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<std::result::Result<(), crate::Error>>>,
}

impl TestServer {
    fn start(configure: impl FnOnce(&mut Config)) -> Result<Self> {
        let mail_dir = tempfile::tempdir()?;
        let mut config = Config {
            port: 0,
            monitor_port: 0,
            bind: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            mail_dir: mail_dir.path().to_path_buf(),
            domain: "mx.example".to_owned(),
            admin_secret: Some("sesame".to_owned()),
            select_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        configure(&mut config);

        let server = crate::Server::bind(config)?;
        let smtp = server.local_addr()?;
        let monitor = server.monitor_addr()?;

        let (shutdown, stop) = oneshot::channel::<()>();
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;

            runtime.block_on(server.run(async {
                let _ = stop.await;
            }))
        });

        Ok(Self {
            smtp,
            monitor,
            mail_dir,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    fn path(&self, parts: &[&str]) -> PathBuf {
        parts
            .iter()
            .fold(self.mail_dir.path().to_path_buf(), |path, part| path.join(part))
    }

    async fn connect(&self) -> Result<Client> {
        let (read_stream, write_stream) = TcpStream::connect(self.smtp).await?.into_split();

        Ok(Client {
            reader: BufReader::new(read_stream),
            writer: write_stream,
        })
    }

    async fn query(&self, command: Command) -> Result<Response> {
        self.query_with(DEFAULT_TOKEN, command).await
    }

    async fn query_with(&self, token: u64, command: Command) -> Result<Response> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        socket
            .send_to(&Request::new(7, token, command).encode(), self.monitor)
            .await?;

        let mut bytes = [0; MESSAGE_LEN];
        let length =
            tokio::time::timeout(timeouts::EXPECTED, socket.recv(&mut bytes)).await??;

        Ok(Response::decode(&bytes[..length], command).ok_or("malformed monitor response")?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let result = thread.join().expect("server thread panicked");
            if !std::thread::panicking() {
                result.expect("server failed");
            }
        }
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Read a whole reply, returning every line without its line ending.
    async fn reply(&mut self) -> Result<(u16, Vec<String>)> {
        let mut lines = Vec::new();

        loop {
            let line = read_line!(self.reader).await?;
            assert!(is_valid_response::smtp_line(&line), "bad reply line {line:?}");

            let code = is_valid_response::code(&line).ok_or("reply without a code")?;
            let last = is_valid_response::is_last_line(&line);
            lines.push(line[4..line.len() - 2].to_owned());

            if last {
                return Ok((code, lines));
            }
        }
    }

    /// Send `line` and return the reply code.
    async fn send(&mut self, line: &str) -> Result<u16> {
        write_line!(self.writer, line)?;

        Ok(self.reply().await?.0)
    }

    async fn greeted(server: &TestServer) -> Result<Self> {
        let mut client = server.connect().await?;
        assert!(is_valid_response::server_greeting(
            &read_line!(client.reader).await?
        ));

        Ok(client)
    }

    async fn expect_eof(&mut self) -> Result {
        assert_eq!(read_line!(self.reader).await?, "");

        Ok(())
    }
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        files.push(entry?.path());
    }

    Ok(files)
}

// 4.5.1 Minimum Implementation:
//
// - [x] `EHLO`
// - [x] `HELO`
// - [x] `MAIL`
// - [x] `RCPT`
// - [x] `DATA`
// - [x] `RSET`
// - [x] `NOOP`
// - [ ] `VRFY`
// - [x] `QUIT`
//
// <https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.1>
#[tokio::test]
async fn test_mail_transaction() -> Result {
    let server = TestServer::start(|_| {})?;
    let mut client = Client::greeted(&server).await?;

    write_line!(client.writer, "EHLO client.example")?;
    let (code, lines) = client.reply().await?;
    assert_eq!(code, 250);
    assert_eq!(lines[0], "mx.example Hello client.example");
    assert!(lines.iter().any(|line| line == "XAUTH"));

    assert_eq!(client.send("MAIL FROM:<a@b.example>").await?, 250);
    assert_eq!(client.send("RCPT TO:<c@d.example>").await?, 250);
    assert_eq!(client.send("RCPT TO:<e@f.example>").await?, 250);
    assert_eq!(client.send("DATA").await?, 354);

    client
        .writer
        .write_all(b"Subject: hi\r\n\r\n..dotted\r\n.\r\n")
        .await?;
    let (code, lines) = client.reply().await?;
    assert_eq!(code, 250);
    assert!(lines[0].starts_with("2.0.0 Ok: queued as "));

    let expected = "MAIL FROM: <a@b.example>\r\n\
                    RCPT TO: <c@d.example>\r\n\
                    RCPT TO: <e@f.example>\r\n\
                    DATA\r\n\
                    Subject: hi\r\n\r\n.dotted\r\n";
    for (domain, local) in [("d.example", "c"), ("f.example", "e")] {
        let delivered = files_in(&server.path(&[domain, local, "new"]))?;
        assert_eq!(delivered.len(), 1);
        assert_eq!(fs::read_to_string(&delivered[0])?, expected);
    }
    // The staged copy is gone.
    assert!(files_in(&server.path(&["b.example", "a", "tmp"]))?.is_empty());

    // After a message, the client greets again.
    assert_eq!(client.send("MAIL FROM:<a@b.example>").await?, 503);
    write_line!(client.writer, "HELO client.example")?;
    assert!(is_valid_response::helo(&read_line!(client.reader).await?));

    assert_eq!(client.send("XAUTH sesame").await?, 235);
    assert_eq!(client.send("XFROM a@b.example").await?, 250);
    write_line!(client.writer, "XGET ALL")?;
    let (code, lines) = client.reply().await?;
    assert_eq!(code, 250);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("a@b.example c@d.example"));
    assert_eq!(lines[2], "2.0.0 2 message(s)");

    write_line!(client.writer, "QUIT")?;
    assert!(is_valid_response::quit(&read_line!(client.reader).await?));
    client.expect_eof().await?;

    Ok(())
}

#[tokio::test]
async fn test_pipelined_commands_answered_in_order() -> Result {
    let server = TestServer::start(|_| {})?;
    let mut client = Client::greeted(&server).await?;

    client
        .writer
        .write_all(b"HELO client.example\r\nMAIL FROM:<nobody>\r\nNOOP\r\nFROB\r\n")
        .await?;

    assert_eq!(client.reply().await?.0, 250);
    assert_eq!(client.reply().await?.0, 501);
    assert_eq!(client.reply().await?.0, 250);
    assert_eq!(client.reply().await?.0, 502);

    Ok(())
}

#[tokio::test]
async fn test_errors_keep_the_session() -> Result {
    let server = TestServer::start(|_| {})?;
    let mut client = Client::greeted(&server).await?;

    assert_eq!(client.send("DATA").await?, 503);
    assert_eq!(client.send("HELO client.example").await?, 250);
    assert_eq!(client.send("MAIL FROM:<not an address>").await?, 501);
    assert_eq!(client.send("MAIL FROM:<a@b.example>").await?, 250);
    assert_eq!(client.send("RSET").await?, 250);
    assert_eq!(client.send("RCPT TO:<c@d.example>").await?, 503);
    assert_eq!(client.send("VRFY c@d.example").await?, 502);

    // A line the grammar rejects.
    client.writer.write_all(b"HELO caf\xc3\xa9\r\n").await?;
    assert_eq!(client.reply().await?.0, 500);

    assert_eq!(client.send("NOOP").await?, 250);

    Ok(())
}

#[tokio::test]
async fn test_oversized_message() -> Result {
    let server = TestServer::start(|config| config.max_message_size = 16)?;
    let mut client = Client::greeted(&server).await?;

    client.send("HELO client.example").await?;
    client.send("MAIL FROM:<a@b.example>").await?;
    client.send("RCPT TO:<c@d.example>").await?;
    assert_eq!(client.send("DATA").await?, 354);

    client
        .writer
        .write_all(b"this line is longer than sixteen bytes\r\n.\r\n")
        .await?;
    assert_eq!(client.reply().await?.0, 552);

    assert!(!server.path(&["d.example", "c", "new"]).exists());
    assert!(files_in(&server.path(&["b.example", "a", "tmp"]))?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_monitor_counters() -> Result {
    let server = TestServer::start(|_| {})?;

    let response = server.query(Command::CurrentConnections).await?;
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.request_id, 7);
    assert_eq!(response.payload, Payload::Count(0));

    let mut client = Client::greeted(&server).await?;
    assert_eq!(
        server.query(Command::CurrentConnections).await?.payload,
        Payload::Count(1)
    );

    write_line!(client.writer, "QUIT")?;
    assert!(is_valid_response::quit(&read_line!(client.reader).await?));
    client.expect_eof().await?;

    assert_eq!(
        server.query(Command::CurrentConnections).await?.payload,
        Payload::Count(0)
    );
    assert_eq!(
        server.query(Command::HistoricalConnections).await?.payload,
        Payload::Count(1)
    );
    let Payload::Bytes(sent) = server.query(Command::SentBytes).await?.payload else {
        panic!("sent bytes without a byte count");
    };
    assert!(sent > 0);

    Ok(())
}

#[tokio::test]
async fn test_monitor_rejects_bad_token() -> Result {
    let server = TestServer::start(|_| {})?;

    let response = server
        .query_with(DEFAULT_TOKEN ^ 1, Command::TransformOff)
        .await?;
    assert_eq!(response.status, Status::AuthFailed);
    assert_eq!(response.payload, Payload::None);

    Ok(())
}

#[tokio::test]
async fn test_transform() -> Result {
    let server = TestServer::start(|config| config.transform = Some(PathBuf::from("/bin/cat")))?;

    assert_eq!(
        server.query(Command::TransformStatus).await?.payload,
        Payload::Flag(true)
    );

    let mut client = Client::greeted(&server).await?;
    client.send("HELO client.example").await?;
    client.send("MAIL FROM:<a@b.example>").await?;
    client.send("RCPT TO:<c@d.example>").await?;
    assert_eq!(client.send("DATA").await?, 354);

    let line = "x".repeat(70);
    for _ in 0..2000 {
        write_line!(client.writer, line)?;
    }
    write_line!(client.writer, ".")?;
    let (code, lines) = client.reply().await?;
    assert_eq!(code, 250, "{lines:?}");

    let delivered = files_in(&server.path(&["d.example", "c", "new"]))?;
    assert_eq!(delivered.len(), 1);
    let content = fs::read_to_string(&delivered[0])?;
    assert!(content.starts_with("MAIL FROM: <a@b.example>\r\nRCPT TO: <c@d.example>\r\nDATA\r\n"));
    assert_eq!(content.matches(&line).count(), 2000);

    // Switched off, messages go straight to disk.
    assert_eq!(
        server.query(Command::TransformOff).await?.payload,
        Payload::Flag(false)
    );
    client.send("HELO client.example").await?;
    client.send("MAIL FROM:<a@b.example>").await?;
    client.send("RCPT TO:<c@d.example>").await?;
    assert_eq!(client.send("DATA").await?, 354);
    assert_eq!(client.send("plain\r\n.").await?, 250);

    assert_eq!(files_in(&server.path(&["d.example", "c", "new"]))?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_stalled_transform_is_stopped() -> Result {
    // Reads the whole message, then never closes its output.
    let scripts = tempfile::tempdir()?;
    let script = scripts.path().join("stall.sh");
    fs::write(&script, "#!/bin/sh\ncat >/dev/null\nexec sleep 30\n")?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

    let server = TestServer::start(|config| {
        config.transform = Some(script);
        config.filter_timeout = Duration::from_millis(300);
    })?;
    let mut client = Client::greeted(&server).await?;
    client.send("HELO client.example").await?;
    client.send("MAIL FROM:<a@b.example>").await?;
    client.send("RCPT TO:<c@d.example>").await?;
    assert_eq!(client.send("DATA").await?, 354);

    write_line!(client.writer, "hello\r\n.")?;
    let (code, lines) = client.reply().await?;
    assert_eq!(code, 451, "{lines:?}");

    // The session survives, and nothing is left staged.
    assert_eq!(client.send("NOOP").await?, 250);
    assert!(files_in(&server.path(&["b.example", "a", "tmp"]))?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_idle_client_is_disconnected() -> Result {
    let server = TestServer::start(|config| config.idle_timeout = Duration::from_millis(200))?;
    let mut client = Client::greeted(&server).await?;

    let (code, lines) = client.reply().await?;
    assert_eq!(code, 421);
    assert!(lines[0].starts_with("4.4.2"));
    client.expect_eof().await?;

    Ok(())
}

#[tokio::test]
async fn test_too_many_connections() -> Result {
    // The listener and the monitor take two of the three registrations.
    let server = TestServer::start(|config| config.max_connections = 3)?;
    let _first = Client::greeted(&server).await?;

    let mut second = server.connect().await?;
    let (code, lines) = second.reply().await?;
    assert_eq!(code, 421);
    assert_eq!(lines[0], "4.3.2 Too many connections");
    second.expect_eof().await?;

    Ok(())
}

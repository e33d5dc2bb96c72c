//! Minimal async client for MPD's line protocol.
//!
//! Every command is answered by zero or more `key: value` lines followed by
//! `OK`, or by a single `ACK [code@index] {command} message` line.

use std::collections::HashMap;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const GREETING_PREFIX: &str = "OK MPD ";

/// Longest response line accepted, newline included.
pub const MAX_LINE_LEN: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error talking to mpd: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected greeting {0:?}")]
    Greeting(String),
    #[error("mpd rejected command: {0}")]
    Ack(String),
    #[error("connection closed by mpd")]
    Closed,
    #[error("response line longer than {0} bytes")]
    LineTooLong(u64),
}

/// Attributes of one command response. MPD repeats keys for list commands;
/// the status commands used here never do, so the last value wins.
pub type Attributes = HashMap<String, String>;

pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    version: String,
    timeout: Duration,
}

impl Connection {
    /// Connect, read the greeting and authenticate when a password is set.
    pub async fn connect(
        addr: &str,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout(timeout))??;
        let (read, writer) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read),
            writer,
            version: String::new(),
            timeout,
        };

        let greeting = conn.read_line().await?;
        let version = greeting
            .strip_prefix(GREETING_PREFIX)
            .ok_or_else(|| ProtocolError::Greeting(greeting.clone()))?;
        conn.version = version.trim().to_owned();

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            conn.command(&format!("password {}", quote(password)))
                .await?;
        }
        Ok(conn)
    }

    /// Protocol version announced in the greeting, e.g. `0.23.5`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn command(&mut self, command: &str) -> Result<Attributes, ProtocolError> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut attrs = Attributes::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(attrs);
            }
            if let Some(message) = line.strip_prefix("ACK ") {
                return Err(ProtocolError::Ack(message.to_owned()));
            }
            if let Some((key, value)) = line.split_once(": ") {
                attrs.insert(key.to_owned(), value.to_owned());
            }
        }
    }

    async fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut line = String::new();
        let mut limited = (&mut self.reader).take(MAX_LINE_LEN);
        let read = tokio::time::timeout(self.timeout, limited.read_line(&mut line))
            .await
            .map_err(|_| ProtocolError::Timeout(self.timeout))??;
        if !line.ends_with('\n') {
            if read as u64 >= MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong(MAX_LINE_LEN));
            }
            return Err(ProtocolError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }
}

/// Quote an argument the way MPD expects.
fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

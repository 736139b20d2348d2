//! `gatttool` backend.
//!
//! Runs BlueZ's `gatttool -I` as a child process and talks to it over its
//! stdin/stdout. The child is the helper process the watchdog looks for:
//! when BlueZ wedges, killing it makes the next read fail fast and the poll
//! loop reconnects with a fresh child.

use super::{BoxFuture, Link, Notification, SessionError, Transport};
use crate::mac_address::MacAddress;
use log::{debug, trace};
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, timeout, timeout_at};

/// How long `connect` may take before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for a write-request confirmation.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One line of interactive `gatttool` output, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Connected,
    Written,
    Notification(Notification),
    Error(String),
    Other,
}

/// Remove ANSI escape sequences (`ESC [ ... letter`) and carriage returns
/// that `gatttool`'s readline prompt mixes into its output.
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => {
                if chars.next() == Some('[') {
                    for c in chars.by_ref() {
                        if c.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// Parse `Notification handle = 0x0036 value: 66 08 2d 86 0b`.
fn parse_notification(line: &str) -> Option<Notification> {
    let (_, rest) = line
        .split_once("Notification handle = ")
        .or_else(|| line.split_once("Indication   handle = "))?;
    let (handle, value) = rest.split_once("value:")?;
    let handle = u16::from_str_radix(handle.trim().trim_start_matches("0x"), 16).ok()?;
    let value = value
        .split_whitespace()
        .map(|b| u8::from_str_radix(b, 16))
        .collect::<Result<Vec<u8>, _>>()
        .ok()?;
    Some(Notification { handle, value })
}

/// Classify a raw output line.
pub fn classify(raw: &str) -> Line {
    let line = strip_ansi(raw);
    if let Some(n) = parse_notification(&line) {
        return Line::Notification(n);
    }
    if line.contains("Connection successful") {
        return Line::Connected;
    }
    if line.contains("Characteristic value was written successfully") {
        return Line::Written;
    }
    let lower = line.to_lowercase();
    if lower.contains("error")
        || lower.contains("failed")
        || lower.contains("disconnected")
        || lower.contains("invalid file descriptor")
    {
        return Line::Error(line.trim().to_string());
    }
    Line::Other
}

/// Hex-encode a value the way `gatttool` expects it (`0100`).
fn hex(value: &[u8]) -> String {
    value.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Transport spawning one `gatttool` child per connection.
#[derive(Debug, Clone)]
pub struct GatttoolTransport {
    program: String,
}

impl Default for GatttoolTransport {
    fn default() -> Self {
        Self::new("gatttool")
    }
}

impl GatttoolTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Transport for GatttoolTransport {
    fn connect(&self, address: MacAddress) -> BoxFuture<'_, Result<Box<dyn Link>, SessionError>> {
        Box::pin(async move {
            let mut child = Command::new(&self.program)
                .arg("-b")
                .arg(address.to_string())
                .arg("-I")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| SessionError::Connect(format!("failed to spawn {}: {e}", self.program)))?;

            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                return Err(SessionError::Connect("child has no stdio".into()));
            };
            debug!("{address}: spawned {} with pid {:?}", self.program, child.id());

            let mut link = GatttoolLink {
                address,
                child,
                stdin,
                lines: BufReader::new(stdout).lines(),
                pending: VecDeque::new(),
            };

            link.send("connect").await?;
            match link.expect(Line::Connected, CONNECT_TIMEOUT).await {
                Ok(()) => Ok(Box::new(link) as Box<dyn Link>),
                Err(SessionError::Connect(msg) | SessionError::ConnectionLost(msg)) => {
                    link.shutdown().await;
                    Err(SessionError::Connect(msg))
                }
            }
        })
    }
}

struct GatttoolLink {
    address: MacAddress,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    /// Notifications read while waiting for a command reply
    pending: VecDeque<Notification>,
}

impl GatttoolLink {
    async fn send(&mut self, command: &str) -> Result<(), SessionError> {
        trace!("{}: > {command}", self.address);
        self.stdin
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| SessionError::ConnectionLost(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| SessionError::ConnectionLost(e.to_string()))
    }

    /// Read one classified line. `Ok(None)` when `deadline` passes first.
    async fn next_line(&mut self, deadline: Instant) -> Result<Option<Line>, SessionError> {
        match timeout_at(deadline, self.lines.next_line()).await {
            Err(_) => Ok(None),
            Ok(Ok(Some(raw))) => {
                trace!("{}: < {raw}", self.address);
                Ok(Some(classify(&raw)))
            }
            Ok(Ok(None)) => Err(SessionError::ConnectionLost(
                "gatttool exited".to_string(),
            )),
            Ok(Err(e)) => Err(SessionError::ConnectionLost(e.to_string())),
        }
    }

    /// Read until `wanted` shows up, queueing notifications seen meanwhile.
    async fn expect(&mut self, wanted: Line, limit: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + limit;
        loop {
            match self.next_line(deadline).await? {
                None => {
                    return Err(SessionError::ConnectionLost(format!(
                        "no reply within {}s",
                        limit.as_secs()
                    )));
                }
                Some(line) if line == wanted => return Ok(()),
                Some(Line::Notification(n)) => self.pending.push_back(n),
                Some(Line::Error(msg)) => return Err(SessionError::ConnectionLost(msg)),
                Some(_) => {}
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.send("exit").await;
        if timeout(Duration::from_secs(1), self.child.wait()).await.is_err() {
            let _ = self.child.kill().await;
        }
    }
}

impl Link for GatttoolLink {
    fn write_characteristic<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
        with_response: bool,
    ) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            let kind = if with_response { "req" } else { "cmd" };
            self.send(&format!("char-write-{kind} 0x{handle:04x} {}", hex(value)))
                .await?;
            if with_response {
                self.expect(Line::Written, WRITE_TIMEOUT).await?;
            }
            Ok(())
        })
    }

    fn wait_for_notification(
        &mut self,
        limit: Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, SessionError>> {
        Box::pin(async move {
            if let Some(n) = self.pending.pop_front() {
                return Ok(Some(n));
            }
            let deadline = Instant::now() + limit;
            loop {
                match self.next_line(deadline).await? {
                    None => return Ok(None),
                    Some(Line::Notification(n)) => return Ok(Some(n)),
                    Some(Line::Error(msg)) => return Err(SessionError::ConnectionLost(msg)),
                    Some(_) => {}
                }
            }
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            let _ = self.send("disconnect").await;
            self.shutdown().await;
            Ok(())
        })
    }
}

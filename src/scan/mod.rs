//! Drives the external masscan process and turns its list output into a
//! lazy stream of discovered hosts.

pub mod decoder;

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;

use log::debug;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;

use self::decoder::{Diagnostic, Line, Timestamp};

/// Name of the external scanner binary looked up on `PATH`.
const MASSCAN_BIN: &str = "masscan";

/// How many lookahead lines to spend reassembling a timestamp that was cut
/// in half by a rate annotation before giving the record up.
const MAX_RESYNC_LINES: usize = 8;

/// One open port on one address, as reported by the scanner.
///
/// The timestamp is whatever masscan printed, which is not necessarily
/// wall-clock time on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Host {
    pub address: IpAddr,
    pub port: u16,
    pub discovered_at: i64,
}

/// Terminal failure of a scan run. Raised at most once and ends the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// masscan is not installed or not on `PATH`.
    #[error("masscan binary not found on PATH")]
    BinaryNotFound,
    /// The calling user lacks the raw-socket privileges masscan needs.
    #[error("masscan lacks the required privileges (try running as root)")]
    PermissionDenied,
    #[error("masscan failed: {0}")]
    Generic(String),
}

impl From<Diagnostic> for ScanError {
    fn from(diag: Diagnostic) -> Self {
        match diag {
            Diagnostic::PermissionDenied => Self::PermissionDenied,
            Diagnostic::Generic(reason) => Self::Generic(reason),
        }
    }
}

/// What to do with the scanner subprocess when the result limit is reached
/// mid-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnLimit {
    /// Kill the subprocess immediately.
    #[default]
    Kill,
    /// Leave it running detached; the caller wanted the results, not the
    /// process.
    Detach,
}

/// Parameters handed to the masscan invocation.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Target range in any syntax masscan accepts, e.g. `10.0.0.0/8`.
    pub range: String,
    pub port: u16,
    /// Maximum packet rate masscan may transmit at.
    pub max_rate: u32,
    pub exclude_file: PathBuf,
    /// Stop after this many hosts have been yielded.
    pub limit: Option<usize>,
    pub on_limit: OnLimit,
}

/// A finite, forward-only stream of discovered hosts.
///
/// Production use goes through [`ScanStream::spawn`], which wires the stream
/// to a live masscan process. Tests substitute any buffered reader via
/// [`ScanStream::from_reader`], so nothing here requires a real subprocess.
#[derive(Debug)]
pub struct ScanStream<R> {
    reader: R,
    child: Option<Child>,
    diag_rx: mpsc::Receiver<ScanError>,
    limit: Option<usize>,
    on_limit: OnLimit,
    yielded: usize,
    done: bool,
}

impl ScanStream<BufReader<ChildStdout>> {
    /// Launches masscan against the configured range and returns the stream
    /// of its discoveries.
    ///
    /// stdout carries the discovery records; stderr is piped separately and
    /// watched in the background so diagnostics can never interleave with
    /// (and corrupt) the discovery stream.
    pub fn spawn(config: &ScanConfig) -> Result<Self, ScanError> {
        let mut child = Command::new(MASSCAN_BIN)
            .arg(format!("-p{}", config.port))
            .arg(&config.range)
            .arg("--max-rate")
            .arg(config.max_rate.to_string())
            .arg("--excludefile")
            .arg(&config.exclude_file)
            .arg("-oL")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ScanError::BinaryNotFound,
                _ => ScanError::Generic(e.to_string()),
            })?;

        debug!(
            "masscan launched: range {} port {} max-rate {}",
            config.range, config.port, config.max_rate
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScanError::Generic("masscan stdout was not captured".to_owned()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ScanError::Generic("masscan stderr was not captured".to_owned()))?;

        let (diag_tx, diag_rx) = mpsc::channel(1);
        tokio::spawn(watch_stderr(BufReader::new(stderr), diag_tx));

        Ok(Self {
            reader: BufReader::new(stdout),
            child: Some(child),
            diag_rx,
            limit: config.limit,
            on_limit: config.on_limit,
            yielded: 0,
            done: false,
        })
    }
}

impl<R: AsyncBufRead + Unpin> ScanStream<R> {
    /// Builds a stream over an arbitrary reader instead of a subprocess.
    pub fn from_reader(reader: R) -> Self {
        // No process means no stderr watcher; an immediately-closed channel
        // reads the same as a watcher that never saw a diagnostic.
        let (_tx, diag_rx) = mpsc::channel(1);
        Self {
            reader,
            child: None,
            diag_rx,
            limit: None,
            on_limit: OnLimit::default(),
            yielded: 0,
            done: false,
        }
    }

    /// Caps how many hosts the stream will yield.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Yields the next discovered host, or `Ok(None)` once the stream is
    /// exhausted. A returned error is terminal; subsequent calls yield
    /// `Ok(None)`.
    pub async fn next_host(&mut self) -> Result<Option<Host>, ScanError> {
        if self.done {
            return Ok(None);
        }

        loop {
            if let Ok(diag) = self.diag_rx.try_recv() {
                self.done = true;
                self.terminate();
                return Err(diag);
            }

            let line = match next_line(&mut self.reader).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    // Stream ended; let the stderr watcher have the last
                    // word in case the process died with a diagnostic.
                    return match self.diag_rx.recv().await {
                        Some(diag) => Err(diag),
                        None => Ok(None),
                    };
                }
                Err(e) => {
                    self.done = true;
                    return Err(ScanError::Generic(e.to_string()));
                }
            };

            match decoder::classify(&line) {
                Line::Discovery(found) => {
                    let discovered_at = match found.timestamp {
                        Timestamp::Whole(ts) => ts,
                        Timestamp::Truncated(prefix) => match self.resync(&prefix).await? {
                            Some(ts) => ts,
                            None => continue,
                        },
                    };

                    self.yielded += 1;
                    if self.limit.is_some_and(|limit| self.yielded >= limit) {
                        debug!("result limit reached after {} hosts", self.yielded);
                        self.done = true;
                        if self.on_limit == OnLimit::Kill {
                            self.terminate();
                        }
                    }

                    return Ok(Some(Host {
                        address: found.address,
                        port: found.port,
                        discovered_at,
                    }));
                }
                Line::Diagnostic(diag) => {
                    self.done = true;
                    self.terminate();
                    return Err(diag.into());
                }
                Line::Noise => {}
            }
        }
    }

    /// Recovers a timestamp that was split across lines by a rate
    /// annotation: skip annotation lines, then glue the trailing digits of
    /// the first clean line onto the captured prefix.
    ///
    /// Empty lines (a CRLF stream splits into one line per delimiter) are
    /// skipped too; accepting one would pass the bare prefix off as the
    /// whole timestamp. Lookahead is bounded so a corrupted stream cannot
    /// starve the loop; on give-up the record is dropped like any other
    /// malformed line.
    async fn resync(&mut self, prefix: &str) -> Result<Option<i64>, ScanError> {
        for _ in 0..MAX_RESYNC_LINES {
            let line = next_line(&mut self.reader)
                .await
                .map_err(|e| ScanError::Generic(e.to_string()))?;
            let Some(line) = line else {
                return Ok(None);
            };

            let text = String::from_utf8_lossy(&line);
            let digits = text.trim();
            if digits.is_empty() || text.contains(decoder::RATE_MARKER) {
                continue;
            }

            return Ok(format!("{prefix}{digits}").parse::<i64>().ok());
        }

        debug!("gave up reassembling timestamp after {MAX_RESYNC_LINES} lines");
        Ok(None)
    }

    fn terminate(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("could not kill masscan: {e}");
            }
        }
    }
}

/// Watches the scanner's stderr for `FAIL:` diagnostics and forwards the
/// first one seen. Everything else is traced and dropped.
async fn watch_stderr<R: AsyncBufRead + Unpin>(mut reader: R, diag_tx: mpsc::Sender<ScanError>) {
    while let Ok(Some(line)) = next_line(&mut reader).await {
        match decoder::classify(&line) {
            Line::Diagnostic(diag) => {
                let _ = diag_tx.send(diag.into()).await;
                return;
            }
            _ => debug!("masscan stderr: {}", String::from_utf8_lossy(&line)),
        }
    }
}

/// Reads one line delimited by either CR or LF, which masscan mixes freely.
///
/// A partial read at end-of-stream (no trailing delimiter) is still
/// returned as a line. `Ok(None)` means the stream is exhausted.
async fn next_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line: Vec<u8> = Vec::new();

    loop {
        let (consumed, terminated) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(if line.is_empty() { None } else { Some(line) });
            }

            match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&buf[..pos]);
                    (pos + 1, true)
                }
                None => {
                    line.extend_from_slice(buf);
                    (buf.len(), false)
                }
            }
        };

        reader.consume(consumed);
        if terminated {
            return Ok(Some(line));
        }
    }
}

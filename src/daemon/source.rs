//! Event Sources
//!
//! Line-oriented streams of devd notifications. The devd socket is the
//! production source; any buffered reader (stdin, a capture file) can stand
//! in for it when replaying recorded events.

use crate::config::ReconnectConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

// =============================================================================
// EventSource Trait
// =============================================================================

/// A stream of devd event lines
#[async_trait]
pub trait EventSource: Send {
    /// Establish the stream. Called before the first read and again after
    /// the stream ends, when the source is reconnectable.
    async fn connect(&mut self) -> Result<()>;

    /// Next event line without its terminator, `Ok(None)` at end of stream
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Whether the stream can be re-established after it ends
    fn reconnectable(&self) -> bool;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}

fn trim_line(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

// =============================================================================
// devd Socket Source
// =============================================================================

/// Reads events from the devd stream socket, reconnecting with exponential
/// backoff whenever devd goes away
pub struct DevdSocketSource {
    path: PathBuf,
    reconnect: ReconnectConfig,
    reader: Option<BufReader<UnixStream>>,
}

impl DevdSocketSource {
    pub fn new(path: impl Into<PathBuf>, reconnect: ReconnectConfig) -> Self {
        Self {
            path: path.into(),
            reconnect,
            reader: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }
}

#[async_trait]
impl EventSource for DevdSocketSource {
    async fn connect(&mut self) -> Result<()> {
        self.reader = None;
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.reconnect.initial_interval())
            .with_max_interval(self.reconnect.max_interval())
            .with_multiplier(self.reconnect.multiplier)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt: u32 = 0;
        loop {
            match UnixStream::connect(&self.path).await {
                Ok(stream) => {
                    info!(path = %self.path.display(), attempt, "Connected to devd");
                    self.reader = Some(BufReader::new(stream));
                    return Ok(());
                }
                Err(e) => {
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(Error::SourceDisconnected(format!(
                            "{}: {}",
                            self.path.display(),
                            e
                        )));
                    };
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Unable to connect to devd, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(Error::SourceDisconnected("not connected".to_string()));
        };
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(path = %self.path.display(), "devd closed the connection");
                self.reader = None;
                Ok(None)
            }
            Ok(_) => Ok(Some(trim_line(line))),
            Err(e) => {
                self.reader = None;
                Err(Error::SourceDisconnected(e.to_string()))
            }
        }
    }

    fn reconnectable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("devd socket {}", self.path.display())
    }
}

// =============================================================================
// Reader Source
// =============================================================================

/// Reads events from any buffered reader until end of input
pub struct ReaderSource<R> {
    name: String,
    reader: R,
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

#[async_trait]
impl<R> EventSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(trim_line(line)))
    }

    fn reconnectable(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reader_source_lines() {
        let mock = tokio_test::io::Builder::new()
            .read(b"!system=ZFS subsystem=ZFS type=misc.fs.zfs.config_sync\n")
            .read(b"!system=DEVFS subsystem=CDEV type=CREATE cdev=da1\r\n")
            .build();
        let mut source = ReaderSource::new("mock", BufReader::new(mock));

        source.connect().await.unwrap();
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some("!system=ZFS subsystem=ZFS type=misc.fs.zfs.config_sync")
        );
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some("!system=DEVFS subsystem=CDEV type=CREATE cdev=da1")
        );
        assert_eq!(source.next_line().await.unwrap(), None);
        assert!(!source.reconnectable());
    }

    #[tokio::test]
    async fn test_reader_source_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"!system=ZFS ")
            .read(b"type=x\n")
            .build();
        let mut source = ReaderSource::new("mock", BufReader::new(mock));
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some("!system=ZFS type=x")
        );
    }

    #[tokio::test]
    async fn test_devd_socket_reads_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devd.pipe");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"!system=ZFS subsystem=ZFS type=misc.fs.zfs.config_sync\n")
                .await
                .unwrap();
        });

        let mut source = DevdSocketSource::new(&path, ReconnectConfig::default());
        source.connect().await.unwrap();
        assert!(source.is_connected());
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some("!system=ZFS subsystem=ZFS type=misc.fs.zfs.config_sync")
        );
        assert_eq!(source.next_line().await.unwrap(), None);
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_devd_socket_retries_until_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devd.pipe");
        let reconnect = ReconnectConfig {
            initial_interval_ms: 10,
            max_interval_ms: 20,
            multiplier: 2.0,
        };

        let bind_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let listener = tokio::net::UnixListener::bind(&bind_path).unwrap();
            let _ = listener.accept().await;
        });

        let mut source = DevdSocketSource::new(&path, reconnect);
        tokio::time::timeout(Duration::from_secs(5), source.connect())
            .await
            .unwrap()
            .unwrap();
        assert!(source.is_connected());
    }

    #[tokio::test]
    async fn test_next_line_requires_connection() {
        let mut source =
            DevdSocketSource::new("/nonexistent/devd.pipe", ReconnectConfig::default());
        assert!(matches!(
            source.next_line().await,
            Err(Error::SourceDisconnected(_))
        ));
    }
}

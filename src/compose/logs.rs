//! Framed log streams
//!
//! A [`LogStream`] follows one service. Its lines use the same framing as
//! `docker compose logs --follow`:
//!
//! ```text
//! Attaching to web
//! 2024-05-01T10:00:00.123456789Z listening on :8080
//! web exited with code 0
//! ```
//!
//! The exit line is only written when the service's output ends on its own.
//! A cancelled stream just closes.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Marker written before any content
pub fn attach_line(service: &str) -> String {
    format!("Attaching to {}\n", service)
}

/// Marker written when the service's output ends
pub fn exit_line(service: &str, code: i32) -> String {
    format!("{} exited with code {}\n", service, code)
}

/// A content line: RFC 3339 timestamp with nanoseconds, then the message
/// with trailing whitespace removed
pub fn format_log_line(timestamp: DateTime<Utc>, message: &str) -> String {
    format!(
        "{} {}\n",
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        message.trim_end()
    )
}

/// Split a content line into its timestamp and message
pub fn parse_log_line(line: &str) -> Option<(DateTime<FixedOffset>, &str)> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let (timestamp, message) = line.split_once(' ')?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?;
    Some((timestamp, message))
}

/// A live, cancellable sequence of log lines for one service.
///
/// Dropping the stream cancels its producer.
pub struct LogStream {
    service: String,
    rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<()>>,
}

impl LogStream {
    /// Start following `source` for `service`.
    ///
    /// With no source the stream stays attached, silent, until cancelled.
    /// `cancel` is wrapped in a child token so dropping the stream does not
    /// cancel anything else the caller owns.
    pub fn spawn(
        service: &str,
        source: Option<mpsc::Receiver<String>>,
        exit_code: i32,
        buffer: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = cancel.child_token();

        // The channel is empty and has room, so the marker is always first.
        let _ = tx.try_send(attach_line(service));

        let producer = tokio::spawn(produce(
            service.to_string(),
            source,
            exit_code,
            tx,
            cancel.clone(),
        ));

        tracing::info!("Attached to logs of service {}", service);

        Self {
            service: service.to_string(),
            rx,
            cancel,
            producer: Some(producer),
        }
    }

    /// Service this stream follows
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Next line, or `None` once the stream has closed
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Stop producing. Lines already buffered can still be read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Read every remaining line until the stream closes
    pub async fn collect_lines(mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.rx.recv().await {
            lines.push(line);
        }
        lines
    }

    /// Read the rest of the stream as raw text
    pub async fn collect_text(self) -> String {
        self.collect_lines().await.concat()
    }
}

impl Stream for LogStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(producer) = self.producer.take() {
            if !producer.is_finished() {
                tracing::debug!("Log stream for {} dropped while producing", self.service);
            }
        }
    }
}

/// Producer task. Owns the only sender, so the stream closes exactly once,
/// when this returns.
async fn produce(
    service: String,
    mut source: Option<mpsc::Receiver<String>>,
    exit_code: i32,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        let next = match source.as_mut() {
            Some(source) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                message = source.recv() => Some(message),
            },
            None => {
                cancel.cancelled().await;
                None
            }
        };

        let message = match next {
            // Cancelled
            None => {
                tracing::info!("Log stream for {} cancelled", service);
                return;
            }
            // Source ended: the service exited
            Some(None) => break,
            Some(Some(message)) => message,
        };

        let line = format_log_line(Utc::now(), &message);
        if !send(&tx, &cancel, line).await {
            return;
        }
    }

    if send(&tx, &cancel, exit_line(&service, exit_code)).await {
        tracing::info!("Service {} exited with code {}", service, exit_code);
    }
}

/// Send unless cancelled first. Returns false if the line was not delivered.
async fn send(tx: &mpsc::Sender<String>, cancel: &CancellationToken, line: String) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        result = tx.send(line) => result.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_format_log_line_trims_trailing_whitespace() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.000000001Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            format_log_line(ts, "ready \t\n"),
            "2024-05-01T10:00:00.000000001Z ready\n"
        );
        assert_eq!(
            format_log_line(ts, "  indented"),
            "2024-05-01T10:00:00.000000001Z   indented\n"
        );
    }

    #[test]
    fn test_parse_log_line() {
        let (ts, message) = parse_log_line("2024-05-01T10:00:00.5Z hello world\n").unwrap();
        assert_eq!(ts.timestamp_subsec_nanos(), 500_000_000);
        assert_eq!(message, "hello world");

        assert!(parse_log_line("Attaching to web\n").is_none());
    }

    #[tokio::test]
    async fn test_natural_exit_framing() {
        let (tx, rx) = mpsc::channel(4);
        tx.send("a".to_string()).await.unwrap();
        tx.send("b ".to_string()).await.unwrap();
        drop(tx);

        let stream = LogStream::spawn("web", Some(rx), 0, 16, CancellationToken::new());
        let lines = stream.collect_lines().await;

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Attaching to web\n");
        assert_eq!(parse_log_line(&lines[1]).unwrap().1, "a");
        assert_eq!(parse_log_line(&lines[2]).unwrap().1, "b");
        assert!(lines[2].ends_with(" b\n"));
        assert_eq!(lines[3], "web exited with code 0\n");
    }

    #[tokio::test]
    async fn test_cancel_before_content() {
        let (_tx, rx) = mpsc::channel::<String>(4);
        let cancel = CancellationToken::new();

        let stream = LogStream::spawn("web", Some(rx), 0, 16, cancel.clone());
        cancel.cancel();

        let lines = stream.collect_lines().await;
        assert_eq!(lines, vec!["Attaching to web\n".to_string()]);
    }

    #[tokio::test]
    async fn test_no_source_waits_for_cancel() {
        let cancel = CancellationToken::new();
        let mut stream = LogStream::spawn("db", None, 0, 16, cancel.clone());

        assert_eq!(stream.recv().await.as_deref(), Some("Attaching to db\n"));
        stream.cancel();
        assert_eq!(stream.recv().await, None);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_lines_in_order_as_stream() {
        let (tx, rx) = mpsc::channel(8);
        let stream = LogStream::spawn("api", Some(rx), 3, 2, CancellationToken::new());

        tokio::spawn(async move {
            for i in 0..5 {
                tx.send(format!("line {}", i)).await.unwrap();
            }
        });

        let lines: Vec<String> = stream.collect().await;
        let messages: Vec<&str> = lines[1..6]
            .iter()
            .map(|l| parse_log_line(l).unwrap().1)
            .collect();
        assert_eq!(messages, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
        assert_eq!(lines[6], "api exited with code 3\n");
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_producer() {
        let (tx, rx) = mpsc::channel::<String>(1);
        let stream = LogStream::spawn("web", Some(rx), 0, 1, CancellationToken::new());
        drop(stream);

        // The producer dropped its end of the source once it saw the cancel.
        tx.closed().await;
    }
}

//! Metric Collector & Network Sink
//!
//! All runners feed a single channel. One collector task drains it and is the
//! only writer on the outbound connection, so lines never interleave.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::message::Message;

/// Writes wire lines to an outbound stream
pub struct MetricSink<W> {
    writer: W,
    api_key: String,
}

impl MetricSink<TcpStream> {
    /// Open the collector connection, giving up after `timeout`
    pub async fn connect(address: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        info!("Connecting to collector at {}", address);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| AgentError::DialTimeout {
                address: address.to_string(),
                timeout,
            })?
            .map_err(|source| AgentError::Dial {
                address: address.to_string(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(Self::new(stream, api_key))
    }
}

impl<W: AsyncWrite + Unpin> MetricSink<W> {
    pub fn new(writer: W, api_key: impl Into<String>) -> Self {
        Self {
            writer,
            api_key: api_key.into(),
        }
    }

    /// Write one message as a single line
    pub async fn write(&mut self, message: &Message) -> Result<()> {
        let line = message.to_line(&self.api_key);
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(AgentError::Write)?;
        self.writer.flush().await.map_err(AgentError::Write)
    }
}

/// Single consumer of the metric channel
pub struct MetricCollector<W> {
    rx: mpsc::Receiver<Message>,
    sink: MetricSink<W>,
}

impl<W: AsyncWrite + Unpin> MetricCollector<W> {
    /// Create a collector and the sender runners use to reach it
    pub fn new(sink: MetricSink<W>, capacity: usize) -> (Self, mpsc::Sender<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { rx, sink }, tx)
    }

    /// Drain the channel until every sender is gone or a write fails
    pub async fn run(mut self) -> Result<()> {
        info!("Starting metric collector loop");

        while let Some(message) = self.rx.recv().await {
            self.sink.write(&message).await?;
            debug!(
                metric = %message.name(),
                value = %message.value(),
                timestamp = message.timestamp(),
                "Metric sent"
            );
        }

        info!("Metric collector loop ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_write_line() {
        let writer = tokio_test::io::Builder::new()
            .write(b"key.cpu.load 0.42 1700000000\n")
            .build();
        let mut sink = MetricSink::new(writer, "key");

        sink.write(&Message::new("cpu.load", "0.42", 1_700_000_000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_error() {
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "gone",
            ))
            .build();
        let mut sink = MetricSink::new(writer, "key");

        let err = sink.write(&Message::new("a", "1", 0)).await.unwrap_err();
        assert!(matches!(err, AgentError::Write(_)));
    }

    #[tokio::test]
    async fn test_collector_drains_in_order() {
        let writer = tokio_test::io::Builder::new()
            .write(b"k.a 1 10\n")
            .write(b"k.b 2 11\n")
            .build();
        let (collector, tx) = MetricCollector::new(MetricSink::new(writer, "k"), 4);

        tx.send(Message::new("a", "1", 10)).await.unwrap();
        tx.send(Message::new("b", "2", 11)).await.unwrap();
        drop(tx);

        collector.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_collector_stops_on_write_failure() {
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let (collector, tx) = MetricCollector::new(MetricSink::new(writer, "k"), 1);

        tx.send(Message::new("a", "1", 10)).await.unwrap();

        assert!(matches!(collector.run().await, Err(AgentError::Write(_))));
    }

    #[tokio::test]
    async fn test_concurrent_senders_produce_whole_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let sink = MetricSink::connect(&address, "key", Duration::from_secs(5))
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let (collector, tx) = MetricCollector::new(sink, 1);
        let collector = tokio::spawn(collector.run());

        let senders: Vec<_> = (0..20)
            .map(|i| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tx.send(Message::new(format!("m{i}"), "x".repeat(512), i))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }
        drop(tx);
        collector.await.unwrap().unwrap();

        let mut lines = BufReader::new(server).lines();
        let mut seen = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            let fields: Vec<&str> = line.split(' ').collect();
            assert_eq!(fields.len(), 3, "corrupted line: {line}");
            assert!(fields[0].starts_with("key.m"));
            assert_eq!(fields[1].len(), 512);
            seen.push(fields[2].parse::<i64>().unwrap());
        }
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = MetricSink::connect(&address, "key", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(AgentError::Dial { .. })));
    }
}

//! Line protocol bus
//!
//! Each message is one line: `<topic> <payload>\n`. The payload is usually a
//! JSON document and may be empty, in which case the line is just the topic.
//! This is the framing the pipeline services use on their stdin/stdout.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use voice_flow_core::{BusError, MessageBus, MessageHandler, QoS, SubscriptionId};

use crate::{validate_topic, SubscriptionTable};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Parse one protocol line into topic and payload
///
/// Only the topic must be UTF-8; the payload is passed through as raw bytes
/// without the line terminator. Returns `Ok(None)` for blank lines.
pub fn parse_line(line: &[u8]) -> Result<Option<(String, Bytes)>, BusError> {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let line = &line[..end];
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let (topic, payload) = match line.iter().position(|b| *b == b' ') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, &line[line.len()..]),
    };
    let topic = std::str::from_utf8(topic)
        .map_err(|_| BusError::InvalidTopic(String::from_utf8_lossy(topic).into_owned()))?;
    validate_topic(topic)?;

    Ok(Some((topic.to_string(), Bytes::copy_from_slice(payload))))
}

enum Frame {
    Line,
    Oversized(usize),
    Eof,
}

/// Read one `\n`-terminated frame into `buf`, holding at most `max` bytes
///
/// A longer line is consumed up to its terminator and reported as
/// [`Frame::Oversized`] with its length.
async fn read_frame(
    reader: &mut BufReader<BoxedReader>,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<Frame> {
    buf.clear();
    let read = (&mut *reader)
        .take(max as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= max {
        return Ok(Frame::Line);
    }

    let mut skipped = buf.len();
    buf.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        reader.consume(used);
        skipped += used;
        if done {
            break;
        }
    }
    Ok(Frame::Oversized(skipped))
}

/// Encode a message as one protocol line, newline included
pub fn encode_line(topic: &str, payload: &[u8]) -> Result<Vec<u8>, BusError> {
    validate_topic(topic)?;
    if payload.iter().any(|b| *b == b'\n' || *b == b'\r') {
        return Err(BusError::InvalidPayload {
            topic: topic.to_string(),
            message: "payload contains a line break".to_string(),
        });
    }

    let mut line = Vec::with_capacity(topic.len() + payload.len() + 2);
    line.extend_from_slice(topic.as_bytes());
    if !payload.is_empty() {
        line.push(b' ');
        line.extend_from_slice(payload);
    }
    line.push(b'\n');
    Ok(line)
}

/// Longest input line accepted by default
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Message bus over a pair of byte streams
///
/// Inbound lines are read by a task spawned with [`LineBus::start`] and
/// dispatched to matching subscribers. The wire carries no QoS, so delivery
/// uses each subscription's own level.
pub struct LineBus {
    subscriptions: Arc<SubscriptionTable>,
    max_line_bytes: usize,
    reader: Mutex<Option<BoxedReader>>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl LineBus {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed_tx, _) = watch::channel(false);
        Self {
            subscriptions: Arc::new(SubscriptionTable::default()),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            reader: Mutex::new(Some(Box::new(reader))),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            closed_tx: Arc::new(closed_tx),
        }
    }

    /// Drop input lines longer than `max` bytes
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max.max(1);
        self
    }

    /// Bus over the process stdin and stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Spawn the reader task
    ///
    /// Returns `None` if the reader was already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let reader = self.reader.lock().take()?;
        let subscriptions = Arc::clone(&self.subscriptions);
        let closed_tx = Arc::clone(&self.closed_tx);

        let max_line_bytes = self.max_line_bytes;

        Some(tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut received: u64 = 0;

            loop {
                match read_frame(&mut reader, &mut buf, max_line_bytes).await {
                    Ok(Frame::Line) => match parse_line(&buf) {
                        Ok(Some((topic, payload))) => {
                            received += 1;
                            subscriptions.dispatch(&topic, &payload, QoS::ExactlyOnce);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                line = %String::from_utf8_lossy(&buf).trim_end(),
                                "Skipping malformed line"
                            );
                        }
                    },
                    Ok(Frame::Oversized(len)) => {
                        tracing::warn!(len, max = max_line_bytes, "Dropping oversized line");
                    }
                    Ok(Frame::Eof) => {
                        tracing::info!(received, "Line bus input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, received, "Line bus read failed");
                        break;
                    }
                }
            }

            closed_tx.send_replace(true);
        }))
    }

    /// Whether the input stream has ended
    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Wait until the input stream ends
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl MessageBus for LineBus {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BusError> {
        let line = encode_line(topic, &payload)?;

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| BusError::publish(topic, e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| BusError::publish(topic, e.to_string()))?;

        tracing::trace!(topic, qos = qos.level(), "Published line");
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BusError> {
        if self.is_closed() {
            return Err(BusError::Subscribe {
                filter: filter.to_string(),
                message: "input stream has ended".to_string(),
            });
        }
        let id = self.subscriptions.insert(filter, qos, handler)?;
        tracing::debug!(filter, %id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.subscriptions.remove(id);
        Ok(())
    }

    fn name(&self) -> &str {
        "line"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};
    use voice_flow_core::BusMessage;

    #[test]
    fn test_parse_line() {
        let (topic, payload) = parse_line(b"rhasspy/speech-to-text/text-captured turn on the lights\n")
            .unwrap()
            .unwrap();
        assert_eq!(topic, "rhasspy/speech-to-text/text-captured");
        assert_eq!(&payload[..], b"turn on the lights");

        let (topic, payload) = parse_line(b"rhasspy/wake-word/detected\r\n").unwrap().unwrap();
        assert_eq!(topic, "rhasspy/wake-word/detected");
        assert!(payload.is_empty());

        assert_eq!(parse_line(b"   \n").unwrap(), None);
        assert!(parse_line(b"rhasspy/# {}").is_err());
        assert!(matches!(
            parse_line(b"rhasspy/\xff/detected {}"),
            Err(BusError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_parse_line_keeps_payload_bytes() {
        let (_, payload) = parse_line(b"rhasspy/speech-to-text/text-captured   turn on the lights \n")
            .unwrap()
            .unwrap();
        assert_eq!(&payload[..], b"  turn on the lights ");

        let (_, payload) = parse_line(b"rhasspy/speech-to-text/text-captured caf\xe9\n")
            .unwrap()
            .unwrap();
        assert_eq!(&payload[..], b"caf\xe9");
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(
            encode_line("rhasspy/text-to-speech/say-text", br#"{"text":"hi"}"#).unwrap(),
            b"rhasspy/text-to-speech/say-text {\"text\":\"hi\"}\n".to_vec()
        );
        assert_eq!(
            encode_line("rhasspy/wake-word/stop-listening", b"").unwrap(),
            b"rhasspy/wake-word/stop-listening\n".to_vec()
        );
        assert!(matches!(
            encode_line("a/b", b"two\nlines"),
            Err(BusError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_reader_dispatches_and_reports_eof() {
        let (mut remote, local) = duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let bus = LineBus::new(local_read, local_write);

        let seen: Arc<Mutex<Vec<BusMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            "rhasspy/+/detected",
            QoS::AtLeastOnce,
            Arc::new(move |msg| sink.lock().push(msg)),
        )
        .await
        .unwrap();

        let task = bus.start().expect("first start spawns the reader");
        assert!(bus.start().is_none());

        remote
            .write_all(b"rhasspy/wake-word/detected {}\nrhasspy/# {}\n\nrhasspy/other/event x\n")
            .await
            .unwrap();
        drop(remote);

        tokio::time::timeout(Duration::from_secs(1), bus.closed())
            .await
            .expect("EOF observed");
        task.await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "rhasspy/wake-word/detected");
        assert_eq!(&seen[0].payload[..], b"{}");
        assert_eq!(seen[0].qos, QoS::AtLeastOnce);
        assert!(bus.is_closed());
        drop(seen);

        let late = bus
            .subscribe("rhasspy/#", QoS::AtMostOnce, Arc::new(|_: BusMessage| {}))
            .await;
        assert!(matches!(late, Err(BusError::Subscribe { .. })));
    }

    fn recording_handler(seen: &Arc<Mutex<Vec<BusMessage>>>) -> MessageHandler {
        let sink = Arc::clone(seen);
        Arc::new(move |msg| sink.lock().push(msg))
    }

    #[tokio::test]
    async fn test_reader_survives_non_utf8_and_oversized_lines() {
        let (mut remote, local) = duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let bus = LineBus::new(local_read, local_write).with_max_line_bytes(64);

        let seen: Arc<Mutex<Vec<BusMessage>>> = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("rhasspy/#", QoS::AtLeastOnce, recording_handler(&seen))
            .await
            .unwrap();
        let _task = bus.start().unwrap();

        let mut input = Vec::new();
        input.extend_from_slice(b"rhasspy/speech-to-text/text-captured caf\xe9\n");
        input.extend_from_slice(b"rhasspy/\xfe/detected {}\n");
        input.extend_from_slice(b"rhasspy/speech-to-text/text-captured ");
        input.extend_from_slice(&[b'x'; 200]);
        input.push(b'\n');
        input.extend_from_slice(b"rhasspy/wake-word/detected {}\n");
        remote.write_all(&input).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("both valid lines delivered");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].topic, "rhasspy/speech-to-text/text-captured");
        assert_eq!(&seen[0].payload[..], b"caf\xe9");
        assert_eq!(seen[1].topic, "rhasspy/wake-word/detected");
        assert!(!bus.is_closed());
    }

    #[tokio::test]
    async fn test_publish_writes_lines_in_order() {
        let (remote, local) = duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let (mut remote_read, _remote_write) = tokio::io::split(remote);
        let bus = LineBus::new(local_read, local_write);

        bus.publish("rhasspy/wake-word/stop-listening", Bytes::new(), QoS::AtMostOnce)
            .await
            .unwrap();
        bus.publish(
            "rhasspy/speech-to-text/start-listening",
            Bytes::from_static(b"{}"),
            QoS::AtMostOnce,
        )
        .await
        .unwrap();

        let expected = b"rhasspy/wake-word/stop-listening\nrhasspy/speech-to-text/start-listening {}\n";
        let mut buf = vec![0u8; expected.len()];
        remote_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected.to_vec());
    }
}

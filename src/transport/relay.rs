//! Stream relay: frames over any duplex byte stream.
//!
//! # Responsibilities
//! - Read and write prefixed frames
//! - Pair context and body frames into messages
//! - Recognise the stop command
//! - Open the configured stream (pipes, TCP, unix socket)

use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use hyper::body::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::transport::frame::{self, flags, Frame, PREFIX_SIZE};
use crate::transport::{Message, Transport, TransportError};

/// Boxed read half used for relays opened from configuration.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
/// Boxed write half used for relays opened from configuration.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Where the relay stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relay {
    /// Standard input and output of the process.
    Pipes,
    /// Connect to the supervisor over TCP.
    Tcp(String),
    /// Connect to the supervisor over a unix domain socket.
    Unix(PathBuf),
}

impl FromStr for Relay {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "pipes" {
            return Ok(Relay::Pipes);
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            if !addr.is_empty() {
                return Ok(Relay::Tcp(addr.to_string()));
            }
        }
        if let Some(path) = s.strip_prefix("unix://") {
            if !path.is_empty() {
                return Ok(Relay::Unix(PathBuf::from(path)));
            }
        }
        Err(TransportError::UnsupportedRelay(s.to_string()))
    }
}

impl std::fmt::Display for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Relay::Pipes => write!(f, "pipes"),
            Relay::Tcp(addr) => write!(f, "tcp://{}", addr),
            Relay::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl Relay {
    /// Open the stream and wrap it in a frame relay.
    pub async fn connect(
        &self,
        max_frame_bytes: u64,
    ) -> Result<StreamRelay<BoxedReader, BoxedWriter>, TransportError> {
        let (reader, writer): (BoxedReader, BoxedWriter) = match self {
            Relay::Pipes => (Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout())),
            Relay::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                (Box::new(reader), Box::new(writer))
            }
            #[cfg(unix)]
            Relay::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                let (reader, writer) = stream.into_split();
                (Box::new(reader), Box::new(writer))
            }
            #[cfg(not(unix))]
            Relay::Unix(_) => return Err(TransportError::UnsupportedRelay(self.to_string())),
        };

        tracing::info!(relay = %self, "Relay connected");
        Ok(StreamRelay::new(reader, writer, max_frame_bytes))
    }
}

#[derive(Deserialize)]
struct ControlCommand {
    #[serde(default)]
    stop: bool,
}

fn is_stop(payload: &[u8]) -> bool {
    serde_json::from_slice::<ControlCommand>(payload)
        .map(|command| command.stop)
        .unwrap_or(false)
}

fn truncated(err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TransportError::Truncated
    } else {
        TransportError::Io(err)
    }
}

/// Frame relay over a reader and a writer.
///
/// The same relay serves both ends of the conversation: the worker accepts
/// requests and sends responses, a supervisor sends requests and accepts
/// responses.
pub struct StreamRelay<R, W> {
    reader: BufReader<R>,
    writer: W,
    max_frame_bytes: u64,
    /// Context frame that arrived where a body was expected; it opens the
    /// next message.
    pending: Option<Frame>,
}

impl<R, W> StreamRelay<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, max_frame_bytes: u64) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            max_frame_bytes,
            pending: None,
        }
    }

    /// Read one frame. `Ok(None)` on a clean end-of-stream at a frame boundary.
    pub async fn receive(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut prefix = [0u8; PREFIX_SIZE];
        if self.reader.read(&mut prefix[..1]).await? == 0 {
            return Ok(None);
        }
        self.reader
            .read_exact(&mut prefix[1..])
            .await
            .map_err(truncated)?;

        let (flags, size) = frame::decode_prefix(&prefix)?;
        if size > self.max_frame_bytes {
            let drained = tokio::io::copy(&mut (&mut self.reader).take(size), &mut tokio::io::sink()).await?;
            if drained < size {
                return Err(TransportError::Truncated);
            }
            return Err(TransportError::Oversized {
                size,
                limit: self.max_frame_bytes,
            });
        }

        let mut payload = vec![0u8; size as usize];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(truncated)?;

        tracing::trace!(flags, size, "Frame received");
        Ok(Some(Frame {
            flags,
            payload: Bytes::from(payload),
        }))
    }

    /// Write one frame without flushing.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.writer.write_all(&frame.prefix()).await?;
        if !frame.payload.is_empty() {
            self.writer.write_all(&frame.payload).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Ask the peer to stop.
    pub async fn send_stop(&mut self) -> Result<(), TransportError> {
        self.write_frame(&Frame::control(Bytes::from_static(br#"{"stop":true}"#)))
            .await?;
        self.flush().await
    }

    /// Shut down the write half so the peer observes end-of-stream.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl<R, W> Transport for StreamRelay<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn accept(&mut self) -> Result<Option<Message>, TransportError> {
        let context = match self.pending.take() {
            Some(frame) => frame,
            None => match self.receive().await? {
                Some(frame) => frame,
                None => return Ok(None),
            },
        };
        if !context.is_control() {
            return Err(TransportError::Protocol("expected a context frame"));
        }
        if is_stop(&context.payload) {
            tracing::debug!("Stop command received");
            return Ok(None);
        }

        let body = self.receive().await?.ok_or(TransportError::Truncated)?;
        if body.is_control() {
            self.pending = Some(body);
            return Err(TransportError::Protocol("context frame without a body"));
        }
        let body = if body.has(flags::EMPTY) {
            Bytes::new()
        } else {
            body.payload
        };

        Ok(Some(Message {
            context: context.payload,
            body,
        }))
    }

    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.write_frame(&Frame::control(message.context)).await?;
        self.write_frame(&Frame::raw(message.body)).await?;
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    type Half = StreamRelay<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn pair(limit: u64) -> (Half, Half) {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        (StreamRelay::new(ar, aw, limit), StreamRelay::new(br, bw, limit))
    }

    #[test]
    fn relay_addresses_parse() {
        assert_eq!("pipes".parse::<Relay>().unwrap(), Relay::Pipes);
        assert_eq!(
            "tcp://127.0.0.1:6001".parse::<Relay>().unwrap(),
            Relay::Tcp("127.0.0.1:6001".into())
        );
        assert_eq!(
            "unix:///tmp/rr.sock".parse::<Relay>().unwrap(),
            Relay::Unix(PathBuf::from("/tmp/rr.sock"))
        );
        assert!("tcp://".parse::<Relay>().is_err());
        assert!("stdin".parse::<Relay>().is_err());
    }

    #[tokio::test]
    async fn message_crosses_the_relay() {
        let (mut worker, mut peer) = pair(1024);
        peer.send(Message::new(&b"{\"method\":\"GET\"}"[..], &b"hello"[..]))
            .await
            .unwrap();

        let message = worker.accept().await.unwrap().unwrap();
        assert_eq!(&message.context[..], b"{\"method\":\"GET\"}");
        assert_eq!(&message.body[..], b"hello");
    }

    #[tokio::test]
    async fn empty_body_round_trips() {
        let (mut worker, mut peer) = pair(1024);
        peer.send(Message::new(&b"{}"[..], Bytes::new())).await.unwrap();
        let message = worker.accept().await.unwrap().unwrap();
        assert!(message.body.is_empty());
    }

    #[tokio::test]
    async fn close_and_stop_end_the_stream() {
        let (mut worker, mut peer) = pair(1024);
        peer.send_stop().await.unwrap();
        assert!(worker.accept().await.unwrap().is_none());

        peer.close().await.unwrap();
        assert!(worker.accept().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stray_payload_frame_is_recoverable() {
        let (mut worker, mut peer) = pair(1024);
        peer.write_frame(&Frame::raw(Bytes::from_static(b"garbage")))
            .await
            .unwrap();
        peer.send(Message::new(&b"{}"[..], &b"ok"[..])).await.unwrap();

        let err = worker.accept().await.unwrap_err();
        assert!(err.is_recoverable());
        let message = worker.accept().await.unwrap().unwrap();
        assert_eq!(&message.body[..], b"ok");
    }

    #[tokio::test]
    async fn context_without_body_keeps_the_next_message() {
        let (mut worker, mut peer) = pair(1024);
        peer.write_frame(&Frame::control(Bytes::from_static(b"{\"uri\":\"/lost\"}")))
            .await
            .unwrap();
        peer.send(Message::new(&b"{\"uri\":\"/ok\"}"[..], &b"ok"[..]))
            .await
            .unwrap();

        let err = worker.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
        assert!(err.is_recoverable());

        let message = worker.accept().await.unwrap().unwrap();
        assert_eq!(&message.context[..], b"{\"uri\":\"/ok\"}");
        assert_eq!(&message.body[..], b"ok");
    }

    #[tokio::test]
    async fn stop_after_an_orphan_context_still_stops() {
        let (mut worker, mut peer) = pair(1024);
        peer.write_frame(&Frame::control(Bytes::from_static(b"{}")))
            .await
            .unwrap();
        peer.send_stop().await.unwrap();

        assert!(worker.accept().await.is_err());
        assert!(worker.accept().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_drained() {
        let (mut worker, mut peer) = pair(8);
        peer.write_frame(&Frame::control(Bytes::from(vec![b'x'; 64])))
            .await
            .unwrap();
        peer.send(Message::new(&b"{}"[..], &b"ok"[..])).await.unwrap();

        assert!(matches!(
            worker.accept().await,
            Err(TransportError::Oversized { size: 64, limit: 8 })
        ));
        let message = worker.accept().await.unwrap().unwrap();
        assert_eq!(&message.body[..], b"ok");
    }

    #[tokio::test]
    async fn truncated_frame_is_fatal() {
        let (mut worker, mut peer) = pair(1024);
        let prefix = frame::encode_prefix(flags::CONTROL, 32);
        peer.writer.write_all(&prefix).await.unwrap();
        peer.writer.write_all(b"{\"method\"").await.unwrap();
        peer.close().await.unwrap();

        let err = worker.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::Truncated));
        assert!(!err.is_recoverable());
    }
}

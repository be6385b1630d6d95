//! The duplex message channel endpoints bind to, and the manager that owns
//! one for the lifetime of an endpoint.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::channel::mpsc as futures_mpsc;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::codec;
use crate::error::ChannelError;

/// One frame delivered by a channel's inbound stream.
///
/// `Reply` carries a ready-made response (the PARSE_ERROR reply for
/// undecodable text) that goes straight back out without touching the
/// endpoint.
pub(crate) enum Inbound {
    Message(Value),
    Reply(Value),
}

type InboundStream = Pin<Box<dyn Stream<Item = Result<Inbound, ChannelError>> + Send>>;
type OutboundSink = Pin<Box<dyn Sink<Value, Error = ChannelError> + Send>>;

/// Wait until a `watch::Receiver<bool>` reports `true`, without holding the
/// borrow guard across an `.await` (`Receiver::wait_for`'s `Ref` is `!Send`,
/// which breaks the `Send` bound of futures that select! over it).
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// A caller-supplied duplex channel of decoded JSON values: a stream of
/// inbound messages and a sink for outbound ones.
///
/// The protocol core never opens sockets or serializes to bytes; any
/// transport that can produce and consume [`Value`]s (or JSON text, via
/// [`MessageChannel::json_text`]) can host an endpoint.
pub struct MessageChannel {
    pub(crate) stream: InboundStream,
    pub(crate) sink: OutboundSink,
}

impl MessageChannel {
    /// Bind a channel from a stream of decoded values and a sink of decoded
    /// values.
    pub fn from_parts<S, K>(stream: S, sink: K) -> Self
    where
        S: Stream<Item = Result<Value, ChannelError>> + Send + 'static,
        K: Sink<Value, Error = ChannelError> + Send + 'static,
    {
        Self {
            stream: stream.map(|item| item.map(Inbound::Message)).boxed(),
            sink: Box::pin(sink),
        }
    }

    /// Bind a channel from a JSON text transport.
    ///
    /// Inbound text is decoded; text that is not valid JSON is answered with
    /// a PARSE_ERROR response on the outbound side and never reaches the
    /// endpoint. Outbound values are encoded as compact JSON text.
    pub fn json_text<S, K>(stream: S, sink: K) -> Self
    where
        S: Stream<Item = Result<String, ChannelError>> + Send + 'static,
        K: Sink<String, Error = ChannelError> + Send + 'static,
    {
        let stream = stream
            .map(|item| {
                item.map(|text| match codec::decode_text(&text) {
                    Ok(value) => Inbound::Message(value),
                    Err(reply) => Inbound::Reply(reply.to_value()),
                })
            })
            .boxed();
        let sink = Box::pin(sink.with(|value: Value| future::ready(codec::encode_value(&value))));
        Self { stream, sink }
    }

    /// An in-memory cross-wired channel pair, for tests and in-process
    /// endpoints.
    pub fn pair() -> (MessageChannel, MessageChannel) {
        let (left_tx, left_rx) = futures_mpsc::unbounded::<Value>();
        let (right_tx, right_rx) = futures_mpsc::unbounded::<Value>();
        let left = Self::from_parts(
            left_rx.map(Ok),
            right_tx.sink_map_err(|_| ChannelError::Closed),
        );
        let right = Self::from_parts(
            right_rx.map(Ok),
            left_tx.sink_map_err(|_| ChannelError::Closed),
        );
        (left, right)
    }
}

struct Parts {
    stream: InboundStream,
    sink: OutboundSink,
    out_rx: mpsc::UnboundedReceiver<Value>,
}

/// Coordinator around one [`MessageChannel`].
///
/// `listen` forwards inbound messages to a consumer and drains the outbound
/// queue into the sink from a single loop, so writes are serialized and one
/// `add` call is atomic at the sink boundary. Once shutdown starts, nothing
/// further is emitted.
pub(crate) struct ChannelManager {
    parts: Mutex<Option<Parts>>,
    out_tx: mpsc::UnboundedSender<Value>,
    closed: watch::Sender<bool>,
    done: watch::Sender<Option<Result<(), ChannelError>>>,
    listening: AtomicBool,
}

impl ChannelManager {
    pub(crate) fn new(channel: MessageChannel) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let (done, _) = watch::channel(None);
        Self {
            parts: Mutex::new(Some(Parts {
                stream: channel.stream,
                sink: channel.sink,
                out_rx,
            })),
            out_tx,
            closed,
            done,
            listening: AtomicBool::new(false),
        }
    }

    /// Enqueue one outbound message. Silently ignored after close.
    pub(crate) fn add(&self, message: Value) {
        if self.is_closed() {
            debug!("discarding outbound message: channel closed");
            return;
        }
        let _ = self.out_tx.send(message);
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Cancel the input subscription and close the output. Idempotent, and
    /// legal before `listen` (the manager is then permanently inert).
    pub(crate) fn close(&self) {
        self.closed.send_replace(true);
        if self.parts.lock().unwrap().take().is_some() {
            // listen never ran; dropping the parts closed the output
            self.finish(Ok(()));
        }
    }

    /// Resolves when the channel has shut down, with the input stream's
    /// error if one ended it.
    pub(crate) async fn done(&self) -> Result<(), ChannelError> {
        let mut rx = self.done.subscribe();
        let result = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => (*slot).clone().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };
        result
    }

    /// Pump the channel: forward each inbound message to `consumer`, drain
    /// the outbound queue into the sink. Completes when the channel closes.
    pub(crate) async fn listen<C>(&self, mut consumer: C) -> Result<(), ChannelError>
    where
        C: FnMut(Value) + Send,
    {
        assert!(
            !self.listening.swap(true, Ordering::SeqCst),
            "listen may only be called once"
        );
        let parts = self.parts.lock().unwrap().take();
        let Some(Parts {
            mut stream,
            mut sink,
            mut out_rx,
        }) = parts
        else {
            // closed before listen
            return self.done().await;
        };

        let mut closed_rx = self.closed.subscribe();
        let result = loop {
            tokio::select! {
                biased;
                _ = wait_closed(&mut closed_rx) => break Ok(()),
                Some(message) = out_rx.recv() => {
                    if let Err(err) = sink.send(message).await {
                        break Err(err);
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Inbound::Message(value))) => consumer(value),
                    Some(Ok(Inbound::Reply(reply))) => {
                        let _ = self.out_tx.send(reply);
                    }
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                },
            }
        };

        self.closed.send_replace(true);
        let _ = sink.close().await;
        self.finish(result.clone());
        result
    }

    fn finish(&self, result: Result<(), ChannelError>) {
        self.done.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(result.clone());
                true
            } else {
                false
            }
        });
    }
}

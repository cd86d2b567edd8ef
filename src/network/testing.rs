//! In-process Core stand-in for tests

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::Connection;
use crate::protocol::{
    encode_frame, Frame, LoginRequest, LoginResponse, MessageType, OnlineListResponse,
    RegisterRequest, RegisterResponse,
};

/// Password the default handler accepts
pub(crate) const GOOD_PASSWORD: &str = "secret";

/// What the stand-in does with one received frame
pub(crate) enum Reply {
    Frame(MessageType, Bytes),
    Raw(Vec<u8>),
    /// Write the bytes, then drop the connection
    RawThenClose(Vec<u8>),
    Silent,
    Close,
}

#[derive(Debug)]
pub(crate) enum CoreEvent {
    Accepted,
    Frame { msg_type: u8, payload: Bytes },
    Closed,
}

type Handler = Arc<dyn Fn(&Frame) -> Reply + Send + Sync>;

pub(crate) struct MockCore {
    addr: String,
    accepted: Arc<AtomicUsize>,
    events: mpsc::UnboundedReceiver<CoreEvent>,
    task: JoinHandle<()>,
}

impl MockCore {
    pub async fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&Frame) -> Reply + Send + Sync + 'static,
    {
        Self::spawn_with_delay(Duration::ZERO, handler).await
    }

    /// Like `spawn`, but every reply is held back by `delay`
    pub async fn spawn_with_delay<F>(delay: Duration, handler: F) -> Self
    where
        F: Fn(&Frame) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (event_tx, events) = mpsc::unbounded_channel();
        let handler: Handler = Arc::new(handler);

        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = event_tx.send(CoreEvent::Accepted);
                tokio::spawn(serve(stream, handler.clone(), event_tx.clone(), delay));
            }
        });

        Self {
            addr,
            accepted,
            events,
            task,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.rsplit(':').next().unwrap().parse().unwrap()
    }

    /// Number of TCP connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait (up to 5s) for the first event matching `pred`
    pub async fn wait_for<P>(&mut self, pred: P) -> CoreEvent
    where
        P: Fn(&CoreEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("mock core stopped");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for mock core event")
    }
}

impl Drop for MockCore {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    handler: Handler,
    events: mpsc::UnboundedSender<CoreEvent>,
    delay: Duration,
) {
    let (mut reader, mut writer) =
        Connection::new(stream, "mock-client", Duration::from_secs(30)).into_parts();

    loop {
        let frame = match reader.recv("mock-client", Duration::from_secs(30)).await {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let _ = events.send(CoreEvent::Frame {
            msg_type: frame.header.msg_type,
            payload: frame.payload.clone(),
        });

        let (bytes, close) = match handler(&frame) {
            Reply::Frame(msg_type, payload) => {
                (encode_frame(msg_type, &payload).unwrap().to_vec(), false)
            }
            Reply::Raw(bytes) => (bytes, false),
            Reply::RawThenClose(bytes) => (bytes, true),
            Reply::Silent => continue,
            Reply::Close => break,
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if writer.write_all(&bytes).await.is_err() || close {
            break;
        }
    }

    let _ = events.send(CoreEvent::Closed);
}

/// Address nothing listens on
pub(crate) async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Address whose accept queue is full, so new connects never complete.
///
/// The returned listener and queued streams must stay alive for the duration.
pub(crate) async fn unresponsive_addr() -> (String, (TcpListener, Vec<TcpStream>)) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    // Nothing accepts; once the queue is full further SYNs are dropped
    let mut queued = Vec::new();
    for _ in 0..8 {
        if let Ok(Ok(stream)) =
            tokio::time::timeout(Duration::from_millis(50), TcpStream::connect(addr)).await
        {
            queued.push(stream);
        }
    }

    (addr.to_string(), (listener, queued))
}

/// A Core that knows `online`, accepts `GOOD_PASSWORD` and answers pings
pub(crate) fn core_handler(online: Vec<String>) -> impl Fn(&Frame) -> Reply + Send + Sync {
    move |frame: &Frame| match frame.header.message_type() {
        Some(MessageType::LoginRequest) => {
            let req = LoginRequest::decode(&frame.payload).unwrap();
            let resp = if req.password == GOOD_PASSWORD {
                LoginResponse::accepted("T1", 42, &req.username, "Login successful")
            } else {
                LoginResponse::rejected("Invalid username or password")
            };
            Reply::Frame(MessageType::LoginResponse, resp.encode().unwrap())
        }
        Some(MessageType::RegisterRequest) => {
            let req = RegisterRequest::decode(&frame.payload).unwrap();
            let resp = RegisterResponse {
                ok: req.username != "taken",
                message: String::new(),
            };
            Reply::Frame(MessageType::RegisterResponse, resp.encode().unwrap())
        }
        Some(MessageType::OnlineListRequest) => {
            let resp = OnlineListResponse {
                usernames: online.clone(),
            };
            Reply::Frame(MessageType::OnlineListResponse, resp.encode().unwrap())
        }
        Some(MessageType::Ping) => Reply::Frame(MessageType::Pong, frame.payload.clone()),
        _ => Reply::Silent,
    }
}

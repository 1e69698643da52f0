//! In-memory sockets for driving clients without a network.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use clipper_chat::auth::Identity;
use clipper_chat::hub::HubHandle;
use clipper_chat::ratelimit::{RateLimitConfig, RateLimiter, SpamGuard};
use clipper_chat::store::MemoryStore;
use clipper_chat::websocket::{Client, ClientConfig, ClientContext, ConnectionOutcome};

pub type ClientSink = mpsc::UnboundedSender<Message>;
pub type ClientStream = mpsc::UnboundedReceiver<Result<Message, String>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Remote end of one connection
pub struct TestClient {
    pub user_id: String,
    inbound: mpsc::UnboundedSender<Result<Message, String>>,
    outbound: mpsc::UnboundedReceiver<Message>,
    pub task: JoinHandle<ConnectionOutcome>,
}

impl TestClient {
    pub fn spawn<F, Fut>(user_id: &str, run: F) -> Self
    where
        F: FnOnce(ClientSink, ClientStream) -> Fut,
        Fut: Future<Output = ConnectionOutcome> + Send + 'static,
    {
        let (inbound, stream) = mpsc::unbounded();
        let (sink, outbound) = mpsc::unbounded();
        let task = tokio::spawn(run(sink, stream));

        Self {
            user_id: user_id.to_string(),
            inbound,
            outbound,
            task,
        }
    }

    /// Connect straight to a hub
    pub fn join(hub: &HubHandle, ctx: &Arc<ClientContext>, user_id: &str) -> Self {
        let identity = identity(user_id);
        let hub = hub.clone();
        let ctx = ctx.clone();
        Self::spawn(user_id, move |sink, stream| {
            Client::new(&identity, hub, ctx).start(sink, stream)
        })
    }

    pub fn send_json(&self, value: Value) {
        self.send(Message::Text(value.to_string().into()));
    }

    pub fn say(&self, content: &str) {
        self.send_json(json!({ "type": "message", "content": content }));
    }

    pub fn send(&self, message: Message) {
        let _ = self.inbound.unbounded_send(Ok(message));
    }

    /// Answer pings forever so the read deadline never expires
    pub fn keep_alive(&self, every: Duration) {
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                if inbound.unbounded_send(Ok(Message::Pong(Default::default()))).is_err() {
                    break;
                }
            }
        });
    }

    /// Next frame of any kind, `None` on timeout or end of stream
    pub async fn next_frame(&mut self, within: Duration) -> Option<Message> {
        tokio::time::timeout(within, self.outbound.next())
            .await
            .ok()
            .flatten()
    }

    /// Next JSON text frame, skipping pings
    pub async fn next_json_within(&mut self, within: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_frame(remaining).await? {
                Message::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).expect("server sent invalid JSON"))
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => return None,
            }
        }
    }

    pub async fn next_json(&mut self) -> Value {
        self.next_json_within(RECV_TIMEOUT)
            .await
            .expect("expected a JSON frame")
    }

    /// First JSON frame matching `predicate`, discarding the rest
    pub async fn wait_for(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        loop {
            let value = self.next_json().await;
            if predicate(&value) {
                return value;
            }
        }
    }

    /// All JSON frames received until `quiet` passes without one
    pub async fn drain(&mut self, quiet: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(value) = self.next_json_within(quiet).await {
            frames.push(value);
        }
        frames
    }

    /// Skip text frames until the close frame and return its code
    pub async fn close_code(&mut self) -> Option<u16> {
        loop {
            match self.next_frame(RECV_TIMEOUT).await? {
                Message::Close(frame) => return frame.map(|f| f.code),
                _ => continue,
            }
        }
    }
}

pub fn identity(user_id: &str) -> Identity {
    Identity::new(user_id, format!("{user_id}-name"))
}

pub fn is_type(value: &Value, ty: &str) -> bool {
    value["type"] == ty
}

pub fn is_presence(value: &Value, user_id: &str, action: &str) -> bool {
    is_type(value, "presence")
        && value["data"]["user_id"] == user_id
        && value["data"]["action"] == action
}

pub fn context(store: Arc<MemoryStore>, config: ClientConfig, limits: RateLimitConfig) -> Arc<ClientContext> {
    guarded_context(store, config, limits, SpamGuard::disabled())
}

pub fn guarded_context(
    store: Arc<MemoryStore>,
    config: ClientConfig,
    limits: RateLimitConfig,
    spam_guard: SpamGuard,
) -> Arc<ClientContext> {
    Arc::new(ClientContext {
        config,
        rate_limiter: Arc::new(RateLimiter::new(limits)),
        spam_guard: Arc::new(spam_guard),
        store: store.clone(),
        moderation: store,
    })
}

pub fn default_context(store: Arc<MemoryStore>) -> Arc<ClientContext> {
    context(store, ClientConfig::default(), RateLimitConfig::default())
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

//! Test doubles shared by the integration tests.
//! Fakes implement the same traits as the real Ollama backend and radio writer.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use meshgpt::bridge::inference::{ChatRequest, InferenceError};
use meshgpt::bridge::pipeline::PipelineSettings;
use meshgpt::bridge::{
    BridgeServer, ChatMessage, Classifier, Dispatcher, InMemorySessionStore, InferenceBackend,
    NodeNames, OutboundMessage, ReplyPipeline, SessionStore, Transport,
};

pub const ME: &str = "!deadbeef";
pub const CADEN: &str = "!00000001";
pub const SYSTEM: &str = "You are MeshGPT. Be concise.";

/// Replies from a script (falling back to "ok") and records every request it sees.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<Vec<Result<String, String>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .rev()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(InferenceError::Other(reason)),
            None => Ok("ok".to_string()),
        }
    }
}

/// Sleeps before answering and tracks how many calls overlap.
pub struct SlowBackend {
    pub delay: Duration,
    active: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl SlowBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InferenceBackend for SlowBackend {
    async fn chat(&self, _request: &ChatRequest) -> Result<String, InferenceError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("done".to_string())
    }
}

/// Records every outbound message; optionally fails every send.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.text.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("radio write failed");
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub fn directory() -> HashMap<String, NodeNames> {
    let mut d = HashMap::new();
    d.insert(CADEN.to_string(), NodeNames::new("Caden", "Caden Long"));
    d.insert("!00000002".to_string(), NodeNames::new("", "Riley Mesh"));
    d
}

pub struct Fixture {
    pub server: BridgeServer,
    pub store: Arc<InMemorySessionStore>,
    pub transport: Arc<RecordingTransport>,
}

pub fn fixture(
    backend: Arc<dyn InferenceBackend>,
    transport: RecordingTransport,
    settings: PipelineSettings,
) -> Fixture {
    let store = Arc::new(InMemorySessionStore::new(ChatMessage::system(SYSTEM), 8));
    let transport = Arc::new(transport);
    let pipeline = ReplyPipeline::new(store.clone() as Arc<dyn SessionStore>, backend, settings);
    let dispatcher = Dispatcher::new(transport.clone(), 200);
    let (_tx, identity) = watch::channel(ME.to_string());
    let server = BridgeServer::new(
        Classifier::new("@meshgpt").unwrap(),
        pipeline,
        dispatcher,
        Arc::new(directory()),
        identity,
    );
    Fixture {
        server,
        store,
        transport,
    }
}

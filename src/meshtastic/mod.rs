//! # Meshtastic Device Communication Module
//!
//! Talks to a Meshtastic radio over the TCP stream API (port 4404 on Wi-Fi nodes and
//! `meshtasticd`). The byte stream carries `ToRadio` / `FromRadio` protobufs wrapped by
//! [`framer`].
//!
//! ## Tasks
//!
//! - **Reader** ([`MeshtasticReader`]): decodes `FromRadio`, learns our node number and the
//!   node directory, and forwards mesh packets as [`InboundEvent`]s on an unbounded channel.
//! - **Writer** ([`MeshtasticWriter`]): encodes text packets, requests the initial config,
//!   sends heartbeats, and paces transmissions. It implements the bridge's
//!   [`Transport`](crate::bridge::Transport).
//! - **Heartbeat**: TCP nodes drop clients that stay silent, so a heartbeat goes out every
//!   `heartbeat_seconds`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshgpt::config::MeshtasticConfig;
//! use meshgpt::meshtastic;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut link = meshtastic::connect(&MeshtasticConfig::default()).await?;
//!     while let Some(event) = link.events.recv().await {
//!         println!("{} -> {} on ch{}", event.sender, event.target, event.channel);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [meshtastic]
//! host = "localhost"
//! port = 4404
//! heartbeat_seconds = 30
//! min_send_gap_ms = 2000
//! hop_limit = 3
//! ```

pub mod framer;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use prost::Message;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bridge::dispatch::Transport;
use crate::bridge::{
    node_id_string, parse_node_id, Destination, InboundEvent, NodeDirectory, NodeNames,
    OutboundMessage, PortKind, BROADCAST_ID, BROADCAST_NUM,
};
use crate::config::MeshtasticConfig;
use crate::logutil::{escape_log, hex_snippet};
use crate::protobuf::meshtastic_generated as proto;
use framer::{encode_frame, StreamFramer};

/// Node information learned from the radio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedNodeInfo {
    pub node_id: u32,
    pub long_name: String,
    pub short_name: String,
    pub last_seen: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
}

/// Node directory shared between the reader (writes) and the bridge (lookups).
#[derive(Debug, Default)]
pub struct NodeCache {
    nodes: RwLock<HashMap<u32, CachedNodeInfo>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_node(&self, node_id: u32, long_name: &str, short_name: &str) {
        let now = Utc::now();
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes
            .entry(node_id)
            .and_modify(|n| {
                n.long_name = long_name.to_string();
                n.short_name = short_name.to_string();
                n.last_seen = now;
            })
            .or_insert_with(|| CachedNodeInfo {
                node_id,
                long_name: long_name.to_string(),
                short_name: short_name.to_string(),
                last_seen: now,
                first_seen: now,
            });
    }

    pub fn get(&self, node_id: u32) -> Option<CachedNodeInfo> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeDirectory for NodeCache {
    fn lookup(&self, identity: &str) -> Option<NodeNames> {
        let num = parse_node_id(identity)?;
        self.get(num)
            .map(|n| NodeNames::new(&n.short_name, &n.long_name))
    }
}

/// Writer pacing and packet parameters, typically sourced from Config
#[derive(Debug, Clone)]
pub struct WriterTuning {
    /// Minimum gap between any two text sends (ms).
    pub min_send_gap_ms: u64,
    pub hop_limit: u32,
}

impl Default for WriterTuning {
    fn default() -> Self {
        Self {
            min_send_gap_ms: 2000,
            hop_limit: 3,
        }
    }
}

impl From<&MeshtasticConfig> for WriterTuning {
    fn from(config: &MeshtasticConfig) -> Self {
        Self {
            min_send_gap_ms: config.min_send_gap_ms,
            hop_limit: config.hop_limit,
        }
    }
}

/// Reads the radio byte stream and turns frames into bridge events.
pub struct MeshtasticReader<R> {
    stream: R,
    framer: StreamFramer,
    events_tx: mpsc::UnboundedSender<InboundEvent>,
    identity_tx: watch::Sender<String>,
    config_complete_tx: watch::Sender<bool>,
    nodes: Arc<NodeCache>,
    config_request_id: u32,
}

impl<R: AsyncRead + Unpin + Send> MeshtasticReader<R> {
    pub fn new(
        stream: R,
        events_tx: mpsc::UnboundedSender<InboundEvent>,
        identity_tx: watch::Sender<String>,
        config_complete_tx: watch::Sender<bool>,
        nodes: Arc<NodeCache>,
        config_request_id: u32,
    ) -> Self {
        Self {
            stream,
            framer: StreamFramer::new(),
            events_tx,
            identity_tx,
            config_complete_tx,
            nodes,
            config_request_id,
        }
    }

    /// Read until the radio closes the stream or a read fails.
    pub async fn run(mut self) -> Result<()> {
        info!("Starting Meshtastic reader task");
        let mut buffer = [0u8; 1024];
        loop {
            let n = self.stream.read(&mut buffer).await?;
            if n == 0 {
                return Err(anyhow!("radio closed the connection"));
            }
            trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
            self.framer.push(&buffer[..n]);
            while let Some(frame) = self.framer.next_frame() {
                self.process_frame(&frame);
            }
        }
    }

    /// Decode one `FromRadio` payload. Undecodable frames are logged and skipped.
    pub fn process_frame(&mut self, data: &[u8]) {
        use proto::from_radio::PayloadVariant as FRPayload;

        let msg = match proto::FromRadio::decode(data) {
            Ok(m) => m,
            Err(e) => {
                debug!(
                    "Undecodable FromRadio ({} bytes, {}): {}",
                    data.len(),
                    e,
                    hex_snippet(data, 16)
                );
                return;
            }
        };

        match msg.payload_variant {
            Some(FRPayload::Packet(pkt)) => self.process_packet(pkt),
            Some(FRPayload::MyInfo(info)) => {
                let id = node_id_string(info.my_node_num);
                let changed = self.identity_tx.send_if_modified(|current| {
                    if *current == id {
                        false
                    } else {
                        *current = id.clone();
                        true
                    }
                });
                if changed {
                    info!("Our node id is {}", id);
                } else {
                    trace!("Received duplicate MyInfo, ignoring (node id already known)");
                }
            }
            Some(FRPayload::NodeInfo(n)) => {
                if let Some(user) = &n.user {
                    self.nodes
                        .update_node(n.num, user.long_name.trim(), user.short_name.trim());
                    debug!(
                        "Updated node info for {}: {} ({})",
                        node_id_string(n.num),
                        user.long_name,
                        user.short_name
                    );
                }
            }
            Some(FRPayload::ConfigCompleteId(id)) => {
                if id == self.config_request_id {
                    info!("Initial config download complete ({} nodes)", self.nodes.len());
                    self.config_complete_tx.send_replace(true);
                } else {
                    debug!("Received config_complete_id 0x{:08x} for another client", id);
                }
            }
            Some(FRPayload::Rebooted(_)) => {
                warn!("Radio reports it rebooted");
            }
            None => {
                trace!("FromRadio message with no recognised payload");
            }
        }
    }

    fn process_packet(&mut self, pkt: proto::MeshPacket) {
        use proto::mesh_packet::PayloadVariant as MPPayload;
        use proto::PortNum;

        let data = match pkt.payload_variant {
            Some(MPPayload::Decoded(d)) => d,
            Some(MPPayload::Encrypted(bytes)) => {
                trace!(
                    "Dropping encrypted packet from {} ({} bytes)",
                    node_id_string(pkt.from),
                    bytes.len()
                );
                return;
            }
            None => return,
        };

        if pkt.priority == proto::mesh_packet::priority::ACK && data.reply_id != 0 {
            debug!(
                "ACK received: id={} from={}",
                data.reply_id,
                node_id_string(pkt.from)
            );
        }

        let port = match PortNum::try_from(data.portnum) {
            Ok(PortNum::TextMessageApp) => PortKind::Text,
            Ok(PortNum::NodeinfoApp) => {
                if let Ok(user) = proto::User::decode(data.payload.clone()) {
                    let long_name = user.long_name.trim();
                    let short_name = user.short_name.trim();
                    if !long_name.is_empty() || !short_name.is_empty() {
                        self.nodes.update_node(pkt.from, long_name, short_name);
                        debug!(
                            "Updated node info for {}: {} ({})",
                            node_id_string(pkt.from),
                            long_name,
                            short_name
                        );
                    }
                }
                PortKind::Other(data.portnum)
            }
            _ => PortKind::Other(data.portnum),
        };

        let target = if pkt.to == BROADCAST_NUM {
            BROADCAST_ID.to_string()
        } else {
            node_id_string(pkt.to)
        };
        let event = InboundEvent {
            decoded: true,
            port,
            sender: node_id_string(pkt.from),
            target,
            channel: pkt.channel,
            payload: data.payload.to_vec(),
        };
        if port == PortKind::Text {
            debug!(
                "Text from {} to {} ch{}: {}",
                event.sender,
                event.target,
                event.channel,
                escape_log(&String::from_utf8_lossy(&event.payload))
            );
        }
        if self.events_tx.send(event).is_err() {
            trace!("Event receiver dropped; discarding packet");
        }
    }
}

struct WriterState<W> {
    stream: W,
    last_text_send: Option<Instant>,
}

/// Serialises all writes to the radio and enforces the send gap across callers.
pub struct MeshtasticWriter<W> {
    state: Mutex<WriterState<W>>,
    tuning: WriterTuning,
}

impl<W: AsyncWrite + Unpin + Send> MeshtasticWriter<W> {
    pub fn new(stream: W, tuning: WriterTuning) -> Self {
        Self {
            state: Mutex::new(WriterState {
                stream,
                last_text_send: None,
            }),
            tuning,
        }
    }

    pub async fn send_want_config(&self, request_id: u32) -> Result<()> {
        use proto::to_radio::PayloadVariant;
        self.send_toradio(proto::ToRadio {
            payload_variant: Some(PayloadVariant::WantConfigId(request_id)),
        })
        .await
    }

    pub async fn send_heartbeat(&self) -> Result<()> {
        use proto::to_radio::PayloadVariant;
        let nonce = rand::random::<u32>() & 0xffff;
        self.send_toradio(proto::ToRadio {
            payload_variant: Some(PayloadVariant::Heartbeat(proto::Heartbeat { nonce })),
        })
        .await
    }

    pub async fn send_disconnect(&self) -> Result<()> {
        use proto::to_radio::PayloadVariant;
        self.send_toradio(proto::ToRadio {
            payload_variant: Some(PayloadVariant::Disconnect(true)),
        })
        .await
    }

    async fn send_toradio(&self, msg: proto::ToRadio) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::write_toradio(&mut state.stream, &msg).await
    }

    async fn write_toradio(stream: &mut W, msg: &proto::ToRadio) -> Result<()> {
        let frame = encode_frame(&msg.encode_to_vec())?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        trace!("Sent ToRadio frame ({} bytes)", frame.len());
        Ok(())
    }

    /// Send one text packet and return its packet id (0 when no ack was requested).
    pub async fn send_text_packet(&self, message: &OutboundMessage) -> Result<u32> {
        use proto::mesh_packet::PayloadVariant as MPPayload;
        use proto::to_radio::PayloadVariant as TRPayload;

        let to = match &message.destination {
            Destination::Broadcast => BROADCAST_NUM,
            Destination::Node(id) => parse_node_id(id)
                .ok_or_else(|| anyhow!("invalid destination node id '{}'", id))?,
        };
        let (id, priority) = if message.want_ack {
            let mut id: u32 = rand::random();
            if id == 0 {
                id = 1;
            }
            (id, proto::mesh_packet::priority::RELIABLE)
        } else {
            (0, 0)
        };

        let packet = proto::MeshPacket {
            to,
            channel: message.channel,
            id,
            hop_limit: self.tuning.hop_limit,
            want_ack: message.want_ack,
            priority,
            payload_variant: Some(MPPayload::Decoded(proto::Data {
                portnum: proto::PortNum::TextMessageApp as i32,
                payload: message.text.as_bytes().to_vec().into(),
                ..Default::default()
            })),
            ..Default::default()
        };
        let msg = proto::ToRadio {
            payload_variant: Some(TRPayload::Packet(packet)),
        };

        let mut state = self.state.lock().await;
        Self::enforce_min_send_gap(
            state.last_text_send,
            Duration::from_millis(self.tuning.min_send_gap_ms),
        )
        .await;
        Self::write_toradio(&mut state.stream, &msg).await?;
        state.last_text_send = Some(Instant::now());
        debug!(
            "Sent text id={} to={} ch={} ack={} ({} bytes)",
            id,
            message.destination,
            message.channel,
            message.want_ack,
            message.text.len()
        );
        Ok(id)
    }

    async fn enforce_min_send_gap(last_send: Option<Instant>, min_gap: Duration) {
        if let Some(last) = last_send {
            let elapsed = last.elapsed();
            if elapsed < min_gap {
                let wait = min_gap - elapsed;
                debug!(
                    "Gating: waiting {}ms to respect minimum {}ms between text sends",
                    wait.as_millis(),
                    min_gap.as_millis()
                );
                sleep(wait).await;
            }
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Transport for MeshtasticWriter<W> {
    async fn send_text(&self, message: &OutboundMessage) -> Result<()> {
        self.send_text_packet(message).await.map(|_| ())
    }
}

/// Send a heartbeat every `every` until the writer fails.
pub fn spawn_heartbeat<W>(writer: Arc<MeshtasticWriter<W>>, every: Duration) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = writer.send_heartbeat().await {
                warn!("Heartbeat failed, stopping heartbeat task: {}", e);
                break;
            }
            trace!("heartbeat sent");
        }
    })
}

/// A live TCP link to the radio.
pub struct MeshtasticLink {
    pub writer: Arc<MeshtasticWriter<OwnedWriteHalf>>,
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
    pub identity: watch::Receiver<String>,
    pub config_complete: watch::Receiver<bool>,
    pub nodes: Arc<NodeCache>,
    reader_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl MeshtasticLink {
    /// Wait until the radio finished the initial config download. Returns false on timeout.
    pub async fn wait_for_config(&mut self, timeout: Duration) -> bool {
        let mut rx = self.config_complete.clone();
        let done = tokio::time::timeout(timeout, rx.wait_for(|done| *done))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        done
    }

    pub fn own_identity(&self) -> String {
        self.identity.borrow().clone()
    }

    /// Tell the radio we are leaving and stop the background tasks.
    pub async fn shutdown(self) {
        if let Some(hb) = &self.heartbeat_task {
            hb.abort();
        }
        if let Err(e) = self.writer.send_disconnect().await {
            debug!("Disconnect notice failed: {}", e);
        }
        self.reader_task.abort();
        info!("Meshtastic link closed");
    }
}

/// Connect to the radio, request its config and start the reader and heartbeat tasks.
pub async fn connect(config: &MeshtasticConfig) -> Result<MeshtasticLink> {
    let addr = config.address();
    info!("Connecting to Meshtastic node at {}", addr);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| anyhow!("Failed to connect to {}: {}", addr, e))?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {}", e);
    }
    let (read_half, write_half) = stream.into_split();

    let (events_tx, events) = mpsc::unbounded_channel();
    let (identity_tx, identity) = watch::channel(String::new());
    let (config_complete_tx, config_complete) = watch::channel(false);
    let nodes = Arc::new(NodeCache::new());

    let mut config_request_id: u32 = rand::random();
    if config_request_id == 0 {
        config_request_id = 1;
    }

    let reader = MeshtasticReader::new(
        read_half,
        events_tx,
        identity_tx,
        config_complete_tx,
        nodes.clone(),
        config_request_id,
    );
    let reader_task = tokio::spawn(async move {
        if let Err(e) = reader.run().await {
            error!("Meshtastic reader stopped: {}", e);
        }
    });

    let writer = Arc::new(MeshtasticWriter::new(write_half, WriterTuning::from(config)));
    info!(
        "Requesting initial config from radio (want_config_id=0x{:08x})",
        config_request_id
    );
    writer.send_want_config(config_request_id).await?;

    let heartbeat_task = if config.heartbeat_seconds > 0 {
        Some(spawn_heartbeat(
            writer.clone(),
            Duration::from_secs(config.heartbeat_seconds),
        ))
    } else {
        None
    };

    Ok(MeshtasticLink {
        writer,
        events,
        identity,
        config_complete,
        nodes,
        reader_task,
        heartbeat_task,
    })
}

//! # Bridge Event Loop
//!
//! [`BridgeServer`] pulls [`InboundEvent`]s from an [`EventSource`] and runs each through
//! classifier → pipeline → dispatcher. Every event is handled inside its own error boundary:
//! a failed generation or send is logged and counted, and the loop moves on.
//!
//! With `max_concurrent_replies == 1` events are handled one at a time in arrival order.
//! Larger values spawn accepted packets onto a bounded pool (a [`Semaphore`] limits how many
//! replies are in flight). Shutdown waits for in-flight replies before returning.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use super::classifier::{AcceptedPacket, Classification, Classifier, IgnoreReason};
use super::dispatch::{Dispatcher, Transport};
use super::errors::BridgeError;
use super::inference::InferenceBackend;
use super::pipeline::{PipelineSettings, ReplyPipeline};
use super::session::InMemorySessionStore;
use super::{ChatMessage, InboundEvent, NodeDirectory, OutboundMessage};
use crate::config::Config;
use crate::logutil::truncate_for_log;
use crate::metrics;

const LOG_TEXT_MAX: usize = 120;

/// Lazy, non-restartable stream of inbound packets. `None` means the source is exhausted.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<InboundEvent>;
}

#[async_trait]
impl EventSource for mpsc::UnboundedReceiver<InboundEvent> {
    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for mpsc::Receiver<InboundEvent> {
    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.recv().await
    }
}

#[async_trait]
impl<T: EventSource + ?Sized> EventSource for &mut T {
    async fn next_event(&mut self) -> Option<InboundEvent> {
        (**self).next_event().await
    }
}

pub struct BridgeServer {
    name: String,
    classifier: Classifier,
    pipeline: Arc<ReplyPipeline>,
    dispatcher: Arc<Dispatcher>,
    directory: Arc<dyn NodeDirectory + Send + Sync>,
    identity: watch::Receiver<String>,
    max_concurrent: usize,
    stats_interval: Option<Duration>,
}

impl BridgeServer {
    /// `identity` carries our own node id; it is empty until the radio reports it.
    pub fn new(
        classifier: Classifier,
        pipeline: ReplyPipeline,
        dispatcher: Dispatcher,
        directory: Arc<dyn NodeDirectory + Send + Sync>,
        identity: watch::Receiver<String>,
    ) -> Self {
        Self {
            name: "MeshGPT".to_string(),
            classifier,
            pipeline: Arc::new(pipeline),
            dispatcher: Arc::new(dispatcher),
            directory,
            identity,
            max_concurrent: 1,
            stats_interval: None,
        }
    }

    /// Wire a server from configuration. The system prompt's `{date}` is rendered now.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn InferenceBackend>,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn NodeDirectory + Send + Sync>,
        identity: watch::Receiver<String>,
    ) -> anyhow::Result<Self> {
        let classifier = Classifier::new(&config.bot.mention_token)
            .map_err(|e| anyhow::anyhow!("invalid mention token: {}", e))?;
        let system = config
            .bot
            .render_system_prompt(chrono::Local::now().date_naive());
        let store = Arc::new(InMemorySessionStore::new(
            ChatMessage::system(system),
            config.bot.max_history_turns,
        ));
        let pipeline = ReplyPipeline::new(
            store,
            backend,
            PipelineSettings::from_config(&config.inference),
        );
        let dispatcher = Dispatcher::new(transport, config.bot.max_text_bytes);
        Ok(Self::new(classifier, pipeline, dispatcher, directory, identity)
            .with_name(&config.bot.name)
            .with_max_concurrent(config.bot.max_concurrent_replies)
            .with_stats_interval(Some(Duration::from_secs(config.bot.stats_interval_seconds))))
    }

    /// Name used in log lines; blank names keep the current one.
    pub fn with_name(mut self, name: &str) -> Self {
        let name = name.trim();
        if !name.is_empty() {
            self.name = name.to_string();
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Emit a metrics line at this interval while running.
    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn pipeline(&self) -> &ReplyPipeline {
        &self.pipeline
    }

    pub fn own_identity(&self) -> String {
        self.identity.borrow().clone()
    }

    pub fn classify(&self, event: &InboundEvent) -> Classification {
        let own = self.own_identity();
        self.classifier.classify(event, &own, self.directory.as_ref())
    }

    /// Handle one event to completion. Returns what was sent, if anything. Never fails: every
    /// error is logged and swallowed here.
    pub async fn handle_event(&self, event: InboundEvent) -> Option<OutboundMessage> {
        match self.accept(&event) {
            Some(packet) => reply_to(&self.pipeline, &self.dispatcher, packet).await,
            None => None,
        }
    }

    fn accept(&self, event: &InboundEvent) -> Option<AcceptedPacket> {
        metrics::inc_packets_seen();
        match self.classify(event) {
            Classification::Accept(packet) => Some(packet),
            Classification::Ignore(IgnoreReason::Undecodable) => {
                metrics::inc_packets_ignored();
                let err = BridgeError::MalformedPacket {
                    sender: event.sender.clone(),
                    reason: format!("undecodable payload ({} bytes)", event.payload.len()),
                };
                debug!("{}", err);
                None
            }
            Classification::Ignore(reason) => {
                metrics::inc_packets_ignored();
                trace!(
                    "ignore from={} to={} ch={}: {:?}",
                    event.sender,
                    event.target,
                    event.channel,
                    reason
                );
                None
            }
        }
    }

    /// Run until the source is exhausted or Ctrl-C arrives.
    pub async fn run<S: EventSource>(&self, source: S) -> anyhow::Result<()> {
        self.run_until(source, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await
    }

    /// Run until the source is exhausted or `shutdown` resolves, then wait for replies that
    /// are still in flight.
    pub async fn run_until<S, F>(&self, mut source: S, shutdown: F) -> anyhow::Result<()>
    where
        S: EventSource,
        F: Future<Output = ()>,
    {
        info!(
            "{} running (mention token '{}', up to {} concurrent repl{})",
            self.name,
            self.classifier.mention_token(),
            self.max_concurrent,
            if self.max_concurrent == 1 { "y" } else { "ies" }
        );
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        let mut stats = self.stats_interval.map(|every| {
            let mut t = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            t
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                _ = async {
                    match stats.as_mut() {
                        Some(t) => { t.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    info!("stats: {} conversations={}", metrics::snapshot(), self.pipeline.store().conversation_count());
                }

                // reap finished workers so the set does not grow without bound
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("reply task failed: {}", e);
                    }
                }

                event = source.next_event() => {
                    let Some(event) = event else {
                        debug!("event source closed");
                        break;
                    };
                    let Some(packet) = self.accept(&event) else { continue };

                    if self.max_concurrent == 1 {
                        reply_to(&self.pipeline, &self.dispatcher, packet).await;
                        continue;
                    }

                    // a full pool must not hold off shutdown
                    let permit = tokio::select! {
                        _ = &mut shutdown => {
                            info!(
                                "Shutdown while the pool was full; dropping message from {}",
                                packet.sender
                            );
                            break;
                        }
                        permit = permits.clone().acquire_owned() => match permit {
                            Ok(p) => p,
                            Err(_) => break,
                        },
                    };
                    let pipeline = self.pipeline.clone();
                    let dispatcher = self.dispatcher.clone();
                    in_flight.spawn(async move {
                        reply_to(&pipeline, &dispatcher, packet).await;
                        drop(permit);
                    });
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Waiting for {} in-flight repl(ies)", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("reply task failed: {}", e);
            }
        }
        info!("{} stopped: {}", self.name, metrics::snapshot());
        Ok(())
    }
}

/// Generate and send one reply. Errors end here.
async fn reply_to(
    pipeline: &ReplyPipeline,
    dispatcher: &Dispatcher,
    packet: AcceptedPacket,
) -> Option<OutboundMessage> {
    info!(
        "Generating reply... {} by {} ({}): {}",
        packet.conversation_id,
        packet.sender_display_name,
        packet.sender,
        truncate_for_log(&packet.cleaned_text, LOG_TEXT_MAX)
    );

    let result = async {
        let reply = pipeline
            .generate(
                &packet.conversation_id,
                &packet.sender_display_name,
                &packet.cleaned_text,
            )
            .await?;
        metrics::observe_generation(reply.elapsed);
        info!(
            "Replying: {} [Generation Time: {:.1}s]",
            truncate_for_log(&reply.text, LOG_TEXT_MAX),
            reply.elapsed_seconds()
        );
        dispatcher
            .dispatch(
                packet.is_direct,
                &packet.sender_display_name,
                packet.channel,
                &packet.sender,
                &reply.text,
                reply.elapsed_seconds(),
            )
            .await
    }
    .await;

    match result {
        Ok(sent) => {
            metrics::inc_replies_sent();
            Some(sent)
        }
        Err(e) => {
            match &e {
                BridgeError::GenerationFailed { .. } => metrics::inc_generation_failures(),
                BridgeError::SendFailed { .. } => metrics::inc_send_failures(),
                BridgeError::MalformedPacket { .. } => {}
            }
            error!(
                "{} from {} ({}): '{}': {}",
                packet.conversation_id,
                packet.sender_display_name,
                packet.sender,
                truncate_for_log(&packet.cleaned_text, LOG_TEXT_MAX),
                e
            );
            None
        }
    }
}

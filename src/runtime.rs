// ABOUTME: The thin host loop for one persona: stimuli in, arbitrated responses out
// ABOUTME: A single worker serializes stimulus handling and ticks for the hosted agent

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use troupe_core::{
    Announcement, Arbitrator, EnsembleCatalog, EventScheduler, PersonaSet, StateStore, Stimulus,
    StorylineEngine,
};

use crate::config::Config;
use crate::generate::{GenerationContext, ResponseGenerator};
use crate::metrics;
use crate::platform::{send_with_retry, ChatPlatform};

/// Work items for the per-agent worker. Platform adapters push stimuli;
/// the ticker pushes tick signals.
#[derive(Debug)]
pub enum AgentSignal {
    Stimulus(Stimulus),
    Tick,
}

/// Hosts one persona's share of the ensemble. All handling goes through
/// one worker task, so a slow generation delays the next tick instead of
/// racing it; across different agents everything is fully concurrent
/// through the shared store.
pub struct AgentRuntime {
    agent_id: String,
    config: Arc<Config>,
    personas: Arc<PersonaSet>,
    store: StateStore,
    arbitrator: Arbitrator,
    events: EventScheduler,
    storylines: StorylineEngine,
    platform: Arc<dyn ChatPlatform>,
    generator: Arc<dyn ResponseGenerator>,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        personas: Arc<PersonaSet>,
        catalog: Arc<EnsembleCatalog>,
        store: StateStore,
        platform: Arc<dyn ChatPlatform>,
        generator: Arc<dyn ResponseGenerator>,
        agent_id: impl Into<String>,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        let persona = personas.require(&agent_id)?;
        // Seed state on first boot so arbitration sees real energy values.
        store.load_or_init_agent(persona)?;

        let arbitrator = Arbitrator::new(
            store.clone(),
            Arc::clone(&personas),
            config.arbitration.clone(),
            &agent_id,
        )?;
        let events = EventScheduler::new(
            store.clone(),
            Arc::clone(&personas),
            Arc::clone(&catalog),
            config.drift.clone(),
            &agent_id,
        )?;
        let storylines = StorylineEngine::new(
            store.clone(),
            Arc::clone(&personas),
            Arc::clone(&catalog),
            &agent_id,
        )?;

        Ok(Self {
            agent_id,
            config,
            personas,
            store,
            arbitrator,
            events,
            storylines,
            platform,
            generator,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Handle one signal, isolating failures: a lost stimulus or tick is
    /// logged and dropped, never allowed to stop the loop.
    pub async fn handle_signal(&self, signal: AgentSignal) {
        match signal {
            AgentSignal::Stimulus(stimulus) => {
                let stimulus_id = stimulus.id.clone();
                if let Err(e) = self.handle_stimulus(stimulus).await {
                    tracing::error!(
                        error = %e,
                        agent_id = %self.agent_id,
                        stimulus_id = %stimulus_id,
                        "Stimulus handling failed"
                    );
                }
            }
            AgentSignal::Tick => {
                if let Err(e) = self.handle_tick().await {
                    tracing::error!(
                        error = %e,
                        agent_id = %self.agent_id,
                        "Tick handling failed"
                    );
                }
            }
        }
    }

    /// Arbitrate a stimulus and, if this process wins the claim, execute
    /// the response side effect.
    pub async fn handle_stimulus(&self, stimulus: Stimulus) -> Result<()> {
        let now = Utc::now();
        metrics::record_stimulus_seen();

        let Some(decision) = self.arbitrator.decide(&stimulus, now)? else {
            return Ok(());
        };

        // Claim-then-act: the conditional insert is the only thing
        // standing between N deciding processes and N replies.
        if !self.arbitrator.claim_stimulus(&stimulus, now)? {
            metrics::record_claim_lost();
            tracing::debug!(
                agent_id = %self.agent_id,
                stimulus_id = %stimulus.id,
                "Claim already held; abstaining"
            );
            return Ok(());
        }
        metrics::record_claim_won();

        // The cooldown is consumed as soon as the claim is won, even if
        // generation fails below; this prevents rapid retry storms.
        self.store.record_firing(&decision.agent_id, now)?;

        let persona = self.personas.require(&decision.agent_id)?;
        let state = self.store.load_or_init_agent(persona)?;
        let ctx = GenerationContext {
            persona,
            state: &state,
            style: &decision.style,
            stimulus_text: Some(&stimulus.text),
        };

        let text = match self.generator.generate(ctx).await {
            Ok(text) => text,
            Err(e) => {
                metrics::record_response_dropped();
                tracing::warn!(
                    error = %e,
                    agent_id = %self.agent_id,
                    stimulus_id = %stimulus.id,
                    "Generation failed after winning claim; cooldown stays consumed"
                );
                return Ok(());
            }
        };

        match send_with_retry(
            self.platform.as_ref(),
            &stimulus.channel_id,
            &text,
            self.config.send.max_attempts,
            Duration::from_millis(self.config.send.backoff_ms),
        )
        .await
        {
            Ok(()) => {
                metrics::record_response_sent();
                tracing::info!(
                    agent_id = %self.agent_id,
                    stimulus_id = %stimulus.id,
                    channel_id = %stimulus.channel_id,
                    length = %decision.style.length,
                    direct = decision.direct_address,
                    "Response sent"
                );
            }
            Err(e) => {
                metrics::record_response_dropped();
                tracing::warn!(
                    error = %e,
                    stimulus_id = %stimulus.id,
                    "Dropping response after exhausting retries"
                );
            }
        }
        Ok(())
    }

    /// Run one world-simulation tick and deliver any announcements.
    pub async fn handle_tick(&self) -> Result<()> {
        let now = Utc::now();
        metrics::record_tick();

        let mut announcements = self.events.tick(now)?;
        announcements.extend(self.storylines.tick(now)?);

        for announcement in announcements {
            metrics::record_announcement();
            if let Err(e) = self.deliver_announcement(&announcement).await {
                metrics::record_response_dropped();
                tracing::warn!(
                    error = %e,
                    agent_id = %announcement.agent_id,
                    "Dropping announcement after exhausting retries"
                );
            }
        }
        Ok(())
    }

    async fn deliver_announcement(&self, announcement: &Announcement) -> Result<()> {
        let body = if announcement.broadcast {
            announcement.text.clone()
        } else {
            let speaker = self
                .personas
                .get(&announcement.agent_id)
                .map(|p| p.display_name.as_str())
                .unwrap_or(announcement.agent_id.as_str());
            format!("{}: {}", speaker, announcement.text)
        };
        send_with_retry(
            self.platform.as_ref(),
            &self.config.broadcast_channel,
            &body,
            self.config.send.max_attempts,
            Duration::from_millis(self.config.send.backoff_ms),
        )
        .await
    }
}

/// Create the signal channel for one agent. The bound is small on
/// purpose: ticks that arrive while the worker is busy coalesce through
/// `try_send` instead of queueing without limit.
pub fn signal_channel() -> (mpsc::Sender<AgentSignal>, mpsc::Receiver<AgentSignal>) {
    mpsc::channel(16)
}

/// Drive the worker until every sender is dropped.
pub async fn run_agent(runtime: AgentRuntime, mut rx: mpsc::Receiver<AgentSignal>) {
    tracing::info!(agent_id = %runtime.agent_id(), "Agent runtime started");
    while let Some(signal) = rx.recv().await {
        runtime.handle_signal(signal).await;
    }
    tracing::info!(agent_id = %runtime.agent_id(), "Agent runtime stopped");
}

/// Background ticker feeding tick signals into the worker at a fixed
/// interval. A full channel means the worker is behind; the tick is
/// skipped rather than queued.
pub fn spawn_ticker(tx: mpsc::Sender<AgentSignal>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would fire before the platform has
        // settled; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match tx.try_send(AgentSignal::Tick) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!("Worker busy; skipping tick");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
}

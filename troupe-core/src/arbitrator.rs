// ABOUTME: Response arbitration: whether any agent answers a stimulus, which one, and how
// ABOUTME: Every process decides independently; the atomic stimulus claim resolves races

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::persona::PersonaSet;
use crate::scorer;
use crate::state::AgentState;
use crate::store::{agent_scope, stimulus_claim_key, StateStore, GLOBAL_SCOPE};

/// How a channel participates in arbitration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelClass {
    /// Full arbitration pipeline.
    Shared,
    /// Only ever routed to one agent; bypasses the global cooldown and
    /// the probability roll, but never the owner's personal cooldown.
    Exclusive { agent_id: String },
    /// Never answered.
    Silent,
}

/// An inbound message under arbitration. Ephemeral; only the claim row
/// outlives the decision.
#[derive(Debug, Clone)]
pub struct Stimulus {
    pub id: String,
    pub author_id: String,
    pub channel_id: String,
    pub channel_class: ChannelClass,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseLength {
    VeryShort,
    Short,
    Medium,
    Long,
}

impl std::fmt::Display for ResponseLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseLength::VeryShort => write!(f, "very-short"),
            ResponseLength::Short => write!(f, "short"),
            ResponseLength::Medium => write!(f, "medium"),
            ResponseLength::Long => write!(f, "long"),
        }
    }
}

/// Delivery style handed to the text-generation collaborator.
#[derive(Debug, Clone)]
pub struct ResponseStyle {
    pub length: ResponseLength,
    /// Derived from the agent's current mood.
    pub tone: String,
}

/// A positive arbitration outcome. The caller must still win the
/// stimulus claim before executing any side effect.
#[derive(Debug, Clone)]
pub struct Decision {
    pub agent_id: String,
    pub style: ResponseStyle,
    pub direct_address: bool,
}

/// Tuning knobs for the decide pipeline. Probabilities are per stimulus;
/// tests pin them to 0.0/1.0 for determinism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Minimum relevance score for a clear winner.
    pub relevance_threshold: i64,
    /// Organic response probability before modifiers.
    pub base_probability: f64,
    /// Added when this agent is the clear relevance winner.
    pub relevance_boost: f64,
    /// Probability of answering a direct address (high, not guaranteed).
    pub direct_address_probability: f64,
    /// Added when the stimulus contains a question mark.
    pub question_boost: f64,
    /// Added when the stimulus is at least `long_message_chars` long.
    pub long_message_boost: f64,
    pub long_message_chars: usize,
    /// Window for counting recent ensemble responses.
    pub chattiness_window_mins: i64,
    /// Multiplier applied once per recent response; decays spam.
    pub chattiness_damping: f64,
    pub global_cooldown_secs: i64,
    pub personal_cooldown_secs: i64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 3,
            base_probability: 0.06,
            relevance_boost: 0.4,
            direct_address_probability: 0.85,
            question_boost: 0.08,
            long_message_boost: 0.05,
            long_message_chars: 80,
            chattiness_window_mins: 10,
            chattiness_damping: 0.6,
            global_cooldown_secs: 90,
            personal_cooldown_secs: 300,
        }
    }
}

/// The per-process arbitrator for one hosted agent. All cross-process
/// coordination happens through the shared state store.
pub struct Arbitrator {
    store: StateStore,
    personas: Arc<PersonaSet>,
    cfg: ArbitrationConfig,
    agent_id: String,
}

impl Arbitrator {
    pub fn new(
        store: StateStore,
        personas: Arc<PersonaSet>,
        cfg: ArbitrationConfig,
        agent_id: impl Into<String>,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        personas.require(&agent_id)?;
        Ok(Self {
            store,
            personas,
            cfg,
            agent_id,
        })
    }

    /// Run the decide pipeline for the hosted agent. `Some` means this
    /// process wants to respond; the caller must then win the stimulus
    /// claim via `claim_stimulus` before sending anything.
    pub fn decide(&self, stimulus: &Stimulus, now: DateTime<Utc>) -> Result<Option<Decision>> {
        match &stimulus.channel_class {
            ChannelClass::Silent => Ok(None),
            ChannelClass::Exclusive { agent_id } => {
                if agent_id != &self.agent_id {
                    return Ok(None);
                }
                if !self.personal_cooldown_ok(&self.agent_id, now)? {
                    tracing::debug!(
                        stimulus_id = %stimulus.id,
                        agent_id = %self.agent_id,
                        "Exclusive channel blocked by personal cooldown"
                    );
                    return Ok(None);
                }
                Ok(Some(self.decision(true, 0, now)?))
            }
            ChannelClass::Shared => self.decide_shared(stimulus, now),
        }
    }

    fn decide_shared(&self, stimulus: &Stimulus, now: DateTime<Utc>) -> Result<Option<Decision>> {
        let text_lower = stimulus.text.to_lowercase();

        // Direct address: independent of the global cooldown, still
        // subject to the addressed agent's personal cooldown.
        if let Some(addressed) = self
            .personas
            .iter()
            .find(|p| p.is_addressed_by(&text_lower))
        {
            if addressed.id != self.agent_id {
                return Ok(None);
            }
            if !self.personal_cooldown_ok(&self.agent_id, now)? {
                return Ok(None);
            }
            if rand::thread_rng().gen::<f64>() >= self.cfg.direct_address_probability {
                return Ok(None);
            }
            let recent = self.recent_firings(now)?;
            return Ok(Some(self.decision(true, recent, now)?));
        }

        // Ensemble-wide cooldown gate.
        if !self.global_cooldown_ok(now)? {
            return Ok(None);
        }

        let scores = scorer::score_all(&stimulus.text, &self.personas);
        let winner = scorer::clear_winner(&scores, self.cfg.relevance_threshold);
        if let Some(winner_id) = winner {
            if winner_id != self.agent_id {
                return Ok(None);
            }
        }

        // Rule 6: the personal cooldown is never bypassed. When this
        // agent is blocked, sibling processes are the fallback pick.
        if !self.personal_cooldown_ok(&self.agent_id, now)? {
            return Ok(None);
        }

        let mut probability = self.cfg.base_probability;
        if winner.is_some() {
            probability += self.cfg.relevance_boost;
        }
        if stimulus.text.contains('?') {
            probability += self.cfg.question_boost;
        }
        if stimulus.text.chars().count() >= self.cfg.long_message_chars {
            probability += self.cfg.long_message_boost;
        }

        let recent = self.recent_firings(now)?;
        probability *= self.cfg.chattiness_damping.powi(recent as i32);

        // No content winner: weight this agent's roll by its energy share
        // among agents not on personal cooldown, so the ensemble-wide pick
        // distribution matches an energy-weighted random selection.
        if winner.is_none() {
            let share = self.energy_share(now)?;
            if share <= 0.0 {
                return Ok(None);
            }
            probability *= share;
        }

        if rand::thread_rng().gen::<f64>() >= probability.min(1.0) {
            return Ok(None);
        }

        Ok(Some(self.decision(false, recent, now)?))
    }

    /// Attempt the atomic claim for a stimulus. Exactly one process in
    /// the ensemble gets true; everyone else abstains silently.
    pub fn claim_stimulus(&self, stimulus: &Stimulus, now: DateTime<Utc>) -> Result<bool> {
        self.store
            .try_claim(&stimulus_claim_key(&stimulus.id), &self.agent_id, now)
    }

    fn decision(&self, direct: bool, recent: i64, _now: DateTime<Utc>) -> Result<Decision> {
        let persona = self.personas.require(&self.agent_id)?;
        let state = self.store.load_or_init_agent(persona)?;
        Ok(Decision {
            agent_id: self.agent_id.clone(),
            style: derive_style(&state, direct, recent),
            direct_address: direct,
        })
    }

    fn personal_cooldown_ok(&self, agent_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let window = Duration::seconds(self.cfg.personal_cooldown_secs);
        match self.store.last_fired(&agent_scope(agent_id))? {
            Some(last) => Ok(now - last >= window),
            None => Ok(true),
        }
    }

    fn global_cooldown_ok(&self, now: DateTime<Utc>) -> Result<bool> {
        let window = Duration::seconds(self.cfg.global_cooldown_secs);
        match self.store.last_fired(GLOBAL_SCOPE)? {
            Some(last) => Ok(now - last >= window),
            None => Ok(true),
        }
    }

    fn recent_firings(&self, now: DateTime<Utc>) -> Result<i64> {
        let since = now - Duration::minutes(self.cfg.chattiness_window_mins);
        self.store.count_recent_firings(since)
    }

    /// This agent's energy as a fraction of all eligible agents' energy.
    fn energy_share(&self, now: DateTime<Utc>) -> Result<f64> {
        let mut total: i64 = 0;
        let mut mine: i64 = 0;
        for persona in self.personas.iter() {
            if !self.personal_cooldown_ok(&persona.id, now)? {
                continue;
            }
            let energy = match self.store.load_agent(&persona.id)? {
                Some(state) => state.energy,
                None => persona.default_energy,
            };
            // A drained agent keeps a sliver of weight so it can still be
            // picked when it is the only eligible one.
            let weight = energy.max(1);
            total += weight;
            if persona.id == self.agent_id {
                mine = weight;
            }
        }
        if total == 0 || mine == 0 {
            return Ok(0.0);
        }
        Ok(mine as f64 / total as f64)
    }
}

/// Sample a delivery style. Direct addresses skew longer; recent
/// ensemble activity skews everything shorter. Tone follows mood.
pub fn derive_style(state: &AgentState, direct: bool, recent_firings: i64) -> ResponseStyle {
    let mut weights: [f64; 4] = if direct {
        [10.0, 30.0, 40.0, 20.0]
    } else {
        [35.0, 40.0, 18.0, 7.0]
    };
    let damp = 1.0 / (1.0 + recent_firings as f64);
    weights[2] *= damp.sqrt();
    weights[3] *= damp;

    let total: f64 = weights.iter().sum();
    let mut roll = rand::thread_rng().gen::<f64>() * total;
    let lengths = [
        ResponseLength::VeryShort,
        ResponseLength::Short,
        ResponseLength::Medium,
        ResponseLength::Long,
    ];
    // Fall through to Long if float error exhausts the weights.
    let mut length = ResponseLength::Long;
    for (weight, candidate) in weights.iter().zip(lengths) {
        if roll < *weight {
            length = candidate;
            break;
        }
        roll -= weight;
    }

    ResponseStyle {
        length,
        tone: state.mood.clone(),
    }
}

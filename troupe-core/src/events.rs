// ABOUTME: Per-tick world simulation: state drift plus solo/crossover/crisis event rolls
// ABOUTME: Every trigger is deduplicated by a conditional insert against the active-event index

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::persona::{CrisisEvent, CrossoverEvent, EnsembleCatalog, Persona, PersonaSet};
use crate::state::AgentState;
use crate::store::{participants_key, EventInstance, EventKind, StateStore};

/// Text produced by a tick that should be delivered to the chat space.
#[derive(Debug, Clone)]
pub struct Announcement {
    /// The agent the text belongs to (speaker or subject).
    pub agent_id: String,
    pub text: String,
    /// True for crisis announcements addressed to the whole ensemble.
    pub broadcast: bool,
}

/// Tuning for gradual state drift between discrete events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Per-tick probability of resampling the activity field.
    pub activity_resample_probability: f64,
    /// Per-tick probability of resampling the mood field.
    pub mood_resample_probability: f64,
    /// Energy lost per tick while in a non-resting activity.
    pub energy_decay: i64,
    /// Energy gained per tick while resting.
    pub energy_recovery: i64,
    /// At or below this energy, a resting activity is forced.
    pub forced_rest_threshold: i64,
    /// Late-night window (wall clock hours) biasing mood sampling.
    pub late_night_start_hour: u32,
    pub late_night_end_hour: u32,
    /// Probability a late-night mood resample lands on the low-energy mood.
    pub late_night_low_mood_bias: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            activity_resample_probability: 0.25,
            mood_resample_probability: 0.15,
            energy_decay: 4,
            energy_recovery: 6,
            forced_rest_threshold: 12,
            late_night_start_hour: 23,
            late_night_end_hour: 6,
            late_night_low_mood_bias: 0.7,
        }
    }
}

impl DriftConfig {
    fn is_late_night(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        if self.late_night_start_hour <= self.late_night_end_hour {
            (self.late_night_start_hour..self.late_night_end_hour).contains(&hour)
        } else {
            hour >= self.late_night_start_hour || hour < self.late_night_end_hour
        }
    }
}

/// Runs one agent's share of the world simulation each tick. Crossover
/// and crisis entries are rolled only by their first-listed participant;
/// the unique active-event index makes each trigger fire exactly once
/// even when duplicate processes host the same participant set.
pub struct EventScheduler {
    store: StateStore,
    personas: Arc<PersonaSet>,
    catalog: Arc<EnsembleCatalog>,
    cfg: DriftConfig,
    agent_id: String,
}

impl EventScheduler {
    pub fn new(
        store: StateStore,
        personas: Arc<PersonaSet>,
        catalog: Arc<EnsembleCatalog>,
        cfg: DriftConfig,
        agent_id: impl Into<String>,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        personas.require(&agent_id)?;
        Ok(Self {
            store,
            personas,
            catalog,
            cfg,
            agent_id,
        })
    }

    /// One tick: sweep expired events, drift, then roll catalogs in
    /// priority order (crisis, crossover, solo).
    pub fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Announcement>> {
        let swept = self.store.sweep_expired_events(now)?;
        if swept > 0 {
            tracing::debug!(agent_id = %self.agent_id, swept, "Marked expired events completed");
        }

        let persona = self.personas.require(&self.agent_id)?;
        let mut state = self.store.load_or_init_agent(persona)?;

        self.drift(&mut state, persona, now);

        let mut announcements = Vec::new();
        self.roll_crises(&mut state, now, &mut announcements)?;
        self.roll_crossovers(&mut state, now, &mut announcements)?;
        self.roll_solo(persona, &mut state, now, &mut announcements)?;

        self.store.save_agent(&state)?;
        Ok(announcements)
    }

    /// Gradual mutation independent of discrete events.
    fn drift(&self, state: &mut AgentState, persona: &Persona, now: DateTime<Utc>) {
        let mut rng = rand::thread_rng();

        if rng.gen::<f64>() < self.cfg.activity_resample_probability {
            if let Some(activity) = persona.activities.choose(&mut rng) {
                state.activity = activity.clone();
            }
        }

        let resting = persona.resting_activities.contains(&state.activity);
        if resting {
            state.adjust_energy(self.cfg.energy_recovery);
        } else {
            state.adjust_energy(-self.cfg.energy_decay);
        }

        if state.energy <= self.cfg.forced_rest_threshold {
            // Exhaustion wins over whatever the agent was doing.
            if let Some(rest) = persona.resting_activities.choose(&mut rng) {
                state.activity = rest.clone();
            }
            state.mood = persona.low_energy_mood.clone();
        } else if rng.gen::<f64>() < self.cfg.mood_resample_probability {
            let low_bias = self.cfg.is_late_night(now)
                && rng.gen::<f64>() < self.cfg.late_night_low_mood_bias;
            if low_bias {
                state.mood = persona.low_energy_mood.clone();
            } else if let Some(mood) = persona.moods.choose(&mut rng) {
                state.mood = mood.clone();
            }
        }
    }

    /// Crisis events: very low probability, highest priority, broadcast
    /// to the whole ensemble.
    fn roll_crises(
        &self,
        state: &mut AgentState,
        now: DateTime<Utc>,
        announcements: &mut Vec<Announcement>,
    ) -> Result<()> {
        for event in &self.catalog.crisis_events {
            if !self.owns_roll(&event.participants) {
                continue;
            }
            if !self.try_trigger(
                &event.id,
                &event.participants,
                EventKind::Crisis,
                event.probability,
                event.duration_mins,
                now,
            )? {
                continue;
            }
            tracing::warn!(
                agent_id = %self.agent_id,
                catalog_id = %event.id,
                "Crisis event triggered"
            );
            self.apply_crisis(event, state)?;
            if let Some(ref text) = event.broadcast {
                announcements.push(Announcement {
                    agent_id: self.agent_id.clone(),
                    text: text.clone(),
                    broadcast: true,
                });
            }
        }
        Ok(())
    }

    fn roll_crossovers(
        &self,
        state: &mut AgentState,
        now: DateTime<Utc>,
        announcements: &mut Vec<Announcement>,
    ) -> Result<()> {
        for event in &self.catalog.crossover_events {
            if !self.owns_roll(&event.participants) {
                continue;
            }
            if !self.try_trigger(
                &event.id,
                &event.participants,
                EventKind::Crossover,
                event.probability,
                event.duration_mins,
                now,
            )? {
                continue;
            }
            tracing::info!(
                agent_id = %self.agent_id,
                catalog_id = %event.id,
                participants = %event.participants.join(","),
                "Crossover event triggered"
            );
            self.apply_crossover(event, state)?;
            for participant in &event.participants {
                if let Some(text) = event.announcements.get(participant) {
                    announcements.push(Announcement {
                        agent_id: participant.clone(),
                        text: text.clone(),
                        broadcast: false,
                    });
                }
            }
        }
        Ok(())
    }

    /// Solo events: rolled against this agent's own catalog; at most one
    /// fires per tick (first match wins, avoids stacking).
    fn roll_solo(
        &self,
        persona: &Persona,
        state: &mut AgentState,
        now: DateTime<Utc>,
        announcements: &mut Vec<Announcement>,
    ) -> Result<()> {
        let participants = vec![self.agent_id.clone()];
        for event in &persona.solo_events {
            if !self.try_trigger(
                &event.id,
                &participants,
                EventKind::Solo,
                event.probability,
                event.duration_mins,
                now,
            )? {
                continue;
            }
            tracing::info!(
                agent_id = %self.agent_id,
                catalog_id = %event.id,
                "Solo event triggered"
            );
            event.effects.apply(state);
            let memory_entry = event.announce.clone().unwrap_or_else(|| event.id.clone());
            state.remember(memory_entry);
            if let Some(ref text) = event.announce {
                announcements.push(Announcement {
                    agent_id: self.agent_id.clone(),
                    text: text.clone(),
                    broadcast: false,
                });
            }
            break;
        }
        Ok(())
    }

    /// Crossover and crisis rolls belong to the first-listed participant
    /// so only one process in the ensemble ever rolls a given entry.
    fn owns_roll(&self, participants: &[String]) -> bool {
        participants.first().map(String::as_str) == Some(self.agent_id.as_str())
    }

    /// Roll an entry and, on success, conditionally insert its instance.
    /// Returns true only when this call created the active instance, so
    /// effects apply exactly once per trigger.
    fn try_trigger(
        &self,
        catalog_id: &str,
        participants: &[String],
        kind: EventKind,
        probability: f64,
        duration_mins: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let pkey = participants_key(participants);
        if self.store.active_event_exists(catalog_id, &pkey, now)? {
            return Ok(false);
        }
        if rand::thread_rng().gen::<f64>() >= probability {
            return Ok(false);
        }
        let instance = EventInstance {
            id: uuid::Uuid::new_v4().to_string(),
            catalog_id: catalog_id.to_string(),
            participants: pkey,
            kind,
            starts_at: now,
            ends_at: now + Duration::minutes(duration_mins),
        };
        self.store.insert_event(&instance)
    }

    fn apply_crossover(&self, event: &CrossoverEvent, local: &mut AgentState) -> Result<()> {
        for participant in &event.participants {
            let effects = event.effects.get(participant).cloned();
            let memory = event
                .announcements
                .get(participant)
                .cloned()
                .unwrap_or_else(|| event.id.clone());
            let others: Vec<String> = event
                .participants
                .iter()
                .filter(|p| *p != participant)
                .cloned()
                .collect();
            let delta = event.relationship_delta;
            self.apply_to_participant(participant, local, move |state| {
                if let Some(effects) = effects {
                    effects.apply(state);
                }
                if let Some(delta) = delta {
                    for other in &others {
                        state.adjust_relationship(other, delta);
                    }
                }
                state.remember(memory);
            })?;
        }
        Ok(())
    }

    fn apply_crisis(&self, event: &CrisisEvent, local: &mut AgentState) -> Result<()> {
        for participant in &event.participants {
            let effects = event.effects.get(participant).cloned();
            let memory = event
                .broadcast
                .clone()
                .unwrap_or_else(|| event.id.clone());
            let others: Vec<String> = event
                .participants
                .iter()
                .filter(|p| *p != participant)
                .cloned()
                .collect();
            let delta = event.relationship_delta;
            self.apply_to_participant(participant, local, move |state| {
                if let Some(effects) = effects {
                    effects.apply(state);
                }
                if let Some(delta) = delta {
                    for other in &others {
                        state.adjust_relationship(other, delta);
                    }
                }
                state.remember(memory);
            })?;
        }
        Ok(())
    }

    /// Apply a mutation to one participant: the hosted agent mutates the
    /// in-flight local state, everyone else goes through a load/save.
    fn apply_to_participant<F>(
        &self,
        participant: &str,
        local: &mut AgentState,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut AgentState),
    {
        if participant == self.agent_id {
            mutate(local);
            return Ok(());
        }
        let persona = self.personas.require(participant)?;
        let mut state = self.store.load_or_init_agent(persona)?;
        mutate(&mut state);
        self.store.save_agent(&state)
    }
}

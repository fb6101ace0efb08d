// ABOUTME: Mutable per-agent runtime state (mood, location, activity, energy, relationships)
// ABOUTME: Plus the effect-delta type that events and storylines apply to that state

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::persona::Persona;

pub const ENERGY_MIN: i64 = 0;
pub const ENERGY_MAX: i64 = 100;
pub const RELATIONSHIP_MIN: i64 = -100;
pub const RELATIONSHIP_MAX: i64 = 100;

/// How many recent event descriptions an agent remembers, most-recent-first.
pub const MEMORY_CAP: usize = 12;

/// The mutable runtime state of one agent. Persisted as a single row in the
/// shared state store; the persona config supplies the initial values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub location: String,
    pub activity: String,
    pub mood: String,
    pub energy: i64,
    /// Signed affinity toward every other agent, -100..=100.
    pub relationships: HashMap<String, i64>,
    /// Bounded ring of recent event descriptions, most-recent-first.
    pub memory: Vec<String>,
}

impl AgentState {
    /// Build the first-boot state for a persona from its configured defaults.
    pub fn from_defaults(persona: &Persona) -> Self {
        Self {
            agent_id: persona.id.clone(),
            location: persona.default_location.clone(),
            activity: persona.default_activity.clone(),
            mood: persona.default_mood.clone(),
            energy: persona.default_energy,
            relationships: persona.baseline_relationships.clone(),
            memory: Vec::new(),
        }
    }

    /// Apply an energy delta, clamped to [0, 100].
    pub fn adjust_energy(&mut self, delta: i64) {
        self.energy = (self.energy + delta).clamp(ENERGY_MIN, ENERGY_MAX);
    }

    /// Apply a relationship delta toward another agent, clamped to [-100, 100].
    pub fn adjust_relationship(&mut self, other: &str, delta: i64) {
        let entry = self.relationships.entry(other.to_string()).or_insert(0);
        *entry = (*entry + delta).clamp(RELATIONSHIP_MIN, RELATIONSHIP_MAX);
    }

    /// Push an entry onto the memory ring, dropping the oldest past the cap.
    pub fn remember(&mut self, entry: impl Into<String>) {
        self.memory.insert(0, entry.into());
        self.memory.truncate(MEMORY_CAP);
    }
}

/// State mutations carried by a catalog entry. Absent fields leave the
/// corresponding state field untouched; `energy` is a signed delta, the
/// rest are replacements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectDelta {
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub energy: Option<i64>,
}

impl EffectDelta {
    /// Apply this delta to an agent's state, exactly once per trigger.
    pub fn apply(&self, state: &mut AgentState) {
        if let Some(ref mood) = self.mood {
            state.mood = mood.clone();
        }
        if let Some(ref activity) = self.activity {
            state.activity = activity.clone();
        }
        if let Some(ref location) = self.location {
            state.location = location.clone();
        }
        if let Some(delta) = self.energy {
            state.adjust_energy(delta);
        }
    }
}

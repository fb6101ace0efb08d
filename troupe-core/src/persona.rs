// ABOUTME: Persona and ensemble catalog configuration loaded from TOML files
// ABOUTME: Validates identities, state vocabularies, and event/storyline catalogs at startup

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::state::{EffectDelta, RELATIONSHIP_MAX, RELATIONSHIP_MIN};

/// One persona's identity and world vocabulary, loaded from
/// `personas/<id>.toml`. The enums the runtime state draws from (moods,
/// activities, locations) are persona-defined string sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub display_name: String,
    /// Names that count as a direct address in chat text, lowercase.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Relevance keywords, lowercase. Longer keywords score higher.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub moods: Vec<String>,
    /// The mood forced by exhaustion and favored late at night.
    pub low_energy_mood: String,
    pub activities: Vec<String>,
    /// Subset of `activities` during which energy recovers.
    pub resting_activities: Vec<String>,
    pub locations: Vec<String>,
    pub default_mood: String,
    pub default_activity: String,
    pub default_location: String,
    #[serde(default = "default_energy")]
    pub default_energy: i64,
    /// Baseline signed affinity toward other agents, -100..=100.
    #[serde(default)]
    pub baseline_relationships: HashMap<String, i64>,
    /// This persona's private life-event catalog.
    #[serde(default)]
    pub solo_events: Vec<SoloEvent>,
}

fn default_energy() -> i64 {
    70
}

/// A single-agent life event rolled each tick against its own persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoloEvent {
    pub id: String,
    /// Trigger probability per tick, 0..=1.
    pub probability: f64,
    /// How long the event stays active (suppressing re-rolls), in minutes.
    pub duration_mins: i64,
    /// Announcement text; absent means the event is internal-only.
    #[serde(default)]
    pub announce: Option<String>,
    #[serde(default)]
    pub effects: EffectDelta,
}

/// A multi-agent event rolled only by its first-listed participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossoverEvent {
    pub id: String,
    pub probability: f64,
    /// Participant agent ids; the first entry owns the roll.
    pub participants: Vec<String>,
    pub duration_mins: i64,
    /// Symmetric affinity shift between every participant pair.
    #[serde(default)]
    pub relationship_delta: Option<i64>,
    /// Per-participant announcement text, keyed by agent id.
    #[serde(default)]
    pub announcements: HashMap<String, String>,
    /// Per-participant effect deltas, keyed by agent id.
    #[serde(default)]
    pub effects: HashMap<String, EffectDelta>,
}

/// A rare, high-priority event that may broadcast to every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisEvent {
    pub id: String,
    pub probability: f64,
    pub participants: Vec<String>,
    pub duration_mins: i64,
    /// Text broadcast to the whole ensemble when the crisis fires.
    #[serde(default)]
    pub broadcast: Option<String>,
    #[serde(default)]
    pub relationship_delta: Option<i64>,
    #[serde(default)]
    pub effects: HashMap<String, EffectDelta>,
}

/// One phase of a storyline: per-participant text plus a time gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPhase {
    /// Minimum hours since the previous phase before this one may begin.
    #[serde(default)]
    pub min_hours_since_prev: i64,
    /// Per-participant announcement text, keyed by agent id.
    #[serde(default)]
    pub announcements: HashMap<String, String>,
}

/// An ordered, time-gated multi-day narrative shared by a fixed agent set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storyline {
    pub id: String,
    /// Participant agent ids; the first entry owns the advance roll.
    pub participants: Vec<String>,
    /// Per-tick probability of starting at phase 0.
    pub start_probability: f64,
    /// Per-tick probability of advancing once the time gate has passed.
    pub advance_probability: f64,
    pub phases: Vec<StoryPhase>,
}

/// Catalogs shared across the ensemble, loaded from `ensemble.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsembleCatalog {
    #[serde(default)]
    pub crossover_events: Vec<CrossoverEvent>,
    #[serde(default)]
    pub crisis_events: Vec<CrisisEvent>,
    #[serde(default)]
    pub storylines: Vec<Storyline>,
}

impl Persona {
    /// Load and validate a single persona file. Any malformed field is a
    /// startup failure, never a runtime one.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read persona file: {}", path.display()))?;
        let persona: Persona = toml::from_str(&content)
            .with_context(|| format!("Failed to parse persona file: {}", path.display()))?;
        persona.validate()?;
        Ok(persona)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("Persona id must not be empty");
        }
        if self.moods.is_empty() || self.activities.is_empty() || self.locations.is_empty() {
            bail!(
                "Persona '{}' must define at least one mood, activity, and location",
                self.id
            );
        }
        if !self.moods.contains(&self.default_mood) {
            bail!(
                "Persona '{}': default_mood '{}' is not in the mood set",
                self.id,
                self.default_mood
            );
        }
        if !self.moods.contains(&self.low_energy_mood) {
            bail!(
                "Persona '{}': low_energy_mood '{}' is not in the mood set",
                self.id,
                self.low_energy_mood
            );
        }
        if !self.activities.contains(&self.default_activity) {
            bail!(
                "Persona '{}': default_activity '{}' is not in the activity set",
                self.id,
                self.default_activity
            );
        }
        if self.resting_activities.is_empty() {
            bail!(
                "Persona '{}' must define at least one resting activity",
                self.id
            );
        }
        for rest in &self.resting_activities {
            if !self.activities.contains(rest) {
                bail!(
                    "Persona '{}': resting activity '{}' is not in the activity set",
                    self.id,
                    rest
                );
            }
        }
        if !self.locations.contains(&self.default_location) {
            bail!(
                "Persona '{}': default_location '{}' is not in the location set",
                self.id,
                self.default_location
            );
        }
        if !(0..=100).contains(&self.default_energy) {
            bail!(
                "Persona '{}': default_energy must be within 0..=100",
                self.id
            );
        }
        for (other, affinity) in &self.baseline_relationships {
            if !(RELATIONSHIP_MIN..=RELATIONSHIP_MAX).contains(affinity) {
                bail!(
                    "Persona '{}': baseline relationship toward '{}' out of range",
                    self.id,
                    other
                );
            }
        }
        for event in &self.solo_events {
            validate_probability(&event.probability, &format!("solo event '{}'", event.id))?;
            if event.duration_mins <= 0 {
                bail!("Solo event '{}' must have a positive duration", event.id);
            }
            validate_effects(&event.effects, self, &format!("Solo event '{}'", event.id))?;
        }
        Ok(())
    }

    /// True if the lowercase text names or mentions this persona. Matches
    /// whole words only, so "crash" does not address "ash".
    pub fn is_addressed_by(&self, text_lower: &str) -> bool {
        let id_lower = self.id.to_lowercase();
        let aliases: Vec<String> = self.aliases.iter().map(|a| a.to_lowercase()).collect();
        text_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .any(|word| word == id_lower || aliases.iter().any(|a| a == word))
    }
}

fn validate_probability(p: &f64, what: &str) -> Result<()> {
    if !(0.0..=1.0).contains(p) {
        bail!("{} probability must be within 0..=1, got {}", what, p);
    }
    Ok(())
}

/// Effect replacements must stay inside the target persona's declared
/// vocabulary, so a catalog typo fails at boot instead of drifting the
/// agent into an unknown mood/activity/location at runtime.
fn validate_effects(effects: &EffectDelta, persona: &Persona, what: &str) -> Result<()> {
    if let Some(ref mood) = effects.mood {
        if !persona.moods.contains(mood) {
            bail!(
                "{}: mood '{}' is not in persona '{}' mood set",
                what,
                mood,
                persona.id
            );
        }
    }
    if let Some(ref activity) = effects.activity {
        if !persona.activities.contains(activity) {
            bail!(
                "{}: activity '{}' is not in persona '{}' activity set",
                what,
                activity,
                persona.id
            );
        }
    }
    if let Some(ref location) = effects.location {
        if !persona.locations.contains(location) {
            bail!(
                "{}: location '{}' is not in persona '{}' location set",
                what,
                location,
                persona.id
            );
        }
    }
    Ok(())
}

/// All personas of the ensemble, keyed by agent id.
#[derive(Debug, Clone, Default)]
pub struct PersonaSet {
    personas: BTreeMap<String, Persona>,
}

impl PersonaSet {
    pub fn new(personas: Vec<Persona>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for persona in personas {
            let id = persona.id.clone();
            if map.insert(id.clone(), persona).is_some() {
                bail!("Duplicate persona id: {}", id);
            }
        }
        Ok(Self { personas: map })
    }

    /// Load every `*.toml` file in a directory as one persona.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut personas = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read persona directory: {}", dir.display()))?;
        for entry in entries {
            let path = entry.context("Failed to read persona directory entry")?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                personas.push(Persona::load(&path)?);
            }
        }
        if personas.is_empty() {
            bail!("No persona files found in {}", dir.display());
        }
        Self::new(personas)
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&Persona> {
        self.personas
            .get(id)
            .with_context(|| format!("Unknown persona id: {}", id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.values()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

impl EnsembleCatalog {
    /// Load and validate the shared catalog file. Participant ids are
    /// checked against the persona set so a typo fails at boot.
    pub fn load<P: AsRef<Path>>(path: P, personas: &PersonaSet) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ensemble catalog: {}", path.display()))?;
        let catalog: EnsembleCatalog = toml::from_str(&content)
            .with_context(|| format!("Failed to parse ensemble catalog: {}", path.display()))?;
        catalog.validate(personas)?;
        Ok(catalog)
    }

    pub fn validate(&self, personas: &PersonaSet) -> Result<()> {
        for event in &self.crossover_events {
            validate_probability(&event.probability, &format!("crossover '{}'", event.id))?;
            validate_participants(&event.participants, personas, &event.id)?;
            if event.duration_mins <= 0 {
                bail!("Crossover '{}' must have a positive duration", event.id);
            }
            validate_keyed_effects(
                &event.effects,
                &event.participants,
                personas,
                &format!("Crossover '{}'", event.id),
            )?;
        }
        for event in &self.crisis_events {
            validate_probability(&event.probability, &format!("crisis '{}'", event.id))?;
            validate_participants(&event.participants, personas, &event.id)?;
            if event.duration_mins <= 0 {
                bail!("Crisis '{}' must have a positive duration", event.id);
            }
            validate_keyed_effects(
                &event.effects,
                &event.participants,
                personas,
                &format!("Crisis '{}'", event.id),
            )?;
        }
        for storyline in &self.storylines {
            validate_probability(
                &storyline.start_probability,
                &format!("storyline '{}' start", storyline.id),
            )?;
            validate_probability(
                &storyline.advance_probability,
                &format!("storyline '{}' advance", storyline.id),
            )?;
            validate_participants(&storyline.participants, personas, &storyline.id)?;
            if storyline.phases.is_empty() {
                bail!("Storyline '{}' must have at least one phase", storyline.id);
            }
            for phase in &storyline.phases {
                if phase.min_hours_since_prev < 0 {
                    bail!(
                        "Storyline '{}' has a negative phase time gate",
                        storyline.id
                    );
                }
            }
        }
        Ok(())
    }
}

fn validate_keyed_effects(
    effects: &HashMap<String, EffectDelta>,
    participants: &[String],
    personas: &PersonaSet,
    what: &str,
) -> Result<()> {
    for (agent_id, delta) in effects {
        if !participants.contains(agent_id) {
            bail!("{} has effects for non-participant '{}'", what, agent_id);
        }
        let persona = personas.require(agent_id)?;
        validate_effects(delta, persona, what)?;
    }
    Ok(())
}

fn validate_participants(
    participants: &[String],
    personas: &PersonaSet,
    entry_id: &str,
) -> Result<()> {
    if participants.is_empty() {
        bail!("Catalog entry '{}' has no participants", entry_id);
    }
    for participant in participants {
        if personas.get(participant).is_none() {
            bail!(
                "Catalog entry '{}' names unknown participant '{}'",
                entry_id,
                participant
            );
        }
    }
    Ok(())
}

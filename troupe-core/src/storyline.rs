// ABOUTME: Multi-day storyline progression: time-gated, probabilistic phase advancement
// ABOUTME: Phase index only increases; completion is terminal; advances are guarded writes

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;

use crate::events::Announcement;
use crate::persona::{EnsembleCatalog, PersonaSet, Storyline};
use crate::store::StateStore;

/// Advances the storylines this agent owns the roll for. Beginning a
/// storyline is a conditional insert and advancing is a phase-guarded
/// update, so duplicate tick hosts can never double-advance.
pub struct StorylineEngine {
    store: StateStore,
    personas: Arc<PersonaSet>,
    catalog: Arc<EnsembleCatalog>,
    agent_id: String,
}

impl StorylineEngine {
    pub fn new(
        store: StateStore,
        personas: Arc<PersonaSet>,
        catalog: Arc<EnsembleCatalog>,
        agent_id: impl Into<String>,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        personas.require(&agent_id)?;
        Ok(Self {
            store,
            personas,
            catalog,
            agent_id,
        })
    }

    pub fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Announcement>> {
        let mut announcements = Vec::new();
        for storyline in &self.catalog.storylines {
            // The first-listed participant owns the roll, mirroring
            // crossover event ownership.
            if storyline.participants.first().map(String::as_str)
                != Some(self.agent_id.as_str())
            {
                continue;
            }
            self.tick_storyline(storyline, now, &mut announcements)?;
        }
        Ok(announcements)
    }

    fn tick_storyline(
        &self,
        storyline: &Storyline,
        now: DateTime<Utc>,
        announcements: &mut Vec<Announcement>,
    ) -> Result<()> {
        match self.store.storyline(&storyline.id)? {
            None => {
                if rand::thread_rng().gen::<f64>() >= storyline.start_probability {
                    return Ok(());
                }
                let completed = storyline.phases.len() == 1;
                if !self.store.begin_storyline(&storyline.id, completed, now)? {
                    // Another process started it first.
                    return Ok(());
                }
                tracing::info!(storyline_id = %storyline.id, "Storyline started at phase 0");
                self.announce_phase(storyline, 0, announcements)?;
            }
            Some(progress) => {
                if progress.completed {
                    return Ok(());
                }
                let next = progress.phase + 1;
                let Some(phase) = storyline.phases.get(next as usize) else {
                    // Stored phase is already at the catalog's end; treat
                    // as terminal even if the completed flag was lost.
                    return Ok(());
                };
                let gate = Duration::hours(phase.min_hours_since_prev);
                if now - progress.advanced_at < gate {
                    return Ok(());
                }
                if rand::thread_rng().gen::<f64>() >= storyline.advance_probability {
                    return Ok(());
                }
                let completed = next as usize == storyline.phases.len() - 1;
                if !self
                    .store
                    .advance_storyline(&storyline.id, progress.phase, completed, now)?
                {
                    // Lost the guarded update to a sibling process.
                    return Ok(());
                }
                tracing::info!(
                    storyline_id = %storyline.id,
                    phase = next,
                    completed,
                    "Storyline advanced"
                );
                self.announce_phase(storyline, next as usize, announcements)?;
            }
        }
        Ok(())
    }

    /// Emit the phase's per-participant text and record it in each
    /// participant's memory ring.
    fn announce_phase(
        &self,
        storyline: &Storyline,
        phase_index: usize,
        announcements: &mut Vec<Announcement>,
    ) -> Result<()> {
        let Some(phase) = storyline.phases.get(phase_index) else {
            return Ok(());
        };
        for participant in &storyline.participants {
            let Some(text) = phase.announcements.get(participant) else {
                continue;
            };
            let persona = self.personas.require(participant)?;
            let mut state = self.store.load_or_init_agent(persona)?;
            state.remember(text.clone());
            self.store.save_agent(&state)?;
            announcements.push(Announcement {
                agent_id: participant.clone(),
                text: text.clone(),
                broadcast: false,
            });
        }
        Ok(())
    }
}

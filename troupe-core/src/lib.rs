// ABOUTME: Arbitration engine and world-simulation scheduler for the troupe ensemble
// ABOUTME: Shared state store, relevance scoring, event catalogs, and storyline progression

pub mod arbitrator;
pub mod events;
pub mod persona;
pub mod scorer;
pub mod state;
pub mod store;
pub mod storyline;

pub use arbitrator::{
    ArbitrationConfig, Arbitrator, ChannelClass, Decision, ResponseLength, ResponseStyle, Stimulus,
};
pub use events::{Announcement, DriftConfig, EventScheduler};
pub use persona::{EnsembleCatalog, Persona, PersonaSet};
pub use state::{AgentState, EffectDelta};
pub use store::{EventInstance, EventKind, StateStore, StorylineProgress, GLOBAL_SCOPE};
pub use storyline::StorylineEngine;

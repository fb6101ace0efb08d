// ABOUTME: Tests for storyline progression - time gates, roll ownership, terminal completion
// ABOUTME: Start/advance probabilities are pinned to 0.0/1.0 for determinism

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use troupe_core::persona::{Persona, PersonaSet, StoryPhase, Storyline};
use troupe_core::{EnsembleCatalog, StateStore, StorylineEngine};

fn test_persona(id: &str) -> Persona {
    Persona {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        aliases: vec![],
        keywords: vec![],
        moods: vec!["content".to_string(), "tired".to_string()],
        low_energy_mood: "tired".to_string(),
        activities: vec!["working".to_string(), "napping".to_string()],
        resting_activities: vec!["napping".to_string()],
        locations: vec!["home".to_string()],
        default_mood: "content".to_string(),
        default_activity: "working".to_string(),
        default_location: "home".to_string(),
        default_energy: 70,
        baseline_relationships: HashMap::new(),
        solo_events: vec![],
    }
}

fn duo_personas() -> Arc<PersonaSet> {
    Arc::new(
        PersonaSet::new(vec![test_persona("ash"), test_persona("briar")]).expect("personas"),
    )
}

fn phase(min_hours: i64, texts: &[(&str, &str)]) -> StoryPhase {
    StoryPhase {
        min_hours_since_prev: min_hours,
        announcements: texts
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect(),
    }
}

/// Two-phase storyline owned by ash with a 48 hour gate before phase 1.
fn band_storyline() -> Storyline {
    Storyline {
        id: "start-a-band".to_string(),
        participants: vec!["ash".to_string(), "briar".to_string()],
        start_probability: 1.0,
        advance_probability: 1.0,
        phases: vec![
            phase(
                0,
                &[
                    ("ash", "posted a flyer looking for a bandmate"),
                    ("briar", "answered a flyer about starting a band"),
                ],
            ),
            phase(48, &[("ash", "first rehearsal with briar went great")]),
        ],
    }
}

fn catalog(storylines: Vec<Storyline>) -> EnsembleCatalog {
    EnsembleCatalog {
        storylines,
        ..Default::default()
    }
}

fn engine(store: &StateStore, storylines: Vec<Storyline>, agent_id: &str) -> StorylineEngine {
    StorylineEngine::new(
        store.clone(),
        duo_personas(),
        Arc::new(catalog(storylines)),
        agent_id,
    )
    .expect("engine")
}

#[test]
fn time_gate_blocks_early_advance() {
    let store = StateStore::in_memory().expect("store");
    let ash = engine(&store, vec![band_storyline()], "ash");
    let t0 = Utc::now();

    // First tick begins the storyline at phase 0.
    let announcements = ash.tick(t0).expect("tick");
    assert_eq!(announcements.len(), 2);
    let progress = store.storyline("start-a-band").expect("q").expect("row");
    assert_eq!(progress.phase, 0);
    assert!(!progress.completed);

    // One hour later: the 48 hour gate holds even with probability 1.
    let announcements = ash.tick(t0 + Duration::hours(1)).expect("tick");
    assert!(announcements.is_empty());
    assert_eq!(
        store.storyline("start-a-band").expect("q").expect("row").phase,
        0
    );

    // 49 hours later the gate has passed and phase 1 lands.
    let announcements = ash.tick(t0 + Duration::hours(49)).expect("tick");
    assert_eq!(announcements.len(), 1);
    assert_eq!(
        announcements[0].text,
        "first rehearsal with briar went great"
    );
    let progress = store.storyline("start-a-band").expect("q").expect("row");
    assert_eq!(progress.phase, 1);
    assert!(progress.completed);
}

#[test]
fn completed_storyline_never_reannounces() {
    let store = StateStore::in_memory().expect("store");
    let ash = engine(&store, vec![band_storyline()], "ash");
    let t0 = Utc::now();

    ash.tick(t0).expect("tick");
    ash.tick(t0 + Duration::hours(49)).expect("tick");

    // Further ticks do nothing; the phase never moves past the catalog.
    for extra in [50, 200, 2000] {
        let announcements = ash.tick(t0 + Duration::hours(extra)).expect("tick");
        assert!(announcements.is_empty());
    }
    let progress = store.storyline("start-a-band").expect("q").expect("row");
    assert_eq!(progress.phase, 1);
    assert!(progress.completed);
}

#[test]
fn single_phase_storyline_completes_at_start() {
    let store = StateStore::in_memory().expect("store");
    let storyline = Storyline {
        id: "one-shot".to_string(),
        participants: vec!["ash".to_string()],
        start_probability: 1.0,
        advance_probability: 1.0,
        phases: vec![phase(0, &[("ash", "found an old photo album")])],
    };
    let ash = engine(&store, vec![storyline], "ash");
    let t0 = Utc::now();

    let announcements = ash.tick(t0).expect("tick");
    assert_eq!(announcements.len(), 1);

    let progress = store.storyline("one-shot").expect("q").expect("row");
    assert_eq!(progress.phase, 0);
    assert!(progress.completed);

    assert!(ash.tick(t0 + Duration::hours(1)).expect("tick").is_empty());
}

#[test]
fn only_the_first_listed_participant_rolls() {
    let store = StateStore::in_memory().expect("store");
    let briar = engine(&store, vec![band_storyline()], "briar");

    // Briar is a participant but does not own the roll.
    assert!(briar.tick(Utc::now()).expect("tick").is_empty());
    assert!(store.storyline("start-a-band").expect("q").is_none());
}

#[test]
fn zero_start_probability_never_begins() {
    let store = StateStore::in_memory().expect("store");
    let mut storyline = band_storyline();
    storyline.start_probability = 0.0;
    let ash = engine(&store, vec![storyline], "ash");

    for _ in 0..5 {
        assert!(ash.tick(Utc::now()).expect("tick").is_empty());
    }
    assert!(store.storyline("start-a-band").expect("q").is_none());
}

#[test]
fn phase_announcements_land_in_participant_memory() {
    let store = StateStore::in_memory().expect("store");
    let ash = engine(&store, vec![band_storyline()], "ash");

    ash.tick(Utc::now()).expect("tick");

    let ash_state = store.load_agent("ash").expect("q").expect("row");
    let briar_state = store.load_agent("briar").expect("q").expect("row");
    assert_eq!(ash_state.memory[0], "posted a flyer looking for a bandmate");
    assert_eq!(
        briar_state.memory[0],
        "answered a flyer about starting a band"
    );
}

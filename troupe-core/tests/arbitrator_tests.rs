// ABOUTME: Tests for the arbitration pipeline - channel classes, cooldown gates, selection
// ABOUTME: Probability knobs are pinned to 0.0/1.0 so every path is deterministic

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use troupe_core::persona::{Persona, PersonaSet};
use troupe_core::{ArbitrationConfig, Arbitrator, ChannelClass, StateStore, Stimulus};

fn test_persona(id: &str, keywords: &[&str]) -> Persona {
    Persona {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        aliases: vec![],
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
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

fn test_personas() -> Arc<PersonaSet> {
    Arc::new(
        PersonaSet::new(vec![
            test_persona("ash", &["astronomy", "telescope"]),
            test_persona("briar", &["synthesizer", "music"]),
        ])
        .expect("personas"),
    )
}

/// Config where every roll passes and nothing is damped.
fn always_config() -> ArbitrationConfig {
    ArbitrationConfig {
        relevance_threshold: 3,
        base_probability: 1.0,
        relevance_boost: 0.0,
        direct_address_probability: 1.0,
        question_boost: 0.0,
        long_message_boost: 0.0,
        long_message_chars: 80,
        chattiness_window_mins: 10,
        chattiness_damping: 1.0,
        global_cooldown_secs: 90,
        personal_cooldown_secs: 300,
    }
}

fn shared_stimulus(text: &str) -> Stimulus {
    stimulus(text, ChannelClass::Shared)
}

fn stimulus(text: &str, channel_class: ChannelClass) -> Stimulus {
    Stimulus {
        id: uuid::Uuid::new_v4().to_string(),
        author_id: "user-1".to_string(),
        channel_id: "#general".to_string(),
        channel_class,
        text: text.to_string(),
        timestamp: Utc::now(),
    }
}

fn arbitrator(store: &StateStore, cfg: ArbitrationConfig, agent_id: &str) -> Arbitrator {
    Arbitrator::new(store.clone(), test_personas(), cfg, agent_id).expect("arbitrator")
}

// =============================================================================
// Channel class routing
// =============================================================================

#[test]
fn silent_channels_never_respond() {
    let store = StateStore::in_memory().expect("store");
    let arb = arbitrator(&store, always_config(), "ash");
    let stim = stimulus("hello everyone", ChannelClass::Silent);
    assert!(arb.decide(&stim, Utc::now()).expect("decide").is_none());
}

#[test]
fn exclusive_channel_routes_only_to_its_owner() {
    let store = StateStore::in_memory().expect("store");
    let exclusive = ChannelClass::Exclusive {
        agent_id: "briar".to_string(),
    };

    let ash = arbitrator(&store, always_config(), "ash");
    assert!(ash
        .decide(&stimulus("hi", exclusive.clone()), Utc::now())
        .expect("decide")
        .is_none());

    let briar = arbitrator(&store, always_config(), "briar");
    let decision = briar
        .decide(&stimulus("hi", exclusive), Utc::now())
        .expect("decide")
        .expect("briar responds");
    assert_eq!(decision.agent_id, "briar");
}

#[test]
fn exclusive_channel_bypasses_the_probability_roll() {
    let store = StateStore::in_memory().expect("store");
    // Every roll fails: organic and direct-address responses are
    // impossible, so only the exclusive routing can answer.
    let cfg = ArbitrationConfig {
        base_probability: 0.0,
        direct_address_probability: 0.0,
        ..always_config()
    };
    let briar = arbitrator(&store, cfg, "briar");
    let exclusive = ChannelClass::Exclusive {
        agent_id: "briar".to_string(),
    };

    let decision = briar
        .decide(&stimulus("hi", exclusive), Utc::now())
        .expect("decide")
        .expect("owner responds without any roll");
    assert_eq!(decision.agent_id, "briar");
}

#[test]
fn exclusive_channel_bypasses_global_cooldown_but_not_personal() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    let briar = arbitrator(&store, always_config(), "briar");
    let exclusive = ChannelClass::Exclusive {
        agent_id: "briar".to_string(),
    };

    // Ash just fired: global cooldown is hot, Briar's personal is not.
    store
        .record_firing("ash", now - Duration::seconds(5))
        .expect("record");
    assert!(briar
        .decide(&stimulus("hi", exclusive.clone()), now)
        .expect("decide")
        .is_some());

    // Briar itself just fired: personal cooldown is never bypassed.
    store
        .record_firing("briar", now - Duration::seconds(5))
        .expect("record");
    assert!(briar
        .decide(&stimulus("hi", exclusive), now)
        .expect("decide")
        .is_none());
}

// =============================================================================
// Direct address
// =============================================================================

#[test]
fn direct_address_routes_to_the_named_agent() {
    let store = StateStore::in_memory().expect("store");
    let ash = arbitrator(&store, always_config(), "ash");
    let briar = arbitrator(&store, always_config(), "briar");
    let stim = shared_stimulus("hey briar, how was your day?");
    let now = Utc::now();

    assert!(ash.decide(&stim, now).expect("decide").is_none());
    let decision = briar
        .decide(&stim, now)
        .expect("decide")
        .expect("briar responds");
    assert!(decision.direct_address);
    assert_eq!(decision.style.tone, "content");
}

#[test]
fn direct_address_matches_whole_words_only() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    // Global cooldown hot so only the direct-address path could answer.
    store
        .record_firing("briar", now - Duration::seconds(5))
        .expect("record");

    let ash = arbitrator(&store, always_config(), "ash");
    // "crashing" contains "ash" but does not address Ash.
    assert!(ash
        .decide(&shared_stimulus("the server keeps crashing"), now)
        .expect("decide")
        .is_none());
}

#[test]
fn direct_address_bypasses_global_cooldown_but_not_personal() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    let briar = arbitrator(&store, always_config(), "briar");
    let stim = shared_stimulus("briar are you around?");

    store
        .record_firing("ash", now - Duration::seconds(5))
        .expect("record");
    assert!(briar.decide(&stim, now).expect("decide").is_some());

    store
        .record_firing("briar", now - Duration::seconds(5))
        .expect("record");
    assert!(briar.decide(&stim, now).expect("decide").is_none());
}

#[test]
fn direct_address_roll_can_decline() {
    let store = StateStore::in_memory().expect("store");
    let cfg = ArbitrationConfig {
        direct_address_probability: 0.0,
        ..always_config()
    };
    let briar = arbitrator(&store, cfg, "briar");
    assert!(briar
        .decide(&shared_stimulus("briar?"), Utc::now())
        .expect("decide")
        .is_none());
}

// =============================================================================
// Cooldown gates and organic selection
// =============================================================================

#[test]
fn global_cooldown_blocks_organic_responses() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    // A lone persona keeps the energy share at 1.0 so the organic roll
    // is decided by the cooldown gate alone.
    let solo = Arc::new(PersonaSet::new(vec![test_persona("ash", &[])]).expect("personas"));
    let ash = Arbitrator::new(store.clone(), solo, always_config(), "ash").expect("arbitrator");

    assert!(ash
        .decide(&shared_stimulus("what a day"), now)
        .expect("decide")
        .is_some());

    store
        .record_firing("briar", now - Duration::seconds(5))
        .expect("record");
    assert!(ash
        .decide(&shared_stimulus("what a day"), now)
        .expect("decide")
        .is_none());

    // The window elapses and organic responses resume.
    let later = now + Duration::seconds(120);
    assert!(ash
        .decide(&shared_stimulus("what a day"), later)
        .expect("decide")
        .is_some());
}

#[test]
fn relevance_winner_takes_the_stimulus() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    // Zero base probability: only a relevance win can produce a response.
    let cfg = ArbitrationConfig {
        base_probability: 0.0,
        relevance_boost: 1.0,
        ..always_config()
    };

    let ash = arbitrator(&store, cfg.clone(), "ash");
    let briar = arbitrator(&store, cfg, "briar");
    let stim = shared_stimulus("anyone selling a synthesizer?");

    assert!(ash.decide(&stim, now).expect("decide").is_none());
    let decision = briar
        .decide(&stim, now)
        .expect("decide")
        .expect("briar wins on relevance");
    assert_eq!(decision.agent_id, "briar");
    assert!(!decision.direct_address);
}

#[test]
fn tied_relevance_means_no_winner() {
    let store = StateStore::in_memory().expect("store");
    let cfg = ArbitrationConfig {
        base_probability: 0.0,
        relevance_boost: 1.0,
        ..always_config()
    };
    let ash = arbitrator(&store, cfg, "ash");
    // "telescope" and "synthesizer" both score 3: tie, no clear winner,
    // and with zero base probability nobody responds.
    let stim = shared_stimulus("trading a telescope for a synthesizer");
    assert!(ash.decide(&stim, Utc::now()).expect("decide").is_none());
}

#[test]
fn organic_pick_skips_agents_on_personal_cooldown() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    // Short global window so only Briar's personal cooldown is in play.
    let cfg = ArbitrationConfig {
        global_cooldown_secs: 1,
        ..always_config()
    };

    store
        .record_firing("briar", now - Duration::seconds(30))
        .expect("record");

    // Briar is blocked by its own cooldown even with probability 1.
    let briar = arbitrator(&store, cfg.clone(), "briar");
    assert!(briar
        .decide(&shared_stimulus("quiet afternoon"), now)
        .expect("decide")
        .is_none());

    // Ash is the only eligible agent: full energy share, certain pick.
    let ash = arbitrator(&store, cfg, "ash");
    assert!(ash
        .decide(&shared_stimulus("quiet afternoon"), now)
        .expect("decide")
        .is_some());
}

#[test]
fn chattiness_damping_silences_a_busy_ensemble() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    let cfg = ArbitrationConfig {
        global_cooldown_secs: 1,
        chattiness_damping: 0.0,
        ..always_config()
    };
    // One recent firing inside the window zeroes the probability.
    store
        .record_firing("briar", now - Duration::minutes(5))
        .expect("record");

    let ash = arbitrator(&store, cfg, "ash");
    assert!(ash
        .decide(&shared_stimulus("so anyway"), now)
        .expect("decide")
        .is_none());
}

// =============================================================================
// Claim-then-act
// =============================================================================

#[test]
fn only_one_arbitrator_wins_the_stimulus_claim() {
    let store = StateStore::in_memory().expect("store");
    let now = Utc::now();
    let ash = arbitrator(&store, always_config(), "ash");
    let briar = arbitrator(&store, always_config(), "briar");
    let stim = shared_stimulus("hello");

    let first = ash.claim_stimulus(&stim, now).expect("claim");
    let second = briar.claim_stimulus(&stim, now).expect("claim");
    assert!(first);
    assert!(!second);
}

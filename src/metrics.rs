// ABOUTME: Metric recording helpers for the agent runtime
// ABOUTME: Thin wrappers over the metrics facade so call sites stay one-liners

use metrics::{counter, describe_counter};

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    describe_counter!("troupe_stimuli_total", "Inbound stimuli seen by this process");
    describe_counter!("troupe_claims_won_total", "Arbitration claims won");
    describe_counter!(
        "troupe_claims_lost_total",
        "Arbitration races lost to a sibling process"
    );
    describe_counter!("troupe_responses_sent_total", "Responses delivered to the platform");
    describe_counter!(
        "troupe_responses_dropped_total",
        "Responses dropped after generation or send failure"
    );
    describe_counter!("troupe_ticks_total", "World-simulation ticks processed");
    describe_counter!(
        "troupe_announcements_total",
        "Event and storyline announcements emitted"
    );
}

pub fn record_stimulus_seen() {
    counter!("troupe_stimuli_total").increment(1);
}

pub fn record_claim_won() {
    counter!("troupe_claims_won_total").increment(1);
}

pub fn record_claim_lost() {
    counter!("troupe_claims_lost_total").increment(1);
}

pub fn record_response_sent() {
    counter!("troupe_responses_sent_total").increment(1);
}

pub fn record_response_dropped() {
    counter!("troupe_responses_dropped_total").increment(1);
}

pub fn record_tick() {
    counter!("troupe_ticks_total").increment(1);
}

pub fn record_announcement() {
    counter!("troupe_announcements_total").increment(1);
}

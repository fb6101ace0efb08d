// ABOUTME: Agent runtime host for the troupe ensemble
// ABOUTME: Config, platform/generation seams, metrics, and the per-agent event loop

pub mod config;
pub mod generate;
pub mod metrics;
pub mod platform;
pub mod runtime;

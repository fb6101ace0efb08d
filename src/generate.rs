// ABOUTME: Text-generation seam: persona + state + style in, response text out
// ABOUTME: The template generator is a deterministic stand-in for a real generation service

use anyhow::Result;
use async_trait::async_trait;

use troupe_core::{AgentState, Persona, ResponseStyle};

/// Everything a generation backend gets to work with: the persona
/// profile, the agent's current state and recent memory, the decided
/// delivery style, and the stimulus text (absent for tick-driven
/// announcements).
pub struct GenerationContext<'a> {
    pub persona: &'a Persona,
    pub state: &'a AgentState,
    pub style: &'a ResponseStyle,
    pub stimulus_text: Option<&'a str>,
}

/// Opaque call into the text-generation collaborator. Failures are
/// non-fatal: the runtime logs, keeps the consumed cooldown, and sends
/// nothing.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, ctx: GenerationContext<'_>) -> Result<String>;
}

/// Deterministic stand-in generator. Real deployments swap in an LLM
/// backend behind the same trait.
pub struct TemplateGenerator;

#[async_trait]
impl ResponseGenerator for TemplateGenerator {
    async fn generate(&self, ctx: GenerationContext<'_>) -> Result<String> {
        let recent = ctx
            .state
            .memory
            .first()
            .map(|m| format!(" (still thinking about: {})", m))
            .unwrap_or_default();
        Ok(format!(
            "[{} | {} | {} @ {}]{} re: {}",
            ctx.persona.display_name,
            ctx.style.tone,
            ctx.style.length,
            ctx.state.location,
            recent,
            ctx.stimulus_text.unwrap_or("(tick)"),
        ))
    }
}

/// Generator that always fails; used to exercise the claim-consumed,
/// nothing-sent error path.
pub struct FailingGenerator;

#[async_trait]
impl ResponseGenerator for FailingGenerator {
    async fn generate(&self, _ctx: GenerationContext<'_>) -> Result<String> {
        anyhow::bail!("generation backend unavailable")
    }
}

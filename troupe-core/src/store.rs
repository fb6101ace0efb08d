// ABOUTME: Shared SQLite state store for all agent processes in the ensemble
// ABOUTME: Agents, claims, cooldowns, firings, event instances, and storyline progress

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::persona::Persona;
use crate::state::AgentState;

/// Cooldown scope key for the ensemble-wide window.
pub const GLOBAL_SCOPE: &str = "global";

/// Cooldown scope key for one agent's personal window.
pub fn agent_scope(agent_id: &str) -> String {
    format!("agent:{}", agent_id)
}

/// Claim key for a stimulus. Duplicate platform delivery of the same
/// stimulus id deduplicates through this key.
pub fn stimulus_claim_key(stimulus_id: &str) -> String {
    format!("stim:{}", stimulus_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Solo,
    Crossover,
    Crisis,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Solo => write!(f, "solo"),
            EventKind::Crossover => write!(f, "crossover"),
            EventKind::Crisis => write!(f, "crisis"),
        }
    }
}

/// A triggered catalog event with its activity window. While a row for a
/// (catalog id, participant set) pair is active, the same entry cannot
/// fire again for those participants.
#[derive(Debug, Clone)]
pub struct EventInstance {
    pub id: String,
    pub catalog_id: String,
    /// Canonical participant key: sorted agent ids joined with `,`.
    pub participants: String,
    pub kind: EventKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Canonical participant key for the events table.
pub fn participants_key(participants: &[String]) -> String {
    let mut sorted: Vec<&str> = participants.iter().map(|p| p.as_str()).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Persistent progress of one storyline.
#[derive(Debug, Clone)]
pub struct StorylineProgress {
    pub storyline_id: String,
    /// Current phase index; monotonic, non-decreasing.
    pub phase: i64,
    pub advanced_at: DateTime<Utc>,
    pub completed: bool,
}

/// The single source of truth shared by every agent process. Row-level
/// atomicity of the underlying SQLite database is the only serialization
/// primitive; the `claims` conditional insert is the exclusivity gate.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Mutex<Connection>>,
}

impl StateStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Result<Self> {
        let store = Self { db };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open (or create) the shared store at a filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create store directory")?;
            }
        }
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        // Multiple processes share this file; let writers wait briefly
        // instead of failing on a held lock.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        Self::new(Arc::new(Mutex::new(conn)))
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::new(Arc::new(Mutex::new(conn)))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                location TEXT NOT NULL,
                activity TEXT NOT NULL,
                mood TEXT NOT NULL,
                energy INTEGER NOT NULL,
                relationships TEXT NOT NULL,
                memory TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS claims (
                claim_key TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                claimed_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cooldowns (
                scope_key TEXT PRIMARY KEY,
                last_fired_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS firings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                fired_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_firings_fired_at ON firings(fired_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                catalog_id TEXT NOT NULL,
                participants TEXT NOT NULL,
                kind TEXT NOT NULL,
                starts_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        // At most one active instance per (catalog id, participant set).
        // The conditional insert against this index is what makes event
        // triggering idempotent across processes.
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_active
             ON events(catalog_id, participants)
             WHERE completed = 0",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS storylines (
                storyline_id TEXT PRIMARY KEY,
                phase INTEGER NOT NULL,
                advanced_at TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        Ok(())
    }

    // =========================================================================
    // Agent state
    // =========================================================================

    pub fn load_agent(&self, agent_id: &str) -> Result<Option<AgentState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT agent_id, location, activity, mood, energy, relationships, memory
             FROM agents WHERE agent_id = ?1",
        )?;
        let row = stmt
            .query_row([agent_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .optional()?;

        match row {
            Some((agent_id, location, activity, mood, energy, relationships, memory)) => {
                Ok(Some(AgentState {
                    agent_id,
                    location,
                    activity,
                    mood,
                    energy,
                    relationships: serde_json::from_str(&relationships)
                        .context("Corrupt relationships column")?,
                    memory: serde_json::from_str(&memory).context("Corrupt memory column")?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Fetch an agent's state, seeding it from persona defaults on first boot.
    pub fn load_or_init_agent(&self, persona: &Persona) -> Result<AgentState> {
        if let Some(state) = self.load_agent(&persona.id)? {
            return Ok(state);
        }
        let state = AgentState::from_defaults(persona);
        self.save_agent(&state)?;
        tracing::info!(agent_id = %persona.id, "Seeded agent state from persona defaults");
        Ok(state)
    }

    pub fn save_agent(&self, state: &AgentState) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agents (agent_id, location, activity, mood, energy, relationships, memory, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(agent_id) DO UPDATE SET
                location = excluded.location,
                activity = excluded.activity,
                mood = excluded.mood,
                energy = excluded.energy,
                relationships = excluded.relationships,
                memory = excluded.memory,
                updated_at = excluded.updated_at",
            params![
                state.agent_id,
                state.location,
                state.activity,
                state.mood,
                state.energy,
                serde_json::to_string(&state.relationships)?,
                serde_json::to_string(&state.memory)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Operator reset: restore persona defaults, keeping the row.
    pub fn reset_agent(&self, persona: &Persona) -> Result<()> {
        let state = AgentState::from_defaults(persona);
        self.save_agent(&state)?;
        tracing::info!(agent_id = %persona.id, "Agent state reset to persona defaults");
        Ok(())
    }

    // =========================================================================
    // Claims
    // =========================================================================

    /// Atomic conditional insert: at most one claim may ever exist per key.
    /// Returns true only for the single caller that won the row. Every
    /// other caller (including a later duplicate delivery) gets false.
    pub fn try_claim(&self, claim_key: &str, agent_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO claims (claim_key, agent_id, claimed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(claim_key) DO NOTHING",
            params![claim_key, agent_id, now.to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    /// Which agent holds a claim, if any. Bookkeeping only; deciders rely
    /// on `try_claim`'s return value, never on a read-then-write.
    pub fn claim_holder(&self, claim_key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let holder = conn
            .query_row(
                "SELECT agent_id FROM claims WHERE claim_key = ?1",
                [claim_key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(holder)
    }

    // =========================================================================
    // Cooldowns and firings
    // =========================================================================

    pub fn last_fired(&self, scope_key: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT last_fired_at FROM cooldowns WHERE scope_key = ?1",
                [scope_key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match raw {
            Some(ts) => {
                let parsed = DateTime::parse_from_rfc3339(&ts)
                    .context("Corrupt cooldown timestamp")?
                    .with_timezone(&Utc);
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Record a firing: bumps the agent's personal cooldown, the
    /// ensemble-wide cooldown, and appends a firings row for the
    /// chattiness window.
    pub fn record_firing(&self, agent_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let ts = now.to_rfc3339();
        for scope in [agent_scope(agent_id), GLOBAL_SCOPE.to_string()] {
            conn.execute(
                "INSERT INTO cooldowns (scope_key, last_fired_at) VALUES (?1, ?2)
                 ON CONFLICT(scope_key) DO UPDATE SET last_fired_at = excluded.last_fired_at",
                params![scope, ts],
            )?;
        }
        conn.execute(
            "INSERT INTO firings (agent_id, fired_at) VALUES (?1, ?2)",
            params![agent_id, ts],
        )?;
        Ok(())
    }

    /// How many ensemble responses fired since the given instant. Used to
    /// damp organic response probability when the agents have been chatty.
    pub fn count_recent_firings(&self, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM firings WHERE fired_at >= ?1",
            [since.to_rfc3339()],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count)
    }

    // =========================================================================
    // Scheduled events
    // =========================================================================

    /// Conditionally insert a new active event instance. Returns false if
    /// an active instance for the same (catalog id, participant set)
    /// already exists, in which case no effects may be applied.
    pub fn insert_event(&self, event: &EventInstance) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO events (id, catalog_id, participants, kind, starts_at, ends_at, completed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                event.id,
                event.catalog_id,
                event.participants,
                event.kind.to_string(),
                event.starts_at.to_rfc3339(),
                event.ends_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn active_event_exists(
        &self,
        catalog_id: &str,
        participants: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events
             WHERE catalog_id = ?1 AND participants = ?2 AND completed = 0 AND ends_at > ?3",
            params![catalog_id, participants, now.to_rfc3339()],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count > 0)
    }

    /// Lazy expiry: mark every event whose end time has passed as
    /// completed. Runs at the start of each tick, before new rolls.
    pub fn sweep_expired_events(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let swept = conn.execute(
            "UPDATE events SET completed = 1 WHERE completed = 0 AND ends_at <= ?1",
            [now.to_rfc3339()],
        )?;
        Ok(swept)
    }

    // =========================================================================
    // Storylines
    // =========================================================================

    pub fn storyline(&self, storyline_id: &str) -> Result<Option<StorylineProgress>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT storyline_id, phase, advanced_at, completed
                 FROM storylines WHERE storyline_id = ?1",
                [storyline_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((storyline_id, phase, advanced_at, completed)) => Ok(Some(StorylineProgress {
                storyline_id,
                phase,
                advanced_at: DateTime::parse_from_rfc3339(&advanced_at)
                    .context("Corrupt storyline timestamp")?
                    .with_timezone(&Utc),
                completed: completed != 0,
            })),
            None => Ok(None),
        }
    }

    /// Conditionally start a storyline at phase 0. Returns false if some
    /// process already started it.
    pub fn begin_storyline(
        &self,
        storyline_id: &str,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO storylines (storyline_id, phase, advanced_at, completed)
             VALUES (?1, 0, ?2, ?3)",
            params![storyline_id, now.to_rfc3339(), completed as i64],
        )?;
        Ok(inserted == 1)
    }

    /// Guarded phase advance: succeeds only if the stored phase still
    /// equals `expected_phase` and the storyline is not completed, so the
    /// phase index can only ever increase and duplicate tick hosts cannot
    /// double-advance.
    pub fn advance_storyline(
        &self,
        storyline_id: &str,
        expected_phase: i64,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE storylines
             SET phase = phase + 1, advanced_at = ?1, completed = ?2
             WHERE storyline_id = ?3 AND phase = ?4 AND completed = 0",
            params![
                now.to_rfc3339(),
                completed as i64,
                storyline_id,
                expected_phase
            ],
        )?;
        Ok(updated == 1)
    }
}

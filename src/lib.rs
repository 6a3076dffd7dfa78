use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp, ScheduleAt,
    table, reducer, SpacetimeType, rand::Rng,
    client_visibility_filter, Filter,
};
use serde_json::Value;

// Letter-grid logic (traceability, substitution codec)
pub mod board;

// Puzzle ingestion from the board-generation worker
mod ingest;

// ==================== CONSTANTS ====================

/// Maximum players per multiplayer game
const MAX_PLAYERS_PER_GAME: usize = 6;

/// Duration of 3-2-1-GO countdown before a multiplayer game starts (seconds)
const COUNTDOWN_DURATION_SECS: u64 = 4;

/// Round length when a challenge or solo start does not specify one
const DEFAULT_TIME_LIMIT_SECS: u32 = 180;

/// Seconds added to the clock per newly claimed word, by default
const DEFAULT_WORD_BONUS_SECS: u32 = 5;

/// Configurable round length bounds
const MIN_TIME_LIMIT_SECS: u32 = 30;
const MAX_TIME_LIMIT_SECS: u32 = 600;

/// Largest per-word clock bonus a challenge may configure
const MAX_WORD_BONUS_SECS: u32 = 60;

/// Shortest word the board accepts
pub const MIN_WORD_LEN: usize = 3;

/// Ended games linger this long for the results screen before pruning.
/// Covers slow reconnects and squads coordinating a rematch.
const ENDED_GAME_GRACE_SECS: i64 = 480;

/// Any game older than this is pruned regardless of state (24h)
const GAME_RETENTION_SECS: i64 = 24 * 60 * 60;

/// Challenges not acted on within this window are pruned
const CHALLENGE_TTL_SECS: i64 = 10 * 60;

/// Lobby chat retention (24h)
const LOBBY_MESSAGE_RETENTION_SECS: i64 = 24 * 60 * 60;

/// A player whose last heartbeat is older than this is shown Offline
const PRESENCE_TIMEOUT_SECS: i64 = 90;

/// Longest lobby message accepted
const MAX_LOBBY_MESSAGE_LEN: usize = 500;

/// Keep at least this many never-played boards banked
const PUZZLE_POOL_LOW_WATER: usize = 3;

/// Board size requested when the pool runs low
const DEFAULT_BOARD_DIM: u32 = 4;

/// Fulfilled generation requests are deleted after this audit window (7d)
const REQUEST_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

// ==================== WORD SCORING ====================

/// Point values for word lengths 3 through 7 - strictly increasing so a
/// longer find always outscores a shorter one. Length >= 8 collapses into
/// the single long-word bonus bucket.
///
/// This table must stay identical on every client and in every server-side
/// check; a mismatch means two players disagree about a score.
const WORD_POINT_VALUES: [u32; 5] = [100, 200, 400, 600, 850];

/// Flat value for any word of 8 or more letters
const LONG_WORD_VALUE: u32 = 1200;

/// Point value of a word. Special (theme) words score exactly double.
pub fn word_value(length: usize, special: bool) -> u32 {
    let base = match length {
        0..=2 => 0,
        3..=7 => WORD_POINT_VALUES[length - 3],
        _ => LONG_WORD_VALUE,
    };
    if special {
        base * 2
    } else {
        base
    }
}

// ==================== HELPER FUNCTIONS ====================

/// Get player from session using the sender's identity
/// This abstracts the session lookup pattern used throughout reducers
fn get_player(ctx: &ReducerContext) -> Result<Player, String> {
    let session = ctx
        .db
        .session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("No session found".to_string())?;

    ctx.db
        .player()
        .id()
        .find(&session.player_id)
        .ok_or("Player not found".to_string())
}

/// Helper: Find the game_player row for a player in a game
fn find_game_player(ctx: &ReducerContext, player_id: &str, game_id: u64) -> Option<GamePlayer> {
    ctx.db
        .game_player()
        .game_id()
        .filter(&game_id)
        .find(|gp| gp.player_id == player_id)
}

/// Helper: Update game_player by ID
fn update_game_player(ctx: &ReducerContext, game_player: GamePlayer) {
    ctx.db.game_player().id().update(game_player);
}

/// Count players still marked active in a game
fn count_active_players(ctx: &ReducerContext, game_id: u64) -> usize {
    ctx.db
        .game_player()
        .game_id()
        .filter(&game_id)
        .filter(|gp| gp.is_active)
        .count()
}

/// Claim a ledger slot for a player. Returns true when this call won the
/// slot; a slot that already holds a claimant is never overwritten.
/// This is the entire arbitration rule - the surrounding reducer transaction
/// makes the check-then-set atomic under concurrent submission.
fn claim_slot(slot: &mut Option<String>, player_id: &str) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(player_id.to_string());
    true
}

/// Idempotent push: add `word` unless already present. Returns true on add.
fn add_unique(words: &mut Vec<String>, word: &str) -> bool {
    if words.iter().any(|w| w == word) {
        return false;
    }
    words.push(word.to_string());
    true
}

/// Authoritative match end time: base limit plus one bonus per claimed word.
/// Recomputed from the claim count rather than accumulated, so replaying the
/// same count yields the same instant and the clock never runs backwards.
fn compute_end_at(
    started_at: Timestamp,
    time_limit_secs: u32,
    word_bonus_secs: u32,
    words_claimed: u32,
) -> Timestamp {
    let total_secs = time_limit_secs as u64 + word_bonus_secs as u64 * words_claimed as u64;
    started_at + std::time::Duration::from_secs(total_secs)
}

/// Seconds elapsed between two timestamps (clamped at zero)
fn secs_between(earlier: Timestamp, later: Timestamp) -> i64 {
    let delta = later.to_micros_since_unix_epoch() - earlier.to_micros_since_unix_epoch();
    (delta / 1_000_000).max(0)
}

/// Cancel any pending timeout for a game (idempotent)
fn cancel_game_timeout(ctx: &ReducerContext, game_id: u64) {
    for schedule in ctx.db.game_timeout_schedule().iter().filter(|s| s.game_id == game_id) {
        ctx.db.game_timeout_schedule().id().delete(&schedule.id);
    }
}

fn cancel_countdown_schedule(ctx: &ReducerContext, game_id: u64) {
    for schedule in ctx.db.countdown_schedule().iter().filter(|s| s.game_id == game_id) {
        ctx.db.countdown_schedule().id().delete(&schedule.id);
    }
}

/// Cancel the 1-second tick driving one deployed power-up
fn cancel_powerup_ticks(ctx: &ReducerContext, powerup_id: u64) {
    for schedule in ctx.db.powerup_tick_schedule().iter().filter(|s| s.powerup_id == powerup_id) {
        ctx.db.powerup_tick_schedule().id().delete(&schedule.id);
    }
}

/// Remove every deployed power-up of a game, ticks included
fn clear_game_powerups(ctx: &ReducerContext, game_id: u64) {
    let powerups: Vec<_> = ctx.db.active_powerup().game_id().filter(&game_id).collect();
    for powerup in powerups {
        cancel_powerup_ticks(ctx, powerup.id);
        ctx.db.active_powerup().id().delete(&powerup.id);
    }
}

// ==================== TABLES ====================

/// Session links ephemeral connection to stable player
/// PRIVATE: Links connection identity to player ID
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Stable player ID - verified by the gateway before create_session
    pub player_id: String,

    /// When this session was created
    pub connected_at: Timestamp,
}

/// Presence roster entry and durable profile.
/// Public by design: the lobby shows who is online to challenge. Nothing
/// here is sensitive - identity verification lives in the session table.
#[table(name = player, public)]
#[derive(Clone)]
pub struct Player {
    #[primary_key]
    pub id: String,

    /// Display name
    pub name: String,

    /// Avatar URL, when the identity provider supplies one
    pub photo_url: Option<String>,

    /// Where the client currently is (lobby, matchmaking, playing)
    pub phase: PlayerPhase,

    /// Client preferences stored as JSON
    /// Example: {"theme": "dark", "traceStyle": "drag"}
    pub preferences: Option<String>,

    /// Last heartbeat; the sweep flips silent players to Offline
    pub last_seen: Timestamp,

    /// Games completed (any outcome)
    pub total_games: u32,

    /// Words claimed across all games
    pub total_words: u32,

    /// Lifetime score across all games
    pub total_score: u32,

    /// Currently in a game
    pub in_game_id: Option<u64>,

    pub created_at: Timestamp,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum PlayerPhase {
    Lobby,
    Matchmaking,
    Playing,
    Offline,
}

/// An immutable board: the letter grid plus its precomputed solution set.
/// Solved externally by the generation service - the module never recomputes
/// the word list mid-match.
#[table(name = puzzle, public)]
#[derive(Clone)]
pub struct Puzzle {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub width: u32,
    pub height: u32,

    /// Row-major tiles; a tile may hold several letters ("QU")
    pub tiles: Vec<String>,

    /// Exhaustive valid-word set, uppercase, sorted
    pub words: Vec<String>,

    /// Theme words that score double
    pub special_words: Vec<String>,

    pub theme: Option<String>,

    /// Generator metadata, kept for board selection heuristics
    pub average_word_length: f32,
    pub common_word_amount: u32,
    pub date_created: String,

    /// Key the archived matrix was obfuscated with, when the generator used one
    pub substitution_key: Option<String>,

    /// How many candidate boards the generator burned to produce this one
    pub source_attempts: u32,

    pub created_at: Timestamp,
}

/// Which boards a player has already been dealt (dedup for board selection)
#[table(name = puzzle_seen, public)]
pub struct PuzzleSeen {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub player_id: String,

    #[index(btree)]
    pub puzzle_id: u64,

    pub seen_at: Timestamp,
}

/// A live or recently ended match
#[table(name = game, public)]
#[derive(Clone)]
pub struct Game {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// Board this match is played on
    pub puzzle_id: u64,

    /// Game state
    pub state: GameState,

    /// When the row was created (matchmaking may precede the clock by minutes)
    pub created_at: Timestamp,

    /// When the clock actually started (stamped on the Active transition)
    pub started_at: Timestamp,

    /// Authoritative end of the match; extended as words are claimed
    pub end_at: Timestamp,

    /// When countdown started (for client sync during 3-2-1-GO)
    #[default(None::<Timestamp>)]
    pub countdown_started_at: Option<Timestamp>,

    /// Base round length in seconds
    pub time_limit_secs: u32,

    /// Seconds added to the clock per newly claimed word
    pub word_bonus_secs: u32,

    /// Theme carried from the board, when it has one
    pub theme: Option<String>,

    /// Solo games skip matchmaking and countdown entirely
    pub is_solo: bool,

    /// Claimed-entry count, kept in step with the found_word ledger
    pub words_claimed: u32,

    /// Wall-clock length of the finished match
    pub duration_secs: Option<u32>,

    /// Highest scorer, stamped when the game ends
    #[default(None::<String>)]
    pub winner: Option<String>,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum GameState {
    Matchmaking, // Pre-game: forming the table
    Countdown,   // 3-2-1-GO before the board is revealed
    Active,      // Clock running, claims accepted
    Ended,       // Terminal; pruned after the results grace period
}

/// Per-player progress within one game
/// Note: No unique constraint on player_id - a player can have rows from
/// different games. Reducers manually check for duplicates within a game.
#[table(name = game_player, public)]
#[derive(Clone)]
pub struct GamePlayer {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub game_id: u64,

    #[index(btree)]
    pub player_id: String,

    /// Player name (denormalized for the scoreboard)
    pub player_name: String,

    /// Points from claimed words
    pub score: u32,

    /// Attack currency earned from redeemed words
    pub attack_points: u32,

    /// Claimed-word count for this player in this game
    pub words_found: u32,

    /// Words redeemed against opponents; idempotent set, never double-credited
    pub found_opponent_words: Vec<String>,

    /// Cells currently under the player's trace, for opponent ghosting.
    /// Owned by this player alone, so last-write-wins is safe.
    pub touched_cells: Vec<u32>,

    /// Power-ups purchased and not yet deployed
    pub available_powers: Vec<PowerKind>,

    /// Ready to start (matchmaking only)
    pub is_ready: bool,

    /// false once the player disconnects or leaves
    pub is_active: bool,

    /// Leader runs the table during matchmaking
    pub is_leader: bool,
}

/// The found-word ledger: one row per puzzle word per game, seeded unclaimed
/// when the clock starts. claimed_by is assigned at most once and never
/// changes afterwards - that is the whole multiplayer correctness story.
#[table(name = found_word, public)]
#[derive(Clone)]
pub struct FoundWord {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub game_id: u64,

    #[index(btree)]
    pub word: String,

    /// Theme word, scores double. Stamped at seeding from the board's
    /// special-word list, never taken from client claims.
    pub special: bool,

    /// None until exactly one player wins the claim
    pub claimed_by: Option<String>,

    pub claimed_at: Option<Timestamp>,
}

/// A timed gameplay modifier deployed into a game
#[table(name = active_powerup, public)]
#[derive(Clone)]
pub struct ActivePowerup {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub game_id: u64,

    pub kind: PowerKind,
    pub category: PowerCategory,

    /// Attack points the activator paid for it
    pub cost: u32,

    /// Full effect length in seconds
    pub duration_secs: u32,

    /// Seconds remaining; decremented once per second while the game runs
    pub time_left_secs: u32,

    pub activated_by: String,

    /// Curse target; None means the effect applies to the activator
    pub target: Option<String>,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum PowerCategory {
    Buff,
    Curse,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum PowerKind {
    WordHint,      // buff: reveal the trace of one unclaimed word
    ScoreShield,   // buff: absorbs the next incoming curse
    TimeFreeze,    // buff: pause your own countdown display
    InkSplat,      // curse: blot random tiles on the target's board
    GridSpin,      // curse: rotate the target's board
    LetterShuffle, // curse: scramble the target's tile positions
}

impl PowerKind {
    pub fn category(&self) -> PowerCategory {
        match self {
            PowerKind::WordHint | PowerKind::ScoreShield | PowerKind::TimeFreeze => {
                PowerCategory::Buff
            }
            PowerKind::InkSplat | PowerKind::GridSpin | PowerKind::LetterShuffle => {
                PowerCategory::Curse
            }
        }
    }

    /// Attack-point price when purchased into a player's rack
    pub fn cost(&self) -> u32 {
        match self {
            PowerKind::WordHint => 300,
            PowerKind::ScoreShield => 450,
            PowerKind::TimeFreeze => 500,
            PowerKind::InkSplat => 400,
            PowerKind::GridSpin => 550,
            PowerKind::LetterShuffle => 700,
        }
    }

    /// Seconds the effect stays deployed
    pub fn duration_secs(&self) -> u32 {
        match self {
            PowerKind::WordHint => 8,
            PowerKind::ScoreShield => 20,
            PowerKind::TimeFreeze => 10,
            PowerKind::InkSplat => 15,
            PowerKind::GridSpin => 12,
            PowerKind::LetterShuffle => 10,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PowerKind::WordHint => "word_hint",
            PowerKind::ScoreShield => "score_shield",
            PowerKind::TimeFreeze => "time_freeze",
            PowerKind::InkSplat => "ink_splat",
            PowerKind::GridSpin => "grid_spin",
            PowerKind::LetterShuffle => "letter_shuffle",
        }
    }
}

/// How the client classified a submitted word
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum WordStatus {
    /// Normal find: claims the shared ledger entry
    Valid,
    /// Theme-word claim; specialness is verified against the seeded row
    Special,
    /// Banked as attack currency; never touches the ledger
    Redeemable,
}

/// An invitation from one player to another
#[table(name = challenge, public)]
#[derive(Clone)]
pub struct Challenge {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub instigator_uid: String,

    #[index(btree)]
    pub respondent_uid: String,

    /// Flipped by the respondent the instant before consumption into a game
    pub accepted: bool,

    pub time_limit_secs: u32,
    pub word_bonus_secs: u32,

    /// Pinned board, or None to deal a fresh one on acceptance
    pub puzzle_id: Option<u64>,

    pub created_at: Timestamp,
}

/// Lobby chat line
#[table(name = lobby_message, public)]
pub struct LobbyMessage {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub sender_id: String,

    /// Sender name (denormalized so pruned players keep their lines readable)
    pub sender_name: String,

    pub text: String,

    #[index(btree)]
    pub sent_at: Timestamp,
}

/// Board-generation request queue - reliable hand-off to the worker that
/// calls the external generation service.
/// SECURITY: Public table with RLS protection - only authorized workers see rows
#[table(name = puzzle_request_queue, public)]
#[derive(Clone)]
pub struct PuzzleRequestQueue {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub width: u32,
    pub height: u32,

    /// Requested theme, when the pool wants themed boards
    pub theme: Option<String>,

    #[index(btree)]
    pub requested_at: Timestamp,

    /// Settled by seed_puzzle
    #[index(btree)]
    pub fulfilled: bool,

    /// Generation attempt count (dead-lettered past the limit)
    pub attempts: u8,

    /// When to retry (None = now)
    pub next_retry_at: Option<Timestamp>,

    /// Last error if failed
    pub last_error: Option<String>,
}

/// Authorized identities that can access protected tables and admin reducers
/// Used for RLS filtering and reducer authorization checks
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// Schedule table for the periodic pruning sweep
#[table(name = cleanup_schedule, scheduled(cleanup_sweep))]
pub struct CleanupSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub scheduled_at: ScheduleAt,
}

/// Schedule table for match timeouts. Rescheduled every time a claim
/// extends the clock; stale rows are dropped when they fire early.
#[table(name = game_timeout_schedule, scheduled(check_game_timeout))]
pub struct GameTimeoutSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub game_id: u64,

    pub scheduled_at: ScheduleAt,
}

/// Schedule table for countdown completion (3-2-1-GO before the clock runs)
#[table(name = countdown_schedule, public, scheduled(countdown_complete))]
pub struct CountdownSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub game_id: u64,

    pub scheduled_at: ScheduleAt,
}

/// Schedule table driving one deployed power-up's per-second countdown
#[table(name = powerup_tick_schedule, scheduled(powerup_tick))]
pub struct PowerupTickSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub powerup_id: u64,

    pub scheduled_at: ScheduleAt,
}

// ==================== ROW LEVEL SECURITY ====================

/// RLS Filter: Only authorized workers see generation-queue rows, so clients
/// can neither snoop upcoming boards nor spoof fulfillment state
#[client_visibility_filter]
const PUZZLE_QUEUE_VISIBILITY: Filter = Filter::Sql(
    "SELECT pq.* FROM puzzle_request_queue pq
     JOIN authorized_worker aw WHERE aw.identity = :sender",
);

// ==================== SESSION & PRESENCE REDUCERS ====================

/// Create a verified session for a client identity
/// Called by the gateway AFTER verifying the identity provider's token.
/// Only authorized workers (gateway with owner token) can call this.
#[reducer]
pub fn create_session(ctx: &ReducerContext, client_identity: String, player_id: String) {
    // Authorization check: only authorized workers can create sessions
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        panic!("Unauthorized: only gateway can create sessions");
    }

    let identity = Identity::from_hex(&client_identity).expect("Invalid identity hex string");

    // Delete stale sessions: same player (unclean reconnect) OR same
    // connection_id (prevents PK conflict)
    let stale_sessions: Vec<_> = ctx
        .db
        .session()
        .iter()
        .filter(|s| s.player_id == player_id || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in stale_sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    ctx.db.session().insert(Session {
        connection_id: identity,
        player_id: player_id.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!(
        "[SESSION] created player:{} ws:{}",
        &player_id[..8.min(player_id.len())],
        &client_identity[..8.min(client_identity.len())]
    );
}

/// Player connects to the lobby
/// The player_id is read from the verified session created by the gateway.
#[reducer]
pub fn connect(
    ctx: &ReducerContext,
    name: String,
    photo_url: Option<String>,
    preferences: Option<String>,
) {
    let session = ctx
        .db
        .session()
        .connection_id()
        .find(&ctx.sender)
        .expect("Session not found - verify with gateway first");

    let player_id = session.player_id.clone();

    // Preferences are an opaque client blob, but malformed JSON is dropped
    // here so every reader can parse what is stored
    let preferences = preferences.filter(|p| {
        let ok = serde_json::from_str::<Value>(p).is_ok();
        if !ok {
            log::warn!("[CONNECT] dropping malformed preferences for {}", player_id);
        }
        ok
    });

    if let Some(mut existing) = ctx.db.player().id().find(&player_id) {
        existing.name = name;
        if photo_url.is_some() {
            existing.photo_url = photo_url;
        }
        if preferences.is_some() {
            existing.preferences = preferences;
        }
        existing.phase = PlayerPhase::Lobby;
        existing.last_seen = ctx.timestamp;

        // Reconcile game membership after a reconnect
        if let Some(game_id) = existing.in_game_id {
            if let Some(game) = ctx.db.game().id().find(&game_id) {
                if let Some(mut gp) = find_game_player(ctx, &player_id, game_id) {
                    if !gp.is_active {
                        gp.is_active = true;
                        update_game_player(ctx, gp);
                    }
                }
                if game.state == GameState::Active {
                    existing.phase = PlayerPhase::Playing;
                }
                log::info!(
                    "[CONNECT] {} rejoining game:{} state:{:?}",
                    existing.name,
                    game_id,
                    game.state
                );
            } else {
                // The game was pruned while they were away
                log::warn!("[CONNECT] {} had stale game:{} - cleared", existing.name, game_id);
                existing.in_game_id = None;
            }
        }

        // Wide event: one canonical log with full player context
        log::info!(
            "[CONNECT] player=\"{}\" player_id={} type=returning games={} score={} in_game={:?}",
            existing.name,
            &player_id[..8.min(player_id.len())],
            existing.total_games,
            existing.total_score,
            existing.in_game_id
        );

        ctx.db.player().id().update(existing);
    } else {
        let new_player = Player {
            id: player_id.clone(),
            name,
            photo_url,
            phase: PlayerPhase::Lobby,
            preferences,
            last_seen: ctx.timestamp,
            total_games: 0,
            total_words: 0,
            total_score: 0,
            in_game_id: None,
            created_at: ctx.timestamp,
        };
        ctx.db.player().insert(new_player.clone());

        log::info!(
            "[CONNECT] player=\"{}\" player_id={} type=new",
            new_player.name,
            &player_id[..8.min(player_id.len())]
        );
    }
}

/// Clean up session when a player disconnects
#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    if let Some(session) = ctx.db.session().connection_id().find(&ctx.sender) {
        if let Some(mut player) = ctx.db.player().id().find(&session.player_id) {
            let session_secs = secs_between(session.connected_at, ctx.timestamp);
            log::info!(
                "[DISCONNECT] {} player:{} session_min:{:.1} in_game:{}",
                player.name,
                &player.id[..8.min(player.id.len())],
                session_secs as f32 / 60.0,
                player.in_game_id.is_some()
            );

            if let Some(game_id) = player.in_game_id {
                if let Some(game) = ctx.db.game().id().find(&game_id) {
                    match game.state {
                        GameState::Matchmaking => {
                            // Leaving the queue on disconnect prevents limbo
                            // lobbies waiting on a ghost player
                            remove_player_from_game(ctx, &player.id, game_id);
                            player.in_game_id = None;
                        }
                        _ => {
                            // Running or finished game: mark inactive, keep
                            // membership so a reconnect resumes in place
                            if let Some(mut gp) = find_game_player(ctx, &player.id, game_id) {
                                gp.is_active = false;
                                update_game_player(ctx, gp);
                            }
                        }
                    }
                } else {
                    player.in_game_id = None;
                }
            }

            player.phase = PlayerPhase::Offline;
            player.last_seen = ctx.timestamp;
            ctx.db.player().id().update(player);
        }

        ctx.db.session().connection_id().delete(&ctx.sender);
    }
}

/// Periodic presence heartbeat; also carries the client's current phase
#[reducer]
pub fn heartbeat(ctx: &ReducerContext, phase: PlayerPhase) {
    let mut player = match get_player(ctx) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("heartbeat: {}", e);
            return;
        }
    };
    player.phase = phase;
    player.last_seen = ctx.timestamp;
    ctx.db.player().id().update(player);
}

/// Self-service profile update
#[reducer]
pub fn update_profile(ctx: &ReducerContext, name: Option<String>, photo_url: Option<String>) {
    let mut player = match get_player(ctx) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("update_profile: {}", e);
            return;
        }
    };
    if let Some(name) = name {
        let trimmed = name.trim().to_string();
        if trimmed.is_empty() {
            log::warn!("update_profile: empty name rejected for {}", player.id);
            return;
        }
        player.name = trimmed;
    }
    if photo_url.is_some() {
        player.photo_url = photo_url;
    }
    ctx.db.player().id().update(player);
}

/// Store a client preference blob (validated as JSON)
#[reducer]
pub fn set_preferences(ctx: &ReducerContext, preferences: String) -> Result<(), String> {
    let mut player = get_player(ctx)?;
    serde_json::from_str::<Value>(&preferences)
        .map_err(|e| format!("Invalid preferences JSON: {}", e))?;
    player.preferences = Some(preferences);
    ctx.db.player().id().update(player);
    Ok(())
}

// ==================== LOBBY CHAT ====================

/// Post a lobby chat line
#[reducer]
pub fn send_lobby_message(ctx: &ReducerContext, text: String) -> Result<(), String> {
    let player = get_player(ctx)?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err("Empty message".to_string());
    }
    if text.len() > MAX_LOBBY_MESSAGE_LEN {
        return Err(format!("Message over {} characters", MAX_LOBBY_MESSAGE_LEN));
    }

    ctx.db.lobby_message().insert(LobbyMessage {
        id: 0, // auto_inc
        sender_id: player.id,
        sender_name: player.name,
        text,
        sent_at: ctx.timestamp,
    });
    Ok(())
}

// ==================== CHALLENGE REDUCERS ====================

/// Invite another player to a match
#[reducer]
pub fn send_challenge(
    ctx: &ReducerContext,
    respondent_uid: String,
    time_limit_secs: Option<u32>,
    word_bonus_secs: Option<u32>,
    puzzle_id: Option<u64>,
) -> Result<(), String> {
    let instigator = get_player(ctx)?;
    if instigator.in_game_id.is_some() {
        return Err("Finish your current game first".to_string());
    }
    if instigator.id == respondent_uid {
        return Err("Cannot challenge yourself".to_string());
    }

    let respondent = ctx
        .db
        .player()
        .id()
        .find(&respondent_uid)
        .ok_or("No player with that id".to_string())?;
    if respondent.phase == PlayerPhase::Offline {
        return Err(format!("{} is offline", respondent.name));
    }

    // One open invitation per pair at a time
    let already_pending = ctx
        .db
        .challenge()
        .instigator_uid()
        .filter(&instigator.id)
        .any(|c| c.respondent_uid == respondent_uid);
    if already_pending {
        return Err("Challenge already pending".to_string());
    }

    let time_limit = time_limit_secs
        .unwrap_or(DEFAULT_TIME_LIMIT_SECS)
        .clamp(MIN_TIME_LIMIT_SECS, MAX_TIME_LIMIT_SECS);
    let word_bonus = word_bonus_secs
        .unwrap_or(DEFAULT_WORD_BONUS_SECS)
        .min(MAX_WORD_BONUS_SECS);

    if let Some(pid) = puzzle_id {
        if ctx.db.puzzle().id().find(&pid).is_none() {
            return Err("No puzzle with that id".to_string());
        }
    }

    let challenge = ctx.db.challenge().insert(Challenge {
        id: 0, // auto_inc
        instigator_uid: instigator.id.clone(),
        respondent_uid: respondent_uid.clone(),
        accepted: false,
        time_limit_secs: time_limit,
        word_bonus_secs: word_bonus,
        puzzle_id,
        created_at: ctx.timestamp,
    });

    log::info!(
        "[CHALLENGE] sent id:{} from:{} to:{} limit:{}s bonus:{}s",
        challenge.id,
        instigator.name,
        respondent.name,
        time_limit,
        word_bonus
    );
    Ok(())
}

/// Respondent accepts: the challenge is consumed into a Matchmaking game
#[reducer]
pub fn accept_challenge(ctx: &ReducerContext, challenge_id: u64) -> Result<(), String> {
    let respondent = get_player(ctx)?;
    let mut challenge = ctx
        .db
        .challenge()
        .id()
        .find(&challenge_id)
        .ok_or("Challenge not found".to_string())?;
    if challenge.respondent_uid != respondent.id {
        return Err("This challenge is not addressed to you".to_string());
    }
    if respondent.in_game_id.is_some() {
        return Err("Finish your current game first".to_string());
    }

    let mut instigator = ctx
        .db
        .player()
        .id()
        .find(&challenge.instigator_uid)
        .ok_or("Challenger no longer exists".to_string())?;
    if instigator.in_game_id.is_some() {
        return Err(format!("{} is already in a game", instigator.name));
    }

    // Pin the agreed board, or deal one neither player has seen
    let puzzle = match challenge.puzzle_id {
        Some(pid) => ctx
            .db
            .puzzle()
            .id()
            .find(&pid)
            .ok_or("Agreed puzzle no longer exists".to_string())?,
        None => pick_unseen_puzzle(ctx, &[instigator.id.as_str(), respondent.id.as_str()], None)
            .ok_or("No boards available - try again shortly".to_string())?,
    };

    // The flag flips first; the row is consumed into the game below
    challenge.accepted = true;
    ctx.db.challenge().id().update(challenge.clone());

    let game = ctx.db.game().insert(Game {
        id: 0, // auto_inc
        puzzle_id: puzzle.id,
        state: GameState::Matchmaking,
        created_at: ctx.timestamp,
        started_at: ctx.timestamp, // restamped when the clock starts
        end_at: ctx.timestamp,
        countdown_started_at: None,
        time_limit_secs: challenge.time_limit_secs,
        word_bonus_secs: challenge.word_bonus_secs,
        theme: puzzle.theme.clone(),
        is_solo: false,
        words_claimed: 0,
        duration_secs: None,
        winner: None,
    });

    insert_game_player(ctx, game.id, &instigator, true);
    insert_game_player(ctx, game.id, &respondent, false);

    instigator.in_game_id = Some(game.id);
    instigator.phase = PlayerPhase::Matchmaking;
    let instigator_name = instigator.name.clone();
    ctx.db.player().id().update(instigator);

    let mut respondent = respondent;
    respondent.in_game_id = Some(game.id);
    respondent.phase = PlayerPhase::Matchmaking;
    let respondent_name = respondent.name.clone();
    ctx.db.player().id().update(respondent);

    ctx.db.challenge().id().delete(&challenge.id);

    log::info!(
        "[CHALLENGE] accepted id:{} game:{} players:[{}, {}] puzzle:{}",
        challenge.id,
        game.id,
        instigator_name,
        respondent_name,
        puzzle.id
    );
    Ok(())
}

/// Decline (respondent) or cancel (instigator) an open challenge
#[reducer]
pub fn decline_challenge(ctx: &ReducerContext, challenge_id: u64) -> Result<(), String> {
    let player = get_player(ctx)?;
    let challenge = ctx
        .db
        .challenge()
        .id()
        .find(&challenge_id)
        .ok_or("Challenge not found".to_string())?;

    if challenge.respondent_uid != player.id && challenge.instigator_uid != player.id {
        return Err("Not your challenge".to_string());
    }

    let action = if challenge.instigator_uid == player.id { "cancelled" } else { "declined" };
    ctx.db.challenge().id().delete(&challenge.id);
    log::info!("[CHALLENGE] {} id:{} by:{}", action, challenge_id, player.name);
    Ok(())
}

// ==================== GAME LIFECYCLE REDUCERS ====================

/// Start a solo game: deal an unseen board and run the clock immediately
/// (no matchmaking, no countdown)
#[reducer]
pub fn start_solo_game(
    ctx: &ReducerContext,
    time_limit_secs: Option<u32>,
    word_bonus_secs: Option<u32>,
    theme: Option<String>,
) -> Result<(), String> {
    let player = get_player(ctx)?;
    if player.in_game_id.is_some() {
        return Err("Finish your current game first".to_string());
    }

    let puzzle = pick_unseen_puzzle(ctx, &[player.id.as_str()], theme.as_deref())
        .ok_or("No boards available - try again shortly".to_string())?;

    let time_limit = time_limit_secs
        .unwrap_or(DEFAULT_TIME_LIMIT_SECS)
        .clamp(MIN_TIME_LIMIT_SECS, MAX_TIME_LIMIT_SECS);
    let word_bonus = word_bonus_secs
        .unwrap_or(DEFAULT_WORD_BONUS_SECS)
        .min(MAX_WORD_BONUS_SECS);

    let game = ctx.db.game().insert(Game {
        id: 0, // auto_inc
        puzzle_id: puzzle.id,
        state: GameState::Matchmaking, // activate_game flips this
        created_at: ctx.timestamp,
        started_at: ctx.timestamp,
        end_at: ctx.timestamp,
        countdown_started_at: None,
        time_limit_secs: time_limit,
        word_bonus_secs: word_bonus,
        theme: puzzle.theme.clone(),
        is_solo: true,
        words_claimed: 0,
        duration_secs: None,
        winner: None,
    });

    insert_game_player(ctx, game.id, &player, true);

    let mut player = player;
    player.in_game_id = Some(game.id);
    ctx.db.player().id().update(player);

    activate_game(ctx, game.id);
    Ok(())
}

/// Join an existing multiplayer game by id (spectating is not a thing - you
/// play or you stay out)
#[reducer]
pub fn join_game(ctx: &ReducerContext, game_id: u64) -> Result<(), String> {
    let player = get_player(ctx)?;
    if player.in_game_id.is_some() {
        return Err("Finish your current game first".to_string());
    }

    let game = ctx
        .db
        .game()
        .id()
        .find(&game_id)
        .ok_or("No game with that id".to_string())?;
    if game.is_solo {
        return Err("That game is solo".to_string());
    }
    if game.state != GameState::Matchmaking {
        return Err("Game already started".to_string());
    }

    let seats_taken = ctx.db.game_player().game_id().filter(&game_id).count();
    if seats_taken >= MAX_PLAYERS_PER_GAME {
        return Err("Game is full".to_string());
    }

    // Duplicate seat check - manual, since multi-column unique constraints
    // aren't a thing here
    if find_game_player(ctx, &player.id, game_id).is_some() {
        return Err("Already seated in that game".to_string());
    }

    insert_game_player(ctx, game_id, &player, false);

    let mut player = player;
    player.in_game_id = Some(game_id);
    player.phase = PlayerPhase::Matchmaking;
    let player_name = player.name.clone();
    ctx.db.player().id().update(player);

    log::info!("[GAME] joined game:{} player:{}", game_id, player_name);
    Ok(())
}

/// Flip the ready flag while the table is forming
#[reducer]
pub fn toggle_ready(ctx: &ReducerContext) {
    let player = match get_player(ctx) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("toggle_ready: {}", e);
            return;
        }
    };
    let game_id = match player.in_game_id {
        Some(id) => id,
        None => {
            log::warn!("toggle_ready: Player {} not in a game", player.id);
            return;
        }
    };
    match ctx.db.game().id().find(&game_id) {
        Some(g) if g.state == GameState::Matchmaking => {}
        _ => {
            log::warn!("toggle_ready: Game {} not in matchmaking", game_id);
            return;
        }
    }
    if let Some(mut gp) = find_game_player(ctx, &player.id, game_id) {
        gp.is_ready = !gp.is_ready;
        update_game_player(ctx, gp);
    }
}

/// Leader starts the match once every seated player is ready.
/// The game enters Countdown; the clock starts when the countdown lands.
#[reducer]
pub fn start_game(ctx: &ReducerContext) -> Result<(), String> {
    let player = get_player(ctx)?;
    let game_id = player.in_game_id.ok_or("Not in a game".to_string())?;
    let mut game = ctx
        .db
        .game()
        .id()
        .find(&game_id)
        .ok_or("Game not found".to_string())?;

    if game.state != GameState::Matchmaking {
        return Err("Game already started".to_string());
    }

    let seated: Vec<_> = ctx
        .db
        .game_player()
        .game_id()
        .filter(&game_id)
        .filter(|gp| gp.is_active)
        .collect();
    let me = seated
        .iter()
        .find(|gp| gp.player_id == player.id)
        .ok_or("Not seated in this game".to_string())?;
    if !me.is_leader {
        return Err("Only the leader can start".to_string());
    }
    if seated.iter().any(|gp| !gp.is_ready) {
        return Err("Not everyone is ready".to_string());
    }

    game.state = GameState::Countdown;
    game.countdown_started_at = Some(ctx.timestamp);
    ctx.db.game().id().update(game);

    ctx.db.countdown_schedule().insert(CountdownSchedule {
        id: 0, // auto_inc
        game_id,
        scheduled_at: ScheduleAt::Time(
            (ctx.timestamp + std::time::Duration::from_secs(COUNTDOWN_DURATION_SECS)).into(),
        ),
    });

    log::info!(
        "[GAME] countdown game:{} players:{} leader:{}",
        game_id,
        seated.len(),
        player.name
    );
    Ok(())
}

/// Countdown landed: reveal the board and start the clock (scheduled reducer)
#[reducer]
pub fn countdown_complete(ctx: &ReducerContext, schedule: CountdownSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call countdown_complete", ctx.sender);
        ctx.db.countdown_schedule().id().delete(&schedule.id);
        return;
    }

    match ctx.db.game().id().find(&schedule.game_id) {
        Some(g) if g.state == GameState::Countdown => {
            activate_game(ctx, schedule.game_id);
        }
        Some(g) => {
            log::warn!(
                "Countdown fired but game {} is in {:?}, ignoring",
                schedule.game_id,
                g.state
            );
        }
        None => {
            log::warn!("Countdown fired but game {} doesn't exist", schedule.game_id);
        }
    }

    ctx.db.countdown_schedule().id().delete(&schedule.id);
}

/// End the current game explicitly. Solo players may always bail out;
/// at a multiplayer table only the leader can call it.
#[reducer]
pub fn end_game(ctx: &ReducerContext) {
    let player = match get_player(ctx) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("end_game: {}", e);
            return;
        }
    };
    let game_id = match player.in_game_id {
        Some(id) => id,
        None => {
            log::warn!("end_game: Player {} not in a game", player.id);
            return;
        }
    };
    let game = match ctx.db.game().id().find(&game_id) {
        Some(g) => g,
        None => {
            log::warn!("end_game: Game {} not found", game_id);
            return;
        }
    };
    if !matches!(game.state, GameState::Active) {
        log::warn!("end_game: Game {} not active", game_id);
        return;
    }

    if !game.is_solo {
        let is_leader = find_game_player(ctx, &player.id, game_id)
            .map(|gp| gp.is_leader)
            .unwrap_or(false);
        if !is_leader {
            log::warn!("end_game: {} is not the leader of game {}", player.id, game_id);
            return;
        }
    }

    end_game_internal(ctx, game_id, "ended_by_player");
}

/// Leave the current game. During matchmaking the seat is freed (and the
/// crown moves if the leader walks); mid-game the player goes inactive and
/// the game ends if nobody active remains.
#[reducer]
pub fn leave_game(ctx: &ReducerContext) {
    let mut player = match get_player(ctx) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("leave_game: {}", e);
            return;
        }
    };
    let game_id = match player.in_game_id {
        Some(id) => id,
        None => {
            log::warn!("leave_game: Player {} not in a game", player.id);
            return;
        }
    };

    if let Some(game) = ctx.db.game().id().find(&game_id) {
        match game.state {
            GameState::Matchmaking => {
                remove_player_from_game(ctx, &player.id, game_id);
            }
            GameState::Countdown | GameState::Active => {
                if let Some(mut gp) = find_game_player(ctx, &player.id, game_id) {
                    gp.is_active = false;
                    update_game_player(ctx, gp);
                }
                if count_active_players(ctx, game_id) == 0 {
                    end_game_internal(ctx, game_id, "abandoned");
                }
            }
            GameState::Ended => {
                // Leaving the results screen; nothing to unwind
            }
        }
    }

    player.in_game_id = None;
    player.phase = PlayerPhase::Lobby;
    let player_name = player.name.clone();
    ctx.db.player().id().update(player);
    log::info!("[GAME] left game:{} player:{}", game_id, player_name);
}

// ==================== WORD-CLAIM ARBITER ====================

/// Submit a traced word against the current game.
///
/// Valid/Special words race for the shared found-word ledger entry; the
/// check-then-set below runs inside this reducer's transaction, so exactly
/// one of any number of simultaneous claimants wins. Losing the race is a
/// normal outcome (the claimed row tells every client who got there first),
/// not an error.
///
/// Redeemable words are attack currency: they bypass the ledger and its
/// uniqueness rule entirely, and credit is idempotent per player.
#[reducer]
pub fn submit_word(ctx: &ReducerContext, word: String, status: WordStatus) {
    let player = match get_player(ctx) {
        Ok(p) => p,
        _ => {
            log::warn!("submit_word: No session/player");
            return;
        }
    };
    let game_id = match player.in_game_id {
        Some(id) => id,
        None => {
            log::warn!("submit_word: Player {} not in a game", player.id);
            return;
        }
    };
    let mut game = match ctx.db.game().id().find(&game_id) {
        Some(g) if g.state == GameState::Active => g,
        _ => {
            log::warn!("submit_word: Game {} not active", game_id);
            return;
        }
    };

    // Safety net: the timeout scheduler should have ended this game already
    if ctx.timestamp.to_micros_since_unix_epoch() >= game.end_at.to_micros_since_unix_epoch() {
        log::warn!("Game {} past end_at on submit (scheduler may have lagged)", game_id);
        end_game_internal(ctx, game_id, "timeout");
        return;
    }

    let word = board::normalize_word(&word);
    if word.len() < MIN_WORD_LEN {
        return;
    }

    let puzzle = match ctx.db.puzzle().id().find(&game.puzzle_id) {
        Some(p) => p,
        None => {
            log::error!("submit_word: Puzzle {} missing for game {}", game.puzzle_id, game_id);
            return;
        }
    };

    // Local validation happens client-side; both checks are repeated here
    // because the ledger is the authority and clients can lie
    if !puzzle.words.contains(&word) {
        log::debug!("[CLAIM] rejected word:{} game:{} reason:not_in_puzzle", word, game_id);
        return;
    }
    if !board::is_traceable(&puzzle.tiles, puzzle.width as usize, puzzle.height as usize, &word) {
        log::warn!(
            "[CLAIM] rejected word:{} game:{} player:{} reason:untraceable",
            word,
            game_id,
            player.id
        );
        return;
    }

    let mut gp = match find_game_player(ctx, &player.id, game_id) {
        Some(gp) => gp,
        None => {
            log::error!("submit_word: Player {} has no seat in game {}", player.id, game_id);
            return;
        }
    };

    if status == WordStatus::Redeemable {
        // Attack path: no uniqueness constraint, any number of players may
        // redeem the same word; re-redeeming is a silent no-op
        if !add_unique(&mut gp.found_opponent_words, &word) {
            log::debug!("[CLAIM] repeat redeem word:{} player:{}", word, player.id);
            return;
        }
        let value = word_value(word.len(), false);
        gp.attack_points = gp.attack_points.saturating_add(value);
        let attack_total = gp.attack_points;
        update_game_player(ctx, gp);
        log::info!(
            "[CLAIM] redeemed word:{} game:{} player:{} value:{} attack_total:{}",
            word,
            game_id,
            player.name,
            value,
            attack_total
        );
        return;
    }

    // Claim path: one ledger row per word, first writer wins
    let mut entry = match ctx
        .db
        .found_word()
        .game_id()
        .filter(&game_id)
        .find(|fw| fw.word == word)
    {
        Some(fw) => fw,
        None => {
            log::error!("submit_word: Ledger row missing for {} in game {}", word, game_id);
            return;
        }
    };

    if !claim_slot(&mut entry.claimed_by, &player.id) {
        // Contention outcome, not a fault: someone else got there first
        log::info!(
            "[CLAIM] duplicate word:{} game:{} player:{} held_by:{:?}",
            word,
            game_id,
            player.name,
            entry.claimed_by
        );
        return;
    }
    entry.claimed_at = Some(ctx.timestamp);
    // Specialness comes from the seeded row; a client claiming Special for
    // a plain word just gets the plain value
    let special = entry.special;
    ctx.db.found_word().id().update(entry);

    let value = word_value(word.len(), special);
    gp.score = gp.score.saturating_add(value);
    gp.words_found = gp.words_found.saturating_add(1);
    let score_after = gp.score;
    update_game_player(ctx, gp);

    // Every claim stretches the clock; recomputing from the claim count
    // keeps the extension idempotent and the clock monotonic
    game.words_claimed = game.words_claimed.saturating_add(1);
    game.end_at = compute_end_at(
        game.started_at,
        game.time_limit_secs,
        game.word_bonus_secs,
        game.words_claimed,
    );
    let words_claimed = game.words_claimed;
    let new_end_at = game.end_at;
    let total_words = puzzle.words.len() as u32;
    ctx.db.game().id().update(game);

    cancel_game_timeout(ctx, game_id);
    ctx.db.game_timeout_schedule().insert(GameTimeoutSchedule {
        id: 0, // auto_inc
        game_id,
        scheduled_at: ScheduleAt::Time(new_end_at.into()),
    });

    log::info!(
        "[CLAIM] claimed word:{} game:{} player:{} value:{} special:{} score:{} progress:{}/{}",
        word,
        game_id,
        player.name,
        value,
        special,
        score_after,
        words_claimed,
        total_words
    );

    if words_claimed >= total_words {
        log::info!("Board cleared! Game {} has no words left", game_id);
        end_game_internal(ctx, game_id, "board_cleared");
    }
}

/// Publish the cells currently under this player's trace so opponents can
/// ghost it. Player-owned state: last write wins, no arbitration needed.
#[reducer]
pub fn update_touched_cells(ctx: &ReducerContext, cells: Vec<u32>) {
    let player = match get_player(ctx) {
        Ok(p) => p,
        Err(_) => return,
    };
    let game_id = match player.in_game_id {
        Some(id) => id,
        None => return,
    };
    let game = match ctx.db.game().id().find(&game_id) {
        Some(g) if g.state == GameState::Active => g,
        _ => return,
    };
    let puzzle = match ctx.db.puzzle().id().find(&game.puzzle_id) {
        Some(p) => p,
        None => return,
    };

    let total = puzzle.width * puzzle.height;
    if cells.len() > total as usize || cells.iter().any(|c| *c >= total) {
        log::warn!("update_touched_cells: out-of-range trace from {}", player.id);
        return;
    }

    if let Some(mut gp) = find_game_player(ctx, &player.id, game_id) {
        gp.touched_cells = cells;
        update_game_player(ctx, gp);
    }
}

// ==================== POWER-UP REDUCERS ====================

/// Buy a power-up into the player's rack with attack points
#[reducer]
pub fn add_available_power(ctx: &ReducerContext, kind: PowerKind) -> Result<(), String> {
    let player = get_player(ctx)?;
    let game_id = player.in_game_id.ok_or("Not in a game".to_string())?;
    match ctx.db.game().id().find(&game_id) {
        Some(g) if g.state == GameState::Active => {}
        _ => return Err("No active game".to_string()),
    }

    let mut gp =
        find_game_player(ctx, &player.id, game_id).ok_or("No seat in this game".to_string())?;
    let cost = kind.cost();
    if gp.attack_points < cost {
        return Err(format!(
            "Need {} attack points for {} (have {})",
            cost,
            kind.label(),
            gp.attack_points
        ));
    }
    gp.attack_points -= cost;
    gp.available_powers.push(kind);
    update_game_player(ctx, gp);

    log::info!(
        "[POWER] purchased kind:{} game:{} player:{} cost:{}",
        kind.label(),
        game_id,
        player.name,
        cost
    );
    Ok(())
}

/// Deploy a held power-up into the game. Curses need an opposing target;
/// buffs apply to the activator. A target holding a ScoreShield absorbs the
/// curse instead (both effects are consumed).
#[reducer]
pub fn activate_powerup(
    ctx: &ReducerContext,
    kind: PowerKind,
    target: Option<String>,
) -> Result<(), String> {
    let player = get_player(ctx)?;
    let game_id = player.in_game_id.ok_or("Not in a game".to_string())?;
    match ctx.db.game().id().find(&game_id) {
        Some(g) if g.state == GameState::Active => {}
        _ => return Err("No active game".to_string()),
    }

    let mut gp =
        find_game_player(ctx, &player.id, game_id).ok_or("No seat in this game".to_string())?;
    let held = gp
        .available_powers
        .iter()
        .position(|k| *k == kind)
        .ok_or(format!("{} is not in your rack", kind.label()))?;
    gp.available_powers.remove(held);

    let category = kind.category();
    let target = match category {
        PowerCategory::Curse => {
            let target_id = target.ok_or("Curses need a target".to_string())?;
            if target_id == player.id {
                return Err("Cannot curse yourself".to_string());
            }
            let victim = find_game_player(ctx, &target_id, game_id)
                .ok_or("Target is not in this game".to_string())?;

            // Shield check before anything lands
            let shield = ctx
                .db
                .active_powerup()
                .game_id()
                .filter(&game_id)
                .find(|p| p.kind == PowerKind::ScoreShield && p.activated_by == target_id);
            if let Some(shield) = shield {
                cancel_powerup_ticks(ctx, shield.id);
                ctx.db.active_powerup().id().delete(&shield.id);
                update_game_player(ctx, gp);
                log::info!(
                    "[POWER] blocked kind:{} game:{} by:{} shield_of:{}",
                    kind.label(),
                    game_id,
                    player.name,
                    victim.player_name
                );
                return Ok(());
            }
            Some(target_id)
        }
        PowerCategory::Buff => None,
    };

    update_game_player(ctx, gp);

    let powerup = ctx.db.active_powerup().insert(ActivePowerup {
        id: 0, // auto_inc
        game_id,
        kind,
        category,
        cost: kind.cost(),
        duration_secs: kind.duration_secs(),
        time_left_secs: kind.duration_secs(),
        activated_by: player.id.clone(),
        target: target.clone(),
    });

    ctx.db.powerup_tick_schedule().insert(PowerupTickSchedule {
        id: 0, // auto_inc
        powerup_id: powerup.id,
        scheduled_at: ScheduleAt::Interval(std::time::Duration::from_secs(1).into()),
    });

    log::info!(
        "[POWER] activated id:{} kind:{} game:{} by:{} target:{:?} duration:{}s",
        powerup.id,
        kind.label(),
        game_id,
        player.name,
        target,
        powerup.duration_secs
    );
    Ok(())
}

/// Cancel one of your own deployed power-ups before it runs out
#[reducer]
pub fn deactivate_powerup(ctx: &ReducerContext, powerup_id: u64) -> Result<(), String> {
    let player = get_player(ctx)?;
    let powerup = ctx
        .db
        .active_powerup()
        .id()
        .find(&powerup_id)
        .ok_or("Power-up not found".to_string())?;
    if powerup.activated_by != player.id {
        return Err("Not your power-up".to_string());
    }

    cancel_powerup_ticks(ctx, powerup_id);
    ctx.db.active_powerup().id().delete(&powerup_id);
    log::info!(
        "[POWER] deactivated id:{} kind:{} by:{}",
        powerup_id,
        powerup.kind.label(),
        player.name
    );
    Ok(())
}

/// Per-second countdown for one deployed power-up (scheduled reducer)
#[reducer]
pub fn powerup_tick(ctx: &ReducerContext, schedule: PowerupTickSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call powerup_tick", ctx.sender);
        ctx.db.powerup_tick_schedule().id().delete(&schedule.id);
        return;
    }

    let mut powerup = match ctx.db.active_powerup().id().find(&schedule.powerup_id) {
        Some(p) => p,
        None => {
            // Effect already removed; stop the tick
            ctx.db.powerup_tick_schedule().id().delete(&schedule.id);
            return;
        }
    };

    // Effects only burn down while the game runs
    match ctx.db.game().id().find(&powerup.game_id) {
        Some(g) if g.state == GameState::Active => {}
        _ => {
            ctx.db.powerup_tick_schedule().id().delete(&schedule.id);
            ctx.db.active_powerup().id().delete(&powerup.id);
            return;
        }
    }

    powerup.time_left_secs = powerup.time_left_secs.saturating_sub(1);
    if powerup.time_left_secs == 0 {
        log::debug!("[POWER] expired id:{} kind:{}", powerup.id, powerup.kind.label());
        ctx.db.powerup_tick_schedule().id().delete(&schedule.id);
        ctx.db.active_powerup().id().delete(&powerup.id);
    } else {
        ctx.db.active_powerup().id().update(powerup);
    }
}

// ==================== SCHEDULED REDUCERS ====================

/// Match timeout landed (scheduled reducer). Claims reschedule the timeout
/// as they stretch the clock, so a row firing early is just stale.
#[reducer]
pub fn check_game_timeout(ctx: &ReducerContext, schedule: GameTimeoutSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call check_game_timeout", ctx.sender);
        ctx.db.game_timeout_schedule().id().delete(&schedule.id);
        return;
    }

    if let Some(game) = ctx.db.game().id().find(&schedule.game_id) {
        if game.state == GameState::Active
            && ctx.timestamp.to_micros_since_unix_epoch()
                >= game.end_at.to_micros_since_unix_epoch()
        {
            end_game_internal(ctx, schedule.game_id, "timeout");
        }
    }

    // Clean up schedule row after handling event
    ctx.db.game_timeout_schedule().id().delete(&schedule.id);
}

/// Periodic pruning sweep (scheduled reducer, every 30 seconds).
///
/// Handles everything with a retention window: dead games, stale
/// challenges, old chat, silent players, and the generation queue. Also
/// tops the puzzle pool back up. All best-effort - racing normal gameplay
/// is harmless because every removal is idempotent.
#[reducer]
pub fn cleanup_sweep(ctx: &ReducerContext, _schedule: CleanupSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call cleanup_sweep", ctx.sender);
        return;
    }

    let now = ctx.timestamp;

    // -------------------- Games --------------------
    let games: Vec<_> = ctx.db.game().iter().collect();
    for game in games {
        let age_secs = secs_between(game.created_at, now);
        let should_prune = match game.state {
            // Finished games hang around for the results screen
            GameState::Ended => secs_between(game.end_at, now) > ENDED_GAME_GRACE_SECS,
            // Anything else dies at the retention window
            _ => age_secs > GAME_RETENTION_SECS,
        };
        // Empty matchmaking lobbies don't get the full 24 hours
        let abandoned_lobby = game.state == GameState::Matchmaking
            && count_active_players(ctx, game.id) == 0
            && age_secs > ENDED_GAME_GRACE_SECS;

        if should_prune || abandoned_lobby {
            let player_count = ctx.db.game_player().game_id().filter(&game.id).count();
            log::info!(
                "[PRUNE] game id={} state={:?} age_sec={} players={} claimed={}",
                game.id,
                game.state,
                age_secs,
                player_count,
                game.words_claimed
            );
            cleanup_game_data(ctx, game.id);
        }
    }

    // -------------------- Challenges --------------------
    let stale_challenges: Vec<_> = ctx
        .db
        .challenge()
        .iter()
        .filter(|c| secs_between(c.created_at, now) > CHALLENGE_TTL_SECS)
        .map(|c| c.id)
        .collect();
    for id in &stale_challenges {
        ctx.db.challenge().id().delete(id);
    }
    if !stale_challenges.is_empty() {
        log::debug!("[PRUNE] challenges removed:{}", stale_challenges.len());
    }

    // -------------------- Lobby chat --------------------
    let old_messages: Vec<_> = ctx
        .db
        .lobby_message()
        .iter()
        .filter(|m| secs_between(m.sent_at, now) > LOBBY_MESSAGE_RETENTION_SECS)
        .map(|m| m.id)
        .collect();
    for id in old_messages {
        ctx.db.lobby_message().id().delete(&id);
    }

    // -------------------- Presence --------------------
    let silent: Vec<_> = ctx
        .db
        .player()
        .iter()
        .filter(|p| {
            p.phase != PlayerPhase::Offline
                && secs_between(p.last_seen, now) > PRESENCE_TIMEOUT_SECS
        })
        .collect();
    for mut player in silent {
        player.phase = PlayerPhase::Offline;
        ctx.db.player().id().update(player);
    }

    // -------------------- Generation queue --------------------
    for req in ctx.db.puzzle_request_queue().iter() {
        if req.fulfilled {
            if secs_between(req.requested_at, now) > REQUEST_RETENTION_SECS {
                ctx.db.puzzle_request_queue().id().delete(&req.id);
            }
        } else if req.attempts >= ingest::MAX_GENERATION_ATTEMPTS {
            // Dead letter - log with full context for replay, then delete
            log::error!(
                "[PUZZLE] dead_letter request:{} dims:{}x{} attempts:{} error:{}",
                req.id,
                req.width,
                req.height,
                req.attempts,
                req.last_error.as_deref().unwrap_or("none")
            );
            ctx.db.puzzle_request_queue().id().delete(&req.id);
        }
    }

    // -------------------- Puzzle pool --------------------
    // Keep enough never-dealt boards banked that starts don't stall
    let unused_boards = ctx
        .db
        .puzzle()
        .iter()
        .filter(|p| ctx.db.puzzle_seen().puzzle_id().filter(&p.id).next().is_none())
        .count();
    let open_requests = ctx
        .db
        .puzzle_request_queue()
        .fulfilled()
        .filter(&false)
        .count();
    if unused_boards < PUZZLE_POOL_LOW_WATER && open_requests == 0 {
        let req = ctx.db.puzzle_request_queue().insert(PuzzleRequestQueue {
            id: 0, // auto_inc
            width: DEFAULT_BOARD_DIM,
            height: DEFAULT_BOARD_DIM,
            theme: None,
            requested_at: now,
            fulfilled: false,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
        });
        log::info!(
            "[PUZZLE] requested generation request:{} pool:{}/{}",
            req.id,
            unused_boards,
            PUZZLE_POOL_LOW_WATER
        );
    }
}

// ==================== ADMIN REDUCERS ====================

/// Admin: remove a game and all its satellite rows immediately
#[reducer]
pub fn admin_remove_game(ctx: &ReducerContext, game_id: u64) {
    // Authorization check: only authorized workers (admin panel with owner token)
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        panic!("Unauthorized: only admin can remove games");
    }
    if ctx.db.game().id().find(&game_id).is_none() {
        log::error!("admin_remove_game: Game {} not found", game_id);
        return;
    }
    cleanup_game_data(ctx, game_id);
    log::info!("[ADMIN] removed game:{}", game_id);
}

// ==================== INIT ====================

#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // Add module owner to authorized workers for RLS and reducer access control
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    // Schedule the pruning sweep every 30 seconds
    // Check if scheduler already exists to avoid duplicates on hot-reload
    if ctx.db.cleanup_schedule().iter().count() == 0 {
        ctx.db.cleanup_schedule().insert(CleanupSchedule {
            id: 0, // auto_inc
            scheduled_at: ScheduleAt::Interval(std::time::Duration::from_secs(30).into()),
        });
    }

    log::info!("Word grid module initialized successfully");
}

// ==================== LIFECYCLE HELPERS ====================

/// Seat a player at a game table
fn insert_game_player(ctx: &ReducerContext, game_id: u64, player: &Player, is_leader: bool) {
    ctx.db.game_player().insert(GamePlayer {
        id: 0, // auto_inc
        game_id,
        player_id: player.id.clone(),
        player_name: player.name.clone(),
        score: 0,
        attack_points: 0,
        words_found: 0,
        found_opponent_words: Vec::new(),
        touched_cells: Vec::new(),
        available_powers: Vec::new(),
        is_ready: is_leader, // the leader made the table, they're ready
        is_active: true,
        is_leader,
    });
}

/// Free a matchmaking seat; moves the crown if the leader walks and deletes
/// the table when the last seat empties
fn remove_player_from_game(ctx: &ReducerContext, player_id: &str, game_id: u64) {
    let was_leader = find_game_player(ctx, player_id, game_id)
        .map(|gp| gp.is_leader)
        .unwrap_or(false);

    if let Some(gp) = find_game_player(ctx, player_id, game_id) {
        ctx.db.game_player().id().delete(&gp.id);
    }

    let remaining: Vec<_> = ctx.db.game_player().game_id().filter(&game_id).collect();
    if remaining.is_empty() {
        cancel_countdown_schedule(ctx, game_id);
        ctx.db.game().id().delete(&game_id);
        log::info!("[GAME] dissolved game:{} (last player left)", game_id);
        return;
    }

    if was_leader {
        if let Some(mut new_leader) = remaining.into_iter().find(|gp| gp.is_active) {
            let new_leader_id = new_leader.player_id.clone();
            new_leader.is_leader = true;
            update_game_player(ctx, new_leader);
            log::info!(
                "[GAME] leadership transferred game:{} to:{}",
                game_id,
                &new_leader_id[..8.min(new_leader_id.len())]
            );
        }
    }
}

/// Deal a board the given players haven't played, preferring the requested
/// theme. Falls back to any board rather than refusing to deal.
fn pick_unseen_puzzle(
    ctx: &ReducerContext,
    player_ids: &[&str],
    theme: Option<&str>,
) -> Option<Puzzle> {
    let seen_by_any = |puzzle_id: u64| {
        player_ids.iter().any(|pid| {
            ctx.db
                .puzzle_seen()
                .player_id()
                .filter(&pid.to_string())
                .any(|ps| ps.puzzle_id == puzzle_id)
        })
    };

    let matches_theme = |p: &Puzzle| theme.is_none() || p.theme.as_deref() == theme;

    let mut candidates: Vec<Puzzle> = ctx
        .db
        .puzzle()
        .iter()
        .filter(|p| matches_theme(p) && !seen_by_any(p.id))
        .collect();
    if candidates.is_empty() {
        // Everyone has seen everything; repeat a board over refusing to play
        candidates = ctx.db.puzzle().iter().filter(|p| matches_theme(p)).collect();
    }
    if candidates.is_empty() && theme.is_some() {
        candidates = ctx.db.puzzle().iter().collect();
    }
    if candidates.is_empty() {
        return None;
    }

    let pick = ctx.rng().gen_range(0..candidates.len());
    Some(candidates.swap_remove(pick))
}

/// Record that a player has been dealt a board (idempotent)
fn mark_puzzle_seen(ctx: &ReducerContext, player_id: &str, puzzle_id: u64) {
    let already = ctx
        .db
        .puzzle_seen()
        .player_id()
        .filter(&player_id.to_string())
        .any(|ps| ps.puzzle_id == puzzle_id);
    if !already {
        ctx.db.puzzle_seen().insert(PuzzleSeen {
            id: 0, // auto_inc
            player_id: player_id.to_string(),
            puzzle_id,
            seen_at: ctx.timestamp,
        });
    }
}

/// Seed the found-word ledger: every puzzle word starts unclaimed
fn seed_found_words(ctx: &ReducerContext, game_id: u64, puzzle: &Puzzle) {
    for word in &puzzle.words {
        ctx.db.found_word().insert(FoundWord {
            id: 0, // auto_inc
            game_id,
            word: word.clone(),
            special: puzzle.special_words.contains(word),
            claimed_by: None,
            claimed_at: None,
        });
    }
}

/// Transition a game to Active: stamp the clock, seed the ledger, schedule
/// the timeout, and flip everyone to Playing
fn activate_game(ctx: &ReducerContext, game_id: u64) {
    let mut game = match ctx.db.game().id().find(&game_id) {
        Some(g) => g,
        None => {
            log::error!("activate_game: Game {} not found", game_id);
            return;
        }
    };
    let puzzle = match ctx.db.puzzle().id().find(&game.puzzle_id) {
        Some(p) => p,
        None => {
            log::error!("activate_game: Puzzle {} missing for game {}", game.puzzle_id, game_id);
            return;
        }
    };

    game.state = GameState::Active;
    game.started_at = ctx.timestamp;
    game.countdown_started_at = None;
    game.end_at = compute_end_at(ctx.timestamp, game.time_limit_secs, game.word_bonus_secs, 0);
    let end_at = game.end_at;
    let time_limit = game.time_limit_secs;
    let is_solo = game.is_solo;
    ctx.db.game().id().update(game);

    seed_found_words(ctx, game_id, &puzzle);

    ctx.db.game_timeout_schedule().insert(GameTimeoutSchedule {
        id: 0, // auto_inc
        game_id,
        scheduled_at: ScheduleAt::Time(end_at.into()),
    });

    let seated: Vec<_> = ctx
        .db
        .game_player()
        .game_id()
        .filter(&game_id)
        .filter(|gp| gp.is_active)
        .collect();
    for gp in &seated {
        mark_puzzle_seen(ctx, &gp.player_id, puzzle.id);
        if let Some(mut player) = ctx.db.player().id().find(&gp.player_id) {
            player.phase = PlayerPhase::Playing;
            ctx.db.player().id().update(player);
        }
    }

    let names: Vec<&str> = seated.iter().map(|gp| gp.player_name.as_str()).collect();
    log::info!(
        "[GAME] started game_id={} puzzle={} words={} limit_sec={} solo={} players={:?}",
        game_id,
        puzzle.id,
        puzzle.words.len(),
        time_limit,
        is_solo,
        names
    );
}

/// Terminal transition: stamp the outcome, settle aggregates, stop timers.
/// Safe to call twice - the Ended guard makes duplicates no-ops.
fn end_game_internal(ctx: &ReducerContext, game_id: u64, reason: &str) {
    cancel_game_timeout(ctx, game_id);
    cancel_countdown_schedule(ctx, game_id);
    clear_game_powerups(ctx, game_id);

    let mut game = match ctx.db.game().id().find(&game_id) {
        Some(g) => g,
        None => {
            log::warn!("end_game_internal: Game {} not found", game_id);
            return;
        }
    };
    if game.state == GameState::Ended {
        log::warn!("end_game_internal: Game {} already ended, ignoring duplicate call", game_id);
        return;
    }

    // State flips first so a racing duplicate call hits the guard above
    game.state = GameState::Ended;
    let duration = secs_between(game.started_at, ctx.timestamp).max(1) as u32;
    game.duration_secs = Some(duration);
    game.end_at = ctx.timestamp;

    let participants: Vec<_> = ctx.db.game_player().game_id().filter(&game_id).collect();
    game.winner = participants
        .iter()
        .max_by_key(|gp| gp.score)
        .filter(|gp| gp.score > 0)
        .map(|gp| gp.player_id.clone());

    let words_claimed = game.words_claimed;
    let is_solo = game.is_solo;
    let winner = game.winner.clone();
    ctx.db.game().id().update(game);

    // Settle lifetime aggregates for everyone who played
    for gp in &participants {
        if let Some(mut player) = ctx.db.player().id().find(&gp.player_id) {
            player.total_games = player.total_games.saturating_add(1);
            player.total_words = player.total_words.saturating_add(gp.words_found);
            player.total_score = player.total_score.saturating_add(gp.score);
            if player.phase == PlayerPhase::Playing {
                player.phase = PlayerPhase::Lobby;
            }
            ctx.db.player().id().update(player);
        }
    }

    let top_score = participants.iter().map(|gp| gp.score).max().unwrap_or(0);
    let names: Vec<&str> = participants.iter().map(|gp| gp.player_name.as_str()).collect();

    // Wide event: one canonical log for the match outcome
    log::info!(
        "[GAME] ended game_id={} reason={} duration_sec={} players={} names={:?} solo={} words_claimed={} top_score={} winner={:?}",
        game_id,
        reason,
        duration,
        participants.len(),
        names,
        is_solo,
        words_claimed,
        top_score,
        winner
    );
}

/// Delete a game and every satellite row, clearing player references first
/// so a reconnect mid-cleanup can't resurrect a dangling id
fn cleanup_game_data(ctx: &ReducerContext, game_id: u64) {
    cancel_game_timeout(ctx, game_id);
    cancel_countdown_schedule(ctx, game_id);
    clear_game_powerups(ctx, game_id);

    let game_players: Vec<_> = ctx.db.game_player().game_id().filter(&game_id).collect();
    for gp in &game_players {
        if let Some(mut player) = ctx.db.player().id().find(&gp.player_id) {
            if player.in_game_id == Some(game_id) {
                player.in_game_id = None;
                ctx.db.player().id().update(player);
            }
        }
    }

    let ledger: Vec<_> = ctx.db.found_word().game_id().filter(&game_id).collect();
    for entry in ledger {
        ctx.db.found_word().id().delete(&entry.id);
    }

    for gp in game_players {
        ctx.db.game_player().id().delete(&gp.id);
    }

    ctx.db.game().id().delete(&game_id);
}

// ==================== TESTS ====================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_word_value_monotonic_through_seven() {
        let mut last = 0;
        for len in 3..=7 {
            let value = word_value(len, false);
            assert!(value > last, "value for length {} must exceed length {}", len, len - 1);
            last = value;
        }
    }

    #[test]
    fn test_word_value_long_word_bucket() {
        // 8 and anything longer land in the same bucket
        let bucket = word_value(8, false);
        assert_eq!(word_value(9, false), bucket);
        assert_eq!(word_value(10, false), bucket);
        assert_eq!(word_value(15, false), bucket);
        assert!(bucket > word_value(7, false));
    }

    #[test]
    fn test_word_value_special_doubles() {
        for len in 3..=10 {
            assert_eq!(word_value(len, true), word_value(len, false) * 2);
        }
    }

    #[test]
    fn test_word_value_short_words_worthless() {
        assert_eq!(word_value(0, false), 0);
        assert_eq!(word_value(1, false), 0);
        assert_eq!(word_value(2, true), 0);
    }

    #[test]
    fn test_claim_slot_exactly_one_winner() {
        // Reducer transactions serialize racing submitters; whatever the
        // arrival order, exactly one claim may win and the rest must lose
        let mut slot: Option<String> = None;
        let mut winners = 0;
        for player in ["alice", "bob", "carol", "dave", "erin"] {
            if claim_slot(&mut slot, player) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(slot.as_deref(), Some("alice"));
    }

    #[test]
    fn test_claim_slot_winner_is_immutable() {
        let mut slot: Option<String> = None;
        assert!(claim_slot(&mut slot, "alice"));
        for _ in 0..3 {
            assert!(!claim_slot(&mut slot, "bob"));
            assert_eq!(slot.as_deref(), Some("alice"));
        }
    }

    #[test]
    fn test_redeem_bypasses_claim_uniqueness() {
        // Two players redeem the same word: both get credit, neither blocks
        // the other, and re-redeeming never double-credits
        let mut alice_ledger: Vec<String> = Vec::new();
        let mut bob_ledger: Vec<String> = Vec::new();

        assert!(add_unique(&mut alice_ledger, "CAT"));
        assert!(add_unique(&mut bob_ledger, "CAT"));
        assert!(!add_unique(&mut alice_ledger, "CAT"));

        assert_eq!(alice_ledger, vec!["CAT"]);
        assert_eq!(bob_ledger, vec!["CAT"]);
    }

    #[test]
    fn test_compute_end_at_idempotent_and_monotonic() {
        let start = Timestamp::from_micros_since_unix_epoch(1_000_000);
        // Same claim count in, same instant out - replays are harmless
        assert_eq!(
            compute_end_at(start, 180, 5, 3).to_micros_since_unix_epoch(),
            compute_end_at(start, 180, 5, 3).to_micros_since_unix_epoch()
        );
        // Each claim stretches the clock, never shrinks it
        let mut last = compute_end_at(start, 180, 5, 0);
        for claimed in 1..10 {
            let next = compute_end_at(start, 180, 5, claimed);
            assert!(next.to_micros_since_unix_epoch() > last.to_micros_since_unix_epoch());
            last = next;
        }
        // Exact arithmetic: base + bonus * claims
        assert_eq!(
            compute_end_at(start, 180, 5, 2).to_micros_since_unix_epoch(),
            1_000_000 + (180 + 10) * 1_000_000
        );
    }

    #[test]
    fn test_claim_scenario_over_seeded_ledger() {
        // Solo-game shape: ledger seeded all-unclaimed, first claim wins and
        // scores, repeat claim reports duplicate with no score change
        let mut ledger: HashMap<&str, Option<String>> =
            [("CAT", None), ("DOG", None), ("CATDOG", None)].into();
        let mut score = 0u32;

        let slot = ledger.get_mut("CAT").unwrap();
        assert!(claim_slot(slot, "p1"));
        score += word_value("CAT".len(), false);
        assert_eq!(ledger["CAT"].as_deref(), Some("p1"));
        assert_eq!(score, word_value(3, false));

        let slot = ledger.get_mut("CAT").unwrap();
        assert!(!claim_slot(slot, "p1"));
        assert_eq!(score, word_value(3, false));
        assert_eq!(ledger["DOG"], None);
        assert_eq!(ledger["CATDOG"], None);
    }

    #[test]
    fn test_power_catalog_sane() {
        let kinds = [
            PowerKind::WordHint,
            PowerKind::ScoreShield,
            PowerKind::TimeFreeze,
            PowerKind::InkSplat,
            PowerKind::GridSpin,
            PowerKind::LetterShuffle,
        ];
        for kind in kinds {
            assert!(kind.cost() > 0);
            assert!(kind.duration_secs() > 0);
            assert!(!kind.label().is_empty());
        }
        assert_eq!(PowerKind::InkSplat.category(), PowerCategory::Curse);
        assert_eq!(PowerKind::ScoreShield.category(), PowerCategory::Buff);
    }
}

// Puzzle ingestion reducers for the board-generation worker.
// The module cannot call the generation service itself, so it queues requests
// (puzzle_request_queue) and an authorized worker posts the HTTP response
// back through seed_puzzle in the service's own JSON shape.

use spacetimedb::{reducer, ReducerContext, Table};

use crate::board;
use crate::{authorized_worker, puzzle, puzzle_request_queue};
use crate::{Puzzle, MIN_WORD_LEN};
use chrono::DateTime;
use serde_json::Value;

/// Maximum delivery attempts before a generation request is dead-lettered
pub const MAX_GENERATION_ATTEMPTS: u8 = 5;

/// Parsed form of a /generateBoggle response, before it becomes a Puzzle row
#[derive(Debug)]
pub struct PuzzleDraft {
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<String>,
    pub words: Vec<String>,
    pub special_words: Vec<String>,
    pub theme: Option<String>,
    pub average_word_length: f32,
    pub common_word_amount: u32,
    pub date_created: String,
    pub substitution_key: Option<String>,
    pub source_attempts: u32,
}

/// Render the generator's dateCreated field as YYYY-MM-DD.
/// The service has shipped both epoch milliseconds and ISO strings.
fn parse_date_created(val: Option<&Value>) -> String {
    match val {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Some(Value::String(s)) => s.chars().take(10).collect(),
        _ => String::new(),
    }
}

/// Flatten the matrix (array of row arrays) into row-major tiles.
/// Rows must be non-empty and rectangular.
fn parse_matrix(val: &Value) -> Result<(u32, u32, Vec<String>), String> {
    let rows = val.as_array().ok_or("matrix: expected array of rows")?;
    if rows.is_empty() {
        return Err("matrix: no rows".to_string());
    }
    let mut tiles = Vec::new();
    let mut width = 0usize;
    for (r, row) in rows.iter().enumerate() {
        let cells = row
            .as_array()
            .ok_or(format!("matrix row {}: expected array", r))?;
        if r == 0 {
            width = cells.len();
        } else if cells.len() != width {
            return Err(format!("matrix row {}: ragged width", r));
        }
        for cell in cells {
            let tile = cell
                .as_str()
                .ok_or(format!("matrix row {}: non-string tile", r))?;
            if tile.is_empty() {
                return Err(format!("matrix row {}: empty tile", r));
            }
            tiles.push(tile.to_uppercase());
        }
    }
    if width == 0 {
        return Err("matrix: empty rows".to_string());
    }
    Ok((width as u32, rows.len() as u32, tiles))
}

/// wordList arrives either as a plain array of words (generateBoggle) or as
/// a word -> path object (solveBoggle). Both collapse to the word set.
fn parse_word_list(val: &Value) -> Result<Vec<String>, String> {
    let mut words: Vec<String> = match val {
        Value::Array(items) => items
            .iter()
            .map(|w| {
                w.as_str()
                    .map(|s| s.to_uppercase())
                    .ok_or("wordList: non-string entry".to_string())
            })
            .collect::<Result<_, _>>()?,
        Value::Object(map) => map.keys().map(|w| w.to_uppercase()).collect(),
        _ => return Err("wordList: expected array or object".to_string()),
    };
    words.retain(|w| w.len() >= MIN_WORD_LEN);
    words.sort();
    words.dedup();
    if words.is_empty() {
        return Err("wordList: no usable words".to_string());
    }
    Ok(words)
}

/// Parse the full generator response envelope into a PuzzleDraft.
/// Matrices shipped with a substitution key are decoded here; the key is
/// retained as metadata so archived boards can be re-encoded.
pub fn parse_generator_response(json: &str) -> Result<PuzzleDraft, String> {
    let envelope: Value =
        serde_json::from_str(json).map_err(|e| format!("Invalid JSON: {}", e))?;

    let success = envelope
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !success {
        let message = envelope
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("no message");
        return Err(format!("Generator reported failure: {}", message));
    }

    let data = envelope.get("data").ok_or("Missing data field")?;
    let (width, height, mut tiles) =
        parse_matrix(data.get("matrix").ok_or("Missing matrix")?)?;
    let words = parse_word_list(data.get("wordList").ok_or("Missing wordList")?)?;

    let metadata = data.get("metadata");
    let substitution_key = metadata
        .and_then(|m| m.get("substitutionKey"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase());
    if let Some(key) = &substitution_key {
        tiles = board::decode_matrix(&tiles, key)?;
    }

    let customizations = data.get("customizations");
    let theme = customizations
        .and_then(|c| c.get("theme"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let special_words: Vec<String> = customizations
        .and_then(|c| c.get("specialWords"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|w| w.as_str())
                .map(|s| s.to_uppercase())
                .collect()
        })
        .unwrap_or_default();

    Ok(PuzzleDraft {
        width,
        height,
        tiles,
        words,
        special_words,
        theme,
        average_word_length: metadata
            .and_then(|m| m.get("averageWordLength"))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as f32,
        common_word_amount: metadata
            .and_then(|m| m.get("commonWordAmount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        date_created: parse_date_created(metadata.and_then(|m| m.get("dateCreated"))),
        substitution_key,
        source_attempts: data
            .get("attempts")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    })
}

/// Store a generated board posted by the generation worker.
/// Accepts the /generateBoggle response verbatim; rejects failed generations.
#[reducer]
pub fn seed_puzzle(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can seed puzzles
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized seed_puzzle attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let draft = parse_generator_response(&json_data)?;

    let inserted = ctx.db.puzzle().insert(Puzzle {
        id: 0, // auto_inc
        width: draft.width,
        height: draft.height,
        tiles: draft.tiles,
        words: draft.words,
        special_words: draft.special_words,
        theme: draft.theme,
        average_word_length: draft.average_word_length,
        common_word_amount: draft.common_word_amount,
        date_created: draft.date_created,
        substitution_key: draft.substitution_key,
        source_attempts: draft.source_attempts,
        created_at: ctx.timestamp,
    });

    // Settle the oldest matching open request, if any
    let open_request = ctx
        .db
        .puzzle_request_queue()
        .fulfilled()
        .filter(&false)
        .filter(|req| req.width == inserted.width && req.height == inserted.height)
        .min_by_key(|req| req.requested_at.to_micros_since_unix_epoch());
    if let Some(mut req) = open_request {
        req.fulfilled = true;
        let req_id = req.id;
        ctx.db.puzzle_request_queue().id().update(req);
        log::info!(
            "[PUZZLE] seeded puzzle:{} dims:{}x{} words:{} request:{}",
            inserted.id,
            inserted.width,
            inserted.height,
            inserted.words.len(),
            req_id
        );
    } else {
        log::info!(
            "[PUZZLE] seeded puzzle:{} dims:{}x{} words:{} request:none",
            inserted.id,
            inserted.width,
            inserted.height,
            inserted.words.len()
        );
    }

    Ok(())
}

/// Record a failed generation attempt so the worker retries with backoff.
/// Requests past MAX_GENERATION_ATTEMPTS are dead-lettered by the sweep.
#[reducer]
pub fn mark_puzzle_request_failed(
    ctx: &ReducerContext,
    request_id: u64,
    error: String,
) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized mark_puzzle_request_failed attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let mut req = ctx
        .db
        .puzzle_request_queue()
        .id()
        .find(&request_id)
        .ok_or(format!("Request {} not found", request_id))?;

    req.attempts = req.attempts.saturating_add(1);
    // Linear backoff: one extra minute per failed attempt
    let backoff_secs = 60u64 * req.attempts as u64;
    req.next_retry_at = Some(ctx.timestamp + std::time::Duration::from_secs(backoff_secs));
    req.last_error = Some(error.clone());
    let attempts = req.attempts;
    ctx.db.puzzle_request_queue().id().update(req);

    log::warn!(
        "[PUZZLE] generation failed request:{} attempts:{} error:{}",
        request_id,
        attempts,
        error
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> String {
        serde_json::json!({
            "success": true,
            "message": "generated",
            "data": {
                "matrix": [["C", "A", "T"], ["QU", "D", "O"], ["Y", "Z", "G"]],
                "wordList": ["CAT", "DOG", "CATDOG", "at"],
                "attempts": 3,
                "metadata": {
                    "averageWordLength": 4.2,
                    "dateCreated": 1754438400000i64,
                    "commonWordAmount": 2
                },
                "customizations": {
                    "theme": "pets",
                    "specialWords": ["catdog"]
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_generator_response() {
        let draft = parse_generator_response(&sample_response()).unwrap();
        assert_eq!(draft.width, 3);
        assert_eq!(draft.height, 3);
        assert_eq!(draft.tiles[3], "QU");
        // "at" dropped (below minimum length), rest uppercased and sorted
        assert_eq!(draft.words, vec!["CAT", "CATDOG", "DOG"]);
        assert_eq!(draft.special_words, vec!["CATDOG"]);
        assert_eq!(draft.theme.as_deref(), Some("pets"));
        assert_eq!(draft.common_word_amount, 2);
        assert_eq!(draft.source_attempts, 3);
        assert_eq!(draft.date_created, "2025-08-06");
        assert!(draft.substitution_key.is_none());
    }

    #[test]
    fn test_parse_rejects_generator_failure() {
        let json = r#"{"success": false, "message": "no board met filters"}"#;
        let err = parse_generator_response(json).unwrap_err();
        assert!(err.contains("no board met filters"));
    }

    #[test]
    fn test_parse_rejects_ragged_matrix() {
        let json = serde_json::json!({
            "success": true,
            "data": {
                "matrix": [["A", "B"], ["C"]],
                "wordList": ["CAB"]
            }
        })
        .to_string();
        assert!(parse_generator_response(&json).unwrap_err().contains("ragged"));
    }

    #[test]
    fn test_parse_decodes_substitution_key() {
        // Atbash-encoded CAT row: C->X, A->Z, T->G
        let json = serde_json::json!({
            "success": true,
            "data": {
                "matrix": [["X", "Z", "G"]],
                "wordList": ["CAT"],
                "metadata": {
                    "substitutionKey": "ZYXWVUTSRQPONMLKJIHGFEDCBA"
                }
            }
        })
        .to_string();
        let draft = parse_generator_response(&json).unwrap();
        assert_eq!(draft.tiles, vec!["C", "A", "T"]);
        assert_eq!(draft.substitution_key.as_deref(), Some("ZYXWVUTSRQPONMLKJIHGFEDCBA"));
    }

    #[test]
    fn test_parse_accepts_solver_word_map() {
        let json = serde_json::json!({
            "success": true,
            "data": {
                "matrix": [["C", "A", "T"]],
                "wordList": {"CAT": [0, 1, 2], "ACT": [1, 0, 2]}
            }
        })
        .to_string();
        let draft = parse_generator_response(&json).unwrap();
        assert_eq!(draft.words, vec!["ACT", "CAT"]);
    }
}

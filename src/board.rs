// Letter-grid logic: tile adjacency, word traceability, matrix obfuscation.
// Everything here is pure so both reducers and tests can use it directly.

/// Uppercase a submitted word and strip surrounding whitespace.
/// All grid tiles and solution words are stored uppercase.
pub fn normalize_word(word: &str) -> String {
    word.trim().to_uppercase()
}

/// Indices of the up-to-8 neighbors of `idx` in a row-major grid.
pub fn neighbor_indices(idx: usize, width: usize, height: usize) -> Vec<usize> {
    let col = (idx % width) as i64;
    let row = (idx / width) as i64;
    let mut out = Vec::with_capacity(8);
    for dr in -1i64..=1 {
        for dc in -1i64..=1 {
            if dr == 0 && dc == 0 {
                continue;
            }
            let (nr, nc) = (row + dr, col + dc);
            if nr >= 0 && nc >= 0 && (nr as usize) < height && (nc as usize) < width {
                out.push(nr as usize * width + nc as usize);
            }
        }
    }
    out
}

/// Check whether `word` can be traced on the grid as a contiguous path of
/// adjacent tiles (8-directional) without visiting any cell twice.
///
/// Tiles may span multiple characters ("QU"), so the search consumes the
/// tile's full text at each step rather than a single character.
pub fn is_traceable(tiles: &[String], width: usize, height: usize, word: &str) -> bool {
    let word = normalize_word(word);
    if word.is_empty() || tiles.len() != width * height {
        return false;
    }
    let mut visited = vec![false; tiles.len()];
    for start in 0..tiles.len() {
        if trace_from(tiles, width, height, &word, start, &mut visited) {
            return true;
        }
    }
    false
}

fn trace_from(
    tiles: &[String],
    width: usize,
    height: usize,
    remaining: &str,
    idx: usize,
    visited: &mut [bool],
) -> bool {
    if visited[idx] {
        return false;
    }
    let tile = tiles[idx].to_uppercase();
    if tile.is_empty() || !remaining.starts_with(&tile) {
        return false;
    }
    let rest = &remaining[tile.len()..];
    if rest.is_empty() {
        return true;
    }
    visited[idx] = true;
    for next in neighbor_indices(idx, width, height) {
        if trace_from(tiles, width, height, rest, next, visited) {
            visited[idx] = false;
            return true;
        }
    }
    visited[idx] = false;
    false
}

// -------------------- Substitution-key matrix codec --------------------
// Archived puzzles are stored with their letters run through a 26-letter
// substitution key so the raw board text is not trivially greppable. The
// generator ships the key alongside the encoded matrix; decoding with the
// same key must reproduce the original matrix exactly, multi-char tiles
// included.

const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Validate a substitution key: exactly the 26 uppercase letters, each once.
pub fn is_valid_substitution_key(key: &str) -> bool {
    if key.len() != 26 {
        return false;
    }
    let mut seen = [false; 26];
    for c in key.chars() {
        match c {
            'A'..='Z' => {
                let slot = (c as u8 - b'A') as usize;
                if seen[slot] {
                    return false;
                }
                seen[slot] = true;
            }
            _ => return false,
        }
    }
    true
}

fn map_tile(tile: &str, table: &[char; 26]) -> String {
    tile.chars()
        .map(|c| {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() {
                table[(upper as u8 - b'A') as usize]
            } else {
                c
            }
        })
        .collect()
}

fn substitution_table(key: &str) -> [char; 26] {
    let mut table = ['A'; 26];
    for (i, c) in key.chars().enumerate() {
        table[i] = c;
    }
    table
}

fn inverse_table(key: &str) -> [char; 26] {
    let mut table = ['A'; 26];
    for (i, c) in key.chars().enumerate() {
        let slot = (c as u8 - b'A') as usize;
        table[slot] = ALPHABET.as_bytes()[i] as char;
    }
    table
}

/// Encode every tile of a matrix through the substitution key.
pub fn encode_matrix(tiles: &[String], key: &str) -> Result<Vec<String>, String> {
    if !is_valid_substitution_key(key) {
        return Err(format!("Invalid substitution key: {}", key));
    }
    let table = substitution_table(key);
    Ok(tiles.iter().map(|t| map_tile(t, &table)).collect())
}

/// Decode a matrix previously encoded with the same substitution key.
pub fn decode_matrix(tiles: &[String], key: &str) -> Result<Vec<String>, String> {
    if !is_valid_substitution_key(key) {
        return Err(format!("Invalid substitution key: {}", key));
    }
    let table = inverse_table(key);
    Ok(tiles.iter().map(|t| map_tile(t, &table)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(tiles: &[&str]) -> Vec<String> {
        tiles.iter().map(|t| t.to_string()).collect()
    }

    // Reversed alphabet: A<->Z, B<->Y, ...
    const ATBASH: &str = "ZYXWVUTSRQPONMLKJIHGFEDCBA";

    #[test]
    fn test_neighbor_indices_corners_and_center() {
        // 3x3 grid: corner has 3 neighbors, center has 8
        assert_eq!(neighbor_indices(0, 3, 3).len(), 3);
        assert_eq!(neighbor_indices(4, 3, 3).len(), 8);
        assert_eq!(neighbor_indices(8, 3, 3).len(), 3);
        // 1x3 strip: middle cell has 2
        assert_eq!(neighbor_indices(1, 3, 1).len(), 2);
    }

    #[test]
    fn test_traceable_straight_and_diagonal() {
        // C A T
        // X D O
        // Y Z G
        let tiles = grid(&["C", "A", "T", "X", "D", "O", "Y", "Z", "G"]);
        assert!(is_traceable(&tiles, 3, 3, "CAT"));
        assert!(is_traceable(&tiles, 3, 3, "cat")); // case-insensitive
        assert!(is_traceable(&tiles, 3, 3, "TOG")); // vertical
        assert!(is_traceable(&tiles, 3, 3, "CDG")); // diagonal
        assert!(!is_traceable(&tiles, 3, 3, "CTA")); // C and T not adjacent
        assert!(!is_traceable(&tiles, 3, 3, "CAG")); // A and G not adjacent
    }

    #[test]
    fn test_traceable_dog_path() {
        let tiles = grid(&["C", "A", "T", "X", "D", "O", "Y", "Z", "G"]);
        // D(4) -> O(5) -> G(8): all adjacent
        assert!(is_traceable(&tiles, 3, 3, "DOG"));
    }

    #[test]
    fn test_traceable_rejects_cell_reuse() {
        // N O
        // X X
        let tiles = grid(&["N", "O", "X", "X"]);
        assert!(is_traceable(&tiles, 2, 2, "NO"));
        assert!(is_traceable(&tiles, 2, 2, "NOX"));
        // Only one N on the board, so it cannot appear twice in a path
        assert!(!is_traceable(&tiles, 2, 2, "NON"));
    }

    #[test]
    fn test_traceable_multi_char_tile() {
        // QU I
        // C  K
        let tiles = grid(&["QU", "I", "C", "K"]);
        assert!(is_traceable(&tiles, 2, 2, "QUICK"));
        assert!(is_traceable(&tiles, 2, 2, "QUIK"));
        // "Q" alone never matches the QU tile
        assert!(!is_traceable(&tiles, 2, 2, "QIK"));
    }

    #[test]
    fn test_substitution_key_validation() {
        assert!(is_valid_substitution_key(ALPHABET));
        assert!(is_valid_substitution_key(ATBASH));
        assert!(!is_valid_substitution_key("ABC")); // too short
        assert!(!is_valid_substitution_key("AACDEFGHIJKLMNOPQRSTUVWXYZ")); // repeat
        assert!(!is_valid_substitution_key("abcdefghijklmnopqrstuvwxyz")); // lowercase
    }

    #[test]
    fn test_matrix_codec_round_trip() {
        let tiles = grid(&["QU", "I", "C", "K", "B", "R", "O", "W", "N"]);
        let encoded = encode_matrix(&tiles, ATBASH).unwrap();
        // Encoding actually changes the letters
        assert_ne!(encoded, tiles);
        assert_eq!(encoded[0], "JF"); // Q->J, U->F under atbash
        let decoded = decode_matrix(&encoded, ATBASH).unwrap();
        assert_eq!(decoded, tiles);
    }

    #[test]
    fn test_matrix_codec_identity_key() {
        let tiles = grid(&["A", "B", "QU"]);
        let encoded = encode_matrix(&tiles, ALPHABET).unwrap();
        assert_eq!(encoded, tiles);
    }

    #[test]
    fn test_matrix_codec_rejects_bad_key() {
        let tiles = grid(&["A"]);
        assert!(encode_matrix(&tiles, "NOTAKEY").is_err());
        assert!(decode_matrix(&tiles, "NOTAKEY").is_err());
    }
}

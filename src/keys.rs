use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use log::warn;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};

/// Draws one key from the configured alphabet. Not cryptographic: the key
/// only needs to be hard to guess casually and easy to read aloud.
pub fn generate_key<R: Rng + ?Sized>(rng: &mut R, alphabet: &[char], length: usize) -> String {
    (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect()
}

fn key_in_use(conn: &Connection, key: &str) -> EngineResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM response_sessions WHERE anonymous_key = ?",
            [key],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Issues a key not currently held by any stored session. Keys are stored
/// uppercase; `sessions::session_by_key` folds lookups the same way. The unique index
/// on `anonymous_key` still backs this up if two writers race.
pub fn issue_key(conn: &Connection, config: &EngineConfig) -> EngineResult<String> {
    let mut rng = rand::thread_rng();
    for attempt in 1..=config.key_max_attempts {
        let key = generate_key(&mut rng, &config.key_alphabet, config.key_length)
            .to_ascii_uppercase();
        if !key_in_use(conn, &key)? {
            return Ok(key);
        }
        warn!("anonymous key collision on attempt {}", attempt);
    }
    Err(EngineError::validation(format!(
        "could not issue a unique anonymous key after {} attempts",
        config.key_max_attempts
    )))
}

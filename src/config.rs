use anyhow::{anyhow, bail, Context};
use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};
use std::time::Duration;

pub const DEFAULT_KEY_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_KEY_LENGTH: usize = 8;
pub const CIVIL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Host-provided knobs. Everything here has a default so an empty
/// environment yields a working daemon.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub utc_offset: FixedOffset,
    pub sweep_interval: Duration,
    pub key_alphabet: Vec<char>,
    pub key_length: usize,
    pub key_max_attempts: u32,
    pub text_preview_limit: usize,
    pub fixed_now: Option<NaiveDateTime>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            sweep_interval: Duration::from_secs(60),
            key_alphabet: DEFAULT_KEY_ALPHABET.chars().collect(),
            key_length: DEFAULT_KEY_LENGTH,
            key_max_attempts: 5,
            text_preview_limit: 50,
            fixed_now: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = EngineConfig::default();
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = get("FEEDBACKD_UTC_OFFSET") {
            cfg.utc_offset = parse_utc_offset(&raw)
                .with_context(|| format!("FEEDBACKD_UTC_OFFSET={}", raw))?;
        }
        if let Some(raw) = get("FEEDBACKD_SWEEP_INTERVAL_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("FEEDBACKD_SWEEP_INTERVAL_SECS={}", raw))?;
            if secs == 0 {
                bail!("FEEDBACKD_SWEEP_INTERVAL_SECS must be at least 1");
            }
            cfg.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = get("FEEDBACKD_KEY_ALPHABET") {
            // Keys are matched case-insensitively, so the alphabet is folded
            // to uppercase before de-duplication.
            let mut chars: Vec<char> = Vec::new();
            for c in raw.chars() {
                if !c.is_ascii_alphanumeric() {
                    bail!("FEEDBACKD_KEY_ALPHABET must be ASCII alphanumeric");
                }
                let c = c.to_ascii_uppercase();
                if !chars.contains(&c) {
                    chars.push(c);
                }
            }
            if chars.len() < 2 {
                bail!("FEEDBACKD_KEY_ALPHABET needs at least 2 distinct characters ignoring case");
            }
            cfg.key_alphabet = chars;
        }
        if let Some(raw) = get("FEEDBACKD_KEY_LENGTH") {
            let n: usize = raw
                .parse()
                .with_context(|| format!("FEEDBACKD_KEY_LENGTH={}", raw))?;
            if !(4..=32).contains(&n) {
                bail!("FEEDBACKD_KEY_LENGTH must be within 4..=32");
            }
            cfg.key_length = n;
        }
        if let Some(raw) = get("FEEDBACKD_KEY_MAX_ATTEMPTS") {
            let n: u32 = raw
                .parse()
                .with_context(|| format!("FEEDBACKD_KEY_MAX_ATTEMPTS={}", raw))?;
            cfg.key_max_attempts = n.max(1);
        }
        if let Some(raw) = get("FEEDBACKD_TEXT_PREVIEW_LIMIT") {
            cfg.text_preview_limit = raw
                .parse()
                .with_context(|| format!("FEEDBACKD_TEXT_PREVIEW_LIMIT={}", raw))?;
        }
        if let Some(raw) = get("FEEDBACKD_FIXED_NOW") {
            cfg.fixed_now = Some(
                NaiveDateTime::parse_from_str(&raw, CIVIL_FORMAT)
                    .with_context(|| format!("FEEDBACKD_FIXED_NOW={}", raw))?,
            );
        }
        Ok(cfg)
    }

    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "utcOffset": format_utc_offset(self.utc_offset),
            "sweepIntervalSecs": self.sweep_interval.as_secs(),
            "keyLength": self.key_length,
            "keyAlphabetSize": self.key_alphabet.len(),
            "textPreviewLimit": self.text_preview_limit,
            "fixedNow": self.fixed_now.map(|t| t.format(CIVIL_FORMAT).to_string()),
        })
    }
}

/// Accepts `Z`, `UTC`, `+HH:MM`, `-HH:MM`, `+HHMM` and `+HH`.
pub fn parse_utc_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let t = raw.trim();
    if t.eq_ignore_ascii_case("z") || t.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    let (sign, rest) = match t.chars().next() {
        Some('+') => (1, &t[1..]),
        Some('-') => (-1, &t[1..]),
        _ => bail!("offset must start with + or -"),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("offset must be numeric");
    }
    let (hh, mm) = match digits.len() {
        2 => (digits.parse::<i32>()?, 0),
        4 => (digits[..2].parse::<i32>()?, digits[2..].parse::<i32>()?),
        _ => bail!("offset must look like +HH:MM"),
    };
    if hh > 14 || mm > 59 {
        bail!("offset out of range");
    }
    FixedOffset::east_opt(sign * (hh * 3600 + mm * 60)).ok_or_else(|| anyhow!("offset out of range"))
}

pub fn format_utc_offset(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let abs = secs.abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

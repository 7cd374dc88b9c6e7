//! Keyspace pattern compilation.
//!
//! Store-side subscriptions use Redis-style glob patterns, but only `*` is
//! honored as a wildcard: every other character, including `?` and `[`, is
//! matched literally. Patterns are compiled once, at engine startup, into
//! anchored regular expressions.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::store::DbId;

/// A pattern compiled for channel matching, routed to its database.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    /// The original pattern, passed verbatim to the store subscription.
    pub raw: String,
    /// Anchored matcher for incoming channel names.
    pub regex: Regex,
    /// Database number parsed out of `__keyspace@<N>__:`.
    pub db: DbId,
}

fn keyspace_db_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^__keyspace@(\d+)__:").expect("static regex"))
}

/// Compile a `*`-only glob into an anchored regex: escape everything, then
/// restore `*` as `.*`.
pub fn glob_regex(glob: &str) -> Result<Regex> {
    let escaped = regex::escape(glob);
    let pattern = format!("^{}$", escaped.replace(r"\*", ".*"));
    Regex::new(&pattern).map_err(|e| Error::store(format!("pattern {}: {}", glob, e)))
}

/// Split a keyspace channel into its database number and key,
/// e.g. `__keyspace@0__:PORT_TABLE:Ethernet0` into `(0, "PORT_TABLE:Ethernet0")`.
pub fn split_channel(channel: &str) -> Option<(DbId, &str)> {
    let captures = keyspace_db_regex().captures(channel)?;
    let db: DbId = captures[1].parse().ok()?;
    let key = &channel[captures[0].len()..];
    Some((db, key))
}

/// Compile a keyspace pattern and extract its database number.
pub fn compile_pattern(raw: &str) -> Result<CompiledPattern> {
    let captures = keyspace_db_regex()
        .captures(raw)
        .ok_or_else(|| Error::store(format!("no db number in pattern {}", raw)))?;
    let db: DbId = captures[1]
        .parse()
        .map_err(|_| Error::store(format!("bad db number in pattern {}", raw)))?;
    Ok(CompiledPattern {
        raw: raw.to_owned(),
        regex: glob_regex(raw)?,
        db,
    })
}

//! 15-minute window arithmetic and slug naming

use super::Symbol;
use chrono::{DateTime, TimeZone, Utc};

/// Length of one market window
pub const WINDOW_SECS: i64 = 900;

/// Start of the window containing `now`
pub fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let ts = now.timestamp();
    let start = ts - ts.rem_euclid(WINDOW_SECS);
    Utc.timestamp_opt(start, 0).single().unwrap_or(now)
}

/// Event slug for a symbol's window, e.g. `eth-updown-15m-1767638700`
pub fn window_slug(symbol: Symbol, start: DateTime<Utc>) -> String {
    format!("{}-updown-15m-{}", symbol.slug_prefix(), start.timestamp())
}

/// Recover symbol and window start from a slug
pub fn parse_slug(slug: &str) -> Option<(Symbol, DateTime<Utc>)> {
    let mut parts = slug.splitn(2, "-updown-15m-");
    let symbol = parts.next()?.parse().ok()?;
    let ts: i64 = parts.next()?.parse().ok()?;
    let start = Utc.timestamp_opt(ts, 0).single()?;
    Some((symbol, start))
}

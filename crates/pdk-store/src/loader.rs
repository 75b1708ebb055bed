//! Backtest-facing bar loader with the quality-tier gate.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::fmt;

/// A `universe`-tier row was found inside the requested range. Backtests
/// must not run over screening data; the load fails loudly instead of
/// filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniverseTierRejected {
    pub symbol: String,
    pub rows: i64,
}

impl fmt::Display for UniverseTierRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backtest load rejected: {} universe-tier bar(s) for {} in range",
            self.rows, self.symbol
        )
    }
}

impl std::error::Error for UniverseTierRejected {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarRow {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume: i64,
    pub tier: String,
}

/// Load bars for a backtest. Errors with [`UniverseTierRejected`] if the
/// range contains ANY universe-tier row.
pub async fn load_bars(
    pool: &PgPool,
    symbol: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<BarRow>> {
    let (universe_rows,): (i64,) = sqlx::query_as(
        r#"
        select count(*)
        from bars
        where symbol = $1 and ts >= $2 and ts < $3 and tier = 'universe'
        "#,
    )
    .bind(symbol)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
    .context("tier gate query")?;

    if universe_rows > 0 {
        return Err(UniverseTierRejected {
            symbol: symbol.to_string(),
            rows: universe_rows,
        }
        .into());
    }

    let rows = sqlx::query(
        r#"
        select symbol, ts, open_micros, high_micros, low_micros, close_micros, volume, tier
        from bars
        where symbol = $1 and ts >= $2 and ts < $3
        order by ts asc
        "#,
    )
    .bind(symbol)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
    .context("bar load query")?;

    Ok(rows
        .iter()
        .map(|r| BarRow {
            symbol: r.get("symbol"),
            ts: r.get("ts"),
            open_micros: r.get("open_micros"),
            high_micros: r.get("high_micros"),
            low_micros: r.get("low_micros"),
            close_micros: r.get("close_micros"),
            volume: r.get("volume"),
            tier: r.get("tier"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_error_names_symbol_and_count() {
        let e = UniverseTierRejected {
            symbol: "AAPL".to_string(),
            rows: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("AAPL"));
        assert!(msg.contains("3"));
        assert!(msg.contains("rejected"));
    }
}

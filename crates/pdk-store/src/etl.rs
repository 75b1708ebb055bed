//! Event log → analytical rows.
//!
//! Extraction is pure (and unit-tested without a database); the worker
//! applies extracted rows with conflict-ignoring inserts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pdk_eventlog::{list_day_files, read_records, EventRecord, RecordKind};
use pdk_schemas::{micros_from_decimal_str, Bar, Fill, Order, OrderState};
use sqlx::PgPool;
use std::path::Path;

/// One analytical-store mutation derived from one event record.
#[derive(Clone, Debug, PartialEq)]
pub enum EtlRow {
    Bar(Bar),
    OrderCreated(Order),
    /// Terminal transition: stamps final_state + terminal_at.
    OrderFinalized {
        order_id: String,
        final_state: OrderState,
        terminal_at: DateTime<Utc>,
    },
    Fill(Fill),
    Position {
        ts: DateTime<Utc>,
        symbol: String,
        net_qty: i64,
        avg_cost_micros: i64,
    },
    Performance {
        ts: DateTime<Utc>,
        equity_micros: i64,
        cash_micros: i64,
        positions_value_micros: i64,
    },
}

/// Extract the analytical rows a record implies. Records that carry no
/// analytical content (heartbeats, signals, halts) produce nothing.
pub fn rows_from_record(rec: &EventRecord) -> Vec<EtlRow> {
    match rec.kind {
        RecordKind::Bar => serde_json::from_value::<Bar>(rec.data.clone())
            .map(|b| vec![EtlRow::Bar(b)])
            .unwrap_or_default(),

        RecordKind::OrderCreated => serde_json::from_value::<Order>(rec.data.clone())
            .map(|o| vec![EtlRow::OrderCreated(o)])
            .unwrap_or_default(),

        RecordKind::OrderTransition => {
            let order_id = rec.data["order_id"].as_str();
            let to = rec.data["to"]
                .as_str()
                .and_then(|s| serde_json::from_value::<OrderState>(serde_json::json!(s)).ok());
            match (order_id, to) {
                (Some(order_id), Some(state)) if state.is_terminal() => {
                    vec![EtlRow::OrderFinalized {
                        order_id: order_id.to_string(),
                        final_state: state,
                        terminal_at: rec.ts,
                    }]
                }
                _ => Vec::new(),
            }
        }

        RecordKind::Fill => serde_json::from_value::<Fill>(rec.data["fill"].clone())
            .map(|f| vec![EtlRow::Fill(f)])
            .unwrap_or_default(),

        RecordKind::PositionReconciled => {
            let symbol = rec.data["symbol"].as_str();
            let net_qty = rec.data["broker_qty"].as_i64();
            let avg = rec.data["broker_avg_entry_price"]
                .as_str()
                .and_then(|s| micros_from_decimal_str(s).ok())
                .unwrap_or(0);
            match (symbol, net_qty) {
                (Some(symbol), Some(net_qty)) => vec![EtlRow::Position {
                    ts: rec.ts,
                    symbol: symbol.to_string(),
                    net_qty,
                    avg_cost_micros: avg,
                }],
                _ => Vec::new(),
            }
        }

        RecordKind::Metric => {
            if rec.data["metric"] != "equity" {
                return Vec::new();
            }
            let parse = |key: &str| {
                rec.data[key]
                    .as_str()
                    .and_then(|s| micros_from_decimal_str(s).ok())
            };
            match (parse("equity"), parse("cash"), parse("positions_value")) {
                (Some(e), Some(c), Some(p)) => vec![EtlRow::Performance {
                    ts: rec.ts,
                    equity_micros: e,
                    cash_micros: c,
                    positions_value_micros: p,
                }],
                _ => Vec::new(),
            }
        }

        RecordKind::Signal | RecordKind::Intent | RecordKind::Halt | RecordKind::Heartbeat => {
            Vec::new()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EtlStats {
    pub records_read: usize,
    pub rows_applied: usize,
}

pub struct EtlWorker {
    pool: PgPool,
}

impl EtlWorker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replay every day file under the event-log root. Safe to run any
    /// number of times over the same range.
    pub async fn run_once(&self, el_root: &Path) -> Result<EtlStats> {
        let mut stats = EtlStats::default();
        for file in list_day_files(el_root)? {
            let records = read_records(&file)?;
            for rec in &records {
                stats.records_read += 1;
                for row in rows_from_record(rec) {
                    self.apply(&row)
                        .await
                        .with_context(|| format!("apply row from {}", file.display()))?;
                    stats.rows_applied += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn apply(&self, row: &EtlRow) -> Result<()> {
        match row {
            EtlRow::Bar(b) => {
                sqlx::query(
                    r#"
                    insert into bars (symbol, ts, open_micros, high_micros, low_micros,
                                      close_micros, volume, tier)
                    values ($1, $2, $3, $4, $5, $6, $7, $8)
                    on conflict (symbol, ts) do nothing
                    "#,
                )
                .bind(&b.symbol)
                .bind(b.ts)
                .bind(b.open_micros)
                .bind(b.high_micros)
                .bind(b.low_micros)
                .bind(b.close_micros)
                .bind(b.volume)
                .bind(b.tier.as_str())
                .execute(&self.pool)
                .await?;
            }
            EtlRow::OrderCreated(o) => {
                sqlx::query(
                    r#"
                    insert into orders (order_id, client_order_id, symbol, side, qty, type,
                                        limit_price_micros, created_at)
                    values ($1, $2, $3, $4, $5, $6, $7, $8)
                    on conflict (order_id) do nothing
                    "#,
                )
                .bind(&o.order_id)
                .bind(&o.client_order_id)
                .bind(&o.symbol)
                .bind(o.side.to_string())
                .bind(o.qty)
                .bind(match o.order_type {
                    pdk_schemas::OrderType::Market => "market",
                    pdk_schemas::OrderType::Limit => "limit",
                })
                .bind(o.limit_price_micros)
                .bind(o.created_at)
                .execute(&self.pool)
                .await?;
            }
            EtlRow::OrderFinalized {
                order_id,
                final_state,
                terminal_at,
            } => {
                sqlx::query(
                    r#"
                    update orders
                    set final_state = $2, terminal_at = $3
                    where order_id = $1
                    "#,
                )
                .bind(order_id)
                .bind(final_state.to_string())
                .bind(terminal_at)
                .execute(&self.pool)
                .await?;
            }
            EtlRow::Fill(f) => {
                sqlx::query(
                    r#"
                    insert into fills (fill_id, order_id, qty, price_micros, fees_micros, ts)
                    values ($1, $2, $3, $4, $5, $6)
                    on conflict (fill_id) do nothing
                    "#,
                )
                .bind(&f.fill_id)
                .bind(&f.order_id)
                .bind(f.qty)
                .bind(f.price_micros)
                .bind(f.fees_micros)
                .bind(f.ts)
                .execute(&self.pool)
                .await?;
            }
            EtlRow::Position {
                ts,
                symbol,
                net_qty,
                avg_cost_micros,
            } => {
                sqlx::query(
                    r#"
                    insert into positions (ts, symbol, net_qty, avg_cost_micros)
                    values ($1, $2, $3, $4)
                    on conflict (ts, symbol) do nothing
                    "#,
                )
                .bind(ts)
                .bind(symbol)
                .bind(net_qty)
                .bind(avg_cost_micros)
                .execute(&self.pool)
                .await?;
            }
            EtlRow::Performance {
                ts,
                equity_micros,
                cash_micros,
                positions_value_micros,
            } => {
                sqlx::query(
                    r#"
                    insert into performance (ts, equity_micros, cash_micros, positions_value_micros)
                    values ($1, $2, $3, $4)
                    on conflict (ts) do nothing
                    "#,
                )
                .bind(ts)
                .bind(equity_micros)
                .bind(cash_micros)
                .bind(positions_value_micros)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pdk_schemas::QualityTier;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()
    }

    #[test]
    fn bar_record_extracts_bar_row() {
        let bar = Bar {
            symbol: "AAPL".to_string(),
            ts: ts(),
            open_micros: 1,
            high_micros: 2,
            low_micros: 1,
            close_micros: 2,
            volume: 100,
            tier: QualityTier::Validated,
        };
        let rec = EventRecord::new(ts(), RecordKind::Bar, serde_json::to_value(&bar).unwrap());
        assert_eq!(rows_from_record(&rec), vec![EtlRow::Bar(bar)]);
    }

    #[test]
    fn only_terminal_transitions_finalize_orders() {
        let rec = EventRecord::new(
            ts(),
            RecordKind::OrderTransition,
            serde_json::json!({"order_id": "ord-1", "from": "SUBMITTED", "to": "PARTIAL_FILL"}),
        );
        assert!(rows_from_record(&rec).is_empty());

        let rec = EventRecord::new(
            ts(),
            RecordKind::OrderTransition,
            serde_json::json!({"order_id": "ord-1", "from": "PARTIAL_FILL", "to": "FILLED"}),
        );
        let rows = rows_from_record(&rec);
        assert_eq!(rows.len(), 1);
        assert!(matches!(
            &rows[0],
            EtlRow::OrderFinalized {
                order_id,
                final_state: OrderState::Filled,
                ..
            } if order_id == "ord-1"
        ));
    }

    #[test]
    fn equity_metric_extracts_performance() {
        let rec = EventRecord::new(
            ts(),
            RecordKind::Metric,
            serde_json::json!({
                "metric": "equity",
                "equity": "100100.000000",
                "cash": "98500.000000",
                "positions_value": "1600.000000",
            }),
        );
        let rows = rows_from_record(&rec);
        assert_eq!(
            rows,
            vec![EtlRow::Performance {
                ts: ts(),
                equity_micros: 100_100_000_000,
                cash_micros: 98_500_000_000,
                positions_value_micros: 1_600_000_000,
            }]
        );
    }

    #[test]
    fn non_analytical_kinds_extract_nothing() {
        for kind in [RecordKind::Heartbeat, RecordKind::Halt, RecordKind::Signal] {
            let rec = EventRecord::new(ts(), kind, serde_json::json!({}));
            assert!(rows_from_record(&rec).is_empty());
        }
        // A zombie metric is not an equity metric.
        let rec = EventRecord::new(
            ts(),
            RecordKind::Metric,
            serde_json::json!({"metric": "zombie_order"}),
        );
        assert!(rows_from_record(&rec).is_empty());
    }

    #[test]
    fn replaying_the_same_record_yields_identical_rows() {
        let rec = EventRecord::new(
            ts(),
            RecordKind::PositionReconciled,
            serde_json::json!({
                "symbol": "AAPL",
                "local_qty": 0,
                "broker_qty": 10,
                "broker_avg_entry_price": "150.000000",
            }),
        );
        assert_eq!(rows_from_record(&rec), rows_from_record(&rec));
        let rows = rows_from_record(&rec);
        assert_eq!(
            rows,
            vec![EtlRow::Position {
                ts: ts(),
                symbol: "AAPL".to_string(),
                net_qty: 10,
                avg_cost_micros: 150_000_000,
            }]
        );
    }
}

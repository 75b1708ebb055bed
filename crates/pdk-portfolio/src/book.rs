//! The position book: signed net quantities, weighted-average cost,
//! realized/unrealized PnL, and equity.

use crate::fixedpoint::Micros;
use chrono::{DateTime, Utc};
use pdk_schemas::{EquityPoint, Position, Side};
use std::collections::BTreeMap;

/// symbol -> mark price.
pub type MarkMap = BTreeMap<String, Micros>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountingError {
    /// A trade-value multiplication overflowed i64 micros.
    Overflow { symbol: String },
    /// qty must be strictly positive.
    BadQty { symbol: String, qty: i64 },
}

impl std::fmt::Display for AccountingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountingError::Overflow { symbol } => {
                write!(f, "accounting overflow for {symbol}")
            }
            AccountingError::BadQty { symbol, qty } => {
                write!(f, "non-positive fill qty {qty} for {symbol}")
            }
        }
    }
}

impl std::error::Error for AccountingError {}

// ---------------------------------------------------------------------------
// PositionState
// ---------------------------------------------------------------------------

/// One symbol's book state. `net_qty` is signed: +long, -short.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionState {
    pub net_qty: i64,
    pub avg_cost: Micros,
    pub realized_pnl: Micros,
    pub unrealized_pnl: Micros,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl PositionState {
    fn flat(at: DateTime<Utc>) -> Self {
        Self {
            net_qty: 0,
            avg_cost: Micros::ZERO,
            realized_pnl: Micros::ZERO,
            unrealized_pnl: Micros::ZERO,
            updated_at: at,
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// PositionBook
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PositionBook {
    cash: Micros,
    positions: BTreeMap<String, PositionState>,
}

impl PositionBook {
    pub fn with_cash(cash: Micros) -> Self {
        Self {
            cash,
            positions: BTreeMap::new(),
        }
    }

    pub fn cash(&self) -> Micros {
        self.cash
    }

    pub fn position(&self, symbol: &str) -> Option<&PositionState> {
        self.positions.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.positions.keys()
    }

    /// Apply one fill.
    ///
    /// Cash moves by the full trade value plus fees. Reducing a position
    /// realizes PnL against the average cost; crossing through zero opens
    /// the remainder at the fill price.
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        side: Side,
        qty: i64,
        price: Micros,
        fees: Micros,
        ts: DateTime<Utc>,
    ) -> Result<(), AccountingError> {
        if qty <= 0 {
            return Err(AccountingError::BadQty {
                symbol: symbol.to_string(),
                qty,
            });
        }

        let trade_value = price.checked_mul_qty(qty).ok_or(AccountingError::Overflow {
            symbol: symbol.to_string(),
        })?;

        // Cash leg: buys pay, sells collect; fees always debit.
        match side {
            Side::Buy => self.cash = self.cash.saturating_sub(trade_value),
            Side::Sell => self.cash = self.cash.saturating_add(trade_value),
        }
        self.cash = self.cash.saturating_sub(fees);

        let entry = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| PositionState::flat(ts));

        let delta = side.sign() * qty;
        let old_qty = entry.net_qty;

        if old_qty == 0 || old_qty.signum() == delta.signum() {
            // Opening or adding: weighted-average the cost basis.
            entry.avg_cost = weighted_avg(entry.avg_cost, old_qty.abs(), price, qty)
                .ok_or(AccountingError::Overflow {
                    symbol: symbol.to_string(),
                })?;
            entry.net_qty = old_qty + delta;
        } else {
            // Reducing (possibly through zero).
            let closable = old_qty.abs().min(qty);
            // Long: profit when price > cost. Short: profit when price < cost.
            let per_unit = if old_qty > 0 {
                price - entry.avg_cost
            } else {
                entry.avg_cost - price
            };
            let realized = per_unit
                .checked_mul_qty(closable)
                .ok_or(AccountingError::Overflow {
                    symbol: symbol.to_string(),
                })?;
            entry.realized_pnl += realized;
            entry.net_qty = old_qty + delta;

            if entry.net_qty == 0 {
                entry.avg_cost = Micros::ZERO;
            } else if entry.net_qty.signum() != old_qty.signum() {
                // Crossed through zero: remainder opens at the fill price.
                entry.avg_cost = price;
            }
        }

        entry.updated_at = ts;
        entry.version += 1;
        Ok(())
    }

    /// Broker-authoritative overwrite from reconciliation. Keeps realized
    /// PnL (a local ledger) but adopts the broker's qty and cost basis.
    pub fn overwrite_position(
        &mut self,
        symbol: &str,
        net_qty: i64,
        avg_cost: Micros,
        ts: DateTime<Utc>,
    ) {
        let entry = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| PositionState::flat(ts));
        entry.net_qty = net_qty;
        entry.avg_cost = avg_cost;
        entry.updated_at = ts;
        entry.version += 1;
    }

    /// Recompute unrealized PnL for every symbol present in `marks`.
    pub fn mark_to_market(&mut self, marks: &MarkMap, ts: DateTime<Utc>) {
        for (symbol, state) in self.positions.iter_mut() {
            if let Some(mark) = marks.get(symbol) {
                // (mark - avg_cost) * net_qty works for both directions.
                let per_unit = *mark - state.avg_cost;
                if let Some(u) = per_unit.checked_mul_qty(state.net_qty) {
                    state.unrealized_pnl = u;
                    state.updated_at = ts;
                }
            }
        }
    }

    /// Marked value of all positions. Symbols without a mark value at their
    /// cost basis (conservative: zero unrealized contribution).
    pub fn positions_value(&self, marks: &MarkMap) -> Micros {
        let mut total = Micros::ZERO;
        for (symbol, state) in &self.positions {
            let px = marks.get(symbol).copied().unwrap_or(state.avg_cost);
            if let Some(v) = px.checked_mul_qty(state.net_qty) {
                total = total.saturating_add(v);
            }
        }
        total
    }

    pub fn equity_point(&self, marks: &MarkMap, ts: DateTime<Utc>) -> EquityPoint {
        let pv = self.positions_value(marks);
        EquityPoint {
            ts,
            equity_micros: self.cash.saturating_add(pv).raw(),
            cash_micros: self.cash.raw(),
            positions_value_micros: pv.raw(),
        }
    }

    /// Export for the live-state cache / broadcast bus.
    pub fn to_schema_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .map(|(symbol, s)| Position {
                symbol: symbol.clone(),
                net_qty: s.net_qty,
                avg_cost_micros: s.avg_cost.raw(),
                realized_pnl_micros: s.realized_pnl.raw(),
                unrealized_pnl_micros: s.unrealized_pnl.raw(),
                updated_at: s.updated_at,
                version: s.version,
            })
            .collect()
    }
}

/// Quantity-weighted average of two prices; i128 intermediates so large
/// books cannot overflow the accumulator.
fn weighted_avg(avg: Micros, old_qty: i64, price: Micros, add_qty: i64) -> Option<Micros> {
    let total = old_qty.checked_add(add_qty)?;
    if total == 0 {
        return Some(Micros::ZERO);
    }
    let num = (avg.raw() as i128) * (old_qty as i128) + (price.raw() as i128) * (add_qty as i128);
    let avg = num / (total as i128);
    i64::try_from(avg).ok().map(Micros::new)
}

//! pdk-risk
//!
//! The pre-trade gate between strategy intents and the lifecycle engine.
//! Deterministic, pure logic: no IO, no time, no broker calls. Sticky
//! flags live in [`RiskState`]; the caller owns persistence.
//!
//! Checks, in order:
//! - halt flag (risk-reducing flatten requests stay allowed)
//! - quantity sanity
//! - open-order budget
//! - single-symbol concentration against equity
//! - reject-storm protection (sticky halt once tripped)

use pdk_schemas::Side;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskConfig {
    /// Cap on resulting |position notional| / equity, in basis points.
    pub max_position_bps: i64,
    pub max_open_orders: usize,
    /// Broker rejects inside one window before the bridge halts.
    pub reject_storm_limit: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_bps: 2_500,
            max_open_orders: 32,
            reject_storm_limit: 10,
        }
    }
}

/// Sticky evaluator state. `halted` stays set until an operator clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RiskState {
    pub reject_window_id: i64,
    pub reject_count_in_window: u32,
    pub halted: bool,
}

/// What the caller is asking permission for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// A new risk-adding order intent.
    NewOrder,
    /// Risk-reducing flatten.
    Flatten,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskInput {
    pub request: RequestKind,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    /// Mark price used for notional math. Micros.
    pub mark_price_micros: i64,
    /// Current signed position in this symbol.
    pub current_net_qty: i64,
    pub equity_micros: i64,
    pub open_orders: usize,
    pub halt_active: bool,
    /// Reject-storm window (e.g. epoch minutes).
    pub reject_window_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RiskVerdict {
    Approve,
    Reject(RejectReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    HaltActive,
    BadQty(i64),
    OpenOrderBudget { open: usize, max: usize },
    Concentration { notional_micros: i64, cap_micros: i64 },
    RejectStorm { count: u32 },
    Overflow,
}

/// Window maintenance; call once per evaluation with the current window id.
pub fn tick(state: &mut RiskState, window_id: i64) {
    if state.reject_window_id != window_id {
        state.reject_window_id = window_id;
        state.reject_count_in_window = 0;
    }
}

/// Record a broker reject. Trips the sticky halt at the configured limit.
pub fn record_reject(cfg: &RiskConfig, state: &mut RiskState) {
    state.reject_count_in_window += 1;
    if state.reject_count_in_window >= cfg.reject_storm_limit {
        state.halted = true;
    }
}

pub fn evaluate(cfg: &RiskConfig, state: &mut RiskState, input: &RiskInput) -> RiskVerdict {
    tick(state, input.reject_window_id);

    // Halt (external flag or sticky internal): only flattening survives.
    if (input.halt_active || state.halted) && input.request != RequestKind::Flatten {
        return RiskVerdict::Reject(RejectReason::HaltActive);
    }

    if input.qty <= 0 {
        return RiskVerdict::Reject(RejectReason::BadQty(input.qty));
    }

    if input.request == RequestKind::Flatten {
        // Risk-reducing; no budget or concentration math.
        return RiskVerdict::Approve;
    }

    if input.open_orders >= cfg.max_open_orders {
        return RiskVerdict::Reject(RejectReason::OpenOrderBudget {
            open: input.open_orders,
            max: cfg.max_open_orders,
        });
    }

    // Concentration: |resulting position| * mark vs equity * cap.
    let resulting_qty = input.current_net_qty + input.side.sign() * input.qty;
    let notional = match input.mark_price_micros.checked_mul(resulting_qty.abs()) {
        Some(n) => n,
        None => return RiskVerdict::Reject(RejectReason::Overflow),
    };
    // cap = equity * bps / 10_000, in i128 to dodge intermediate overflow.
    let cap = (input.equity_micros as i128) * (cfg.max_position_bps as i128) / 10_000;
    let cap = i64::try_from(cap).unwrap_or(i64::MAX);
    if notional > cap {
        return RiskVerdict::Reject(RejectReason::Concentration {
            notional_micros: notional,
            cap_micros: cap,
        });
    }

    if state.reject_count_in_window >= cfg.reject_storm_limit {
        state.halted = true;
        return RiskVerdict::Reject(RejectReason::RejectStorm {
            count: state.reject_count_in_window,
        });
    }

    RiskVerdict::Approve
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: i64 = 1_000_000;

    fn base_input() -> RiskInput {
        RiskInput {
            request: RequestKind::NewOrder,
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            qty: 10,
            mark_price_micros: 150 * M,
            current_net_qty: 0,
            equity_micros: 100_000 * M,
            open_orders: 0,
            halt_active: false,
            reject_window_id: 1,
        }
    }

    #[test]
    fn clean_intent_is_approved() {
        let cfg = RiskConfig::default();
        let mut st = RiskState::default();
        assert_eq!(evaluate(&cfg, &mut st, &base_input()), RiskVerdict::Approve);
    }

    #[test]
    fn halt_blocks_new_orders_but_not_flatten() {
        let cfg = RiskConfig::default();
        let mut st = RiskState::default();

        let mut input = base_input();
        input.halt_active = true;
        assert_eq!(
            evaluate(&cfg, &mut st, &input),
            RiskVerdict::Reject(RejectReason::HaltActive)
        );

        input.request = RequestKind::Flatten;
        assert_eq!(evaluate(&cfg, &mut st, &input), RiskVerdict::Approve);
    }

    #[test]
    fn concentration_cap_enforced_on_resulting_position() {
        let cfg = RiskConfig::default(); // 25% of 100k = 25k cap
        let mut st = RiskState::default();

        let mut input = base_input();
        input.qty = 200; // 200 * $150 = $30k > $25k
        match evaluate(&cfg, &mut st, &input) {
            RiskVerdict::Reject(RejectReason::Concentration { cap_micros, .. }) => {
                assert_eq!(cap_micros, 25_000 * M);
            }
            other => panic!("expected concentration reject, got {other:?}"),
        }

        // Existing exposure counts toward the same cap.
        input.qty = 100;
        input.current_net_qty = 100; // resulting 200 again
        assert!(matches!(
            evaluate(&cfg, &mut st, &input),
            RiskVerdict::Reject(RejectReason::Concentration { .. })
        ));
    }

    #[test]
    fn open_order_budget() {
        let cfg = RiskConfig {
            max_open_orders: 2,
            ..RiskConfig::default()
        };
        let mut st = RiskState::default();
        let mut input = base_input();
        input.open_orders = 2;
        assert!(matches!(
            evaluate(&cfg, &mut st, &input),
            RiskVerdict::Reject(RejectReason::OpenOrderBudget { open: 2, max: 2 })
        ));
    }

    #[test]
    fn reject_storm_trips_sticky_halt() {
        let cfg = RiskConfig {
            reject_storm_limit: 3,
            ..RiskConfig::default()
        };
        let mut st = RiskState::default();
        for _ in 0..3 {
            record_reject(&cfg, &mut st);
        }
        assert!(st.halted);

        // Sticky: even a clean new-order input is rejected now.
        assert_eq!(
            evaluate(&cfg, &mut st, &base_input()),
            RiskVerdict::Reject(RejectReason::HaltActive)
        );
    }

    #[test]
    fn window_rollover_resets_reject_count() {
        let cfg = RiskConfig::default();
        let mut st = RiskState::default();
        tick(&mut st, 1);
        record_reject(&cfg, &mut st);
        assert_eq!(st.reject_count_in_window, 1);
        tick(&mut st, 2);
        assert_eq!(st.reject_count_in_window, 0);
    }
}

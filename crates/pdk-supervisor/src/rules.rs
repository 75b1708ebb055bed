//! Kill-rule evaluation. Pure deterministic logic; the cycle loop owns
//! gathering inputs and executing verdicts.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::America::New_York;

#[derive(Clone, Debug)]
pub struct KillConfig {
    /// Daily loss vs start-of-day equity (bps). Breach: flatten + halt.
    pub daily_loss_bps: i64,
    /// Peak-to-trough drop (bps). Breach: hard halt, not auto-resumable.
    pub max_drawdown_bps: i64,
    /// Single-symbol share of equity (bps). Breach: flatten that symbol.
    pub concentration_bps: i64,
    /// SUBMITTED|CANCELLING age (secs). Breach: cancel via direct access.
    pub zombie_secs: i64,
    /// Trading heartbeat age (secs). Breach: flatten + halt.
    pub heartbeat_stale_secs: i64,
    /// Friday 15:55 America/New_York: flatten all positions.
    pub end_of_week_flatten: bool,
}

impl Default for KillConfig {
    fn default() -> Self {
        Self {
            daily_loss_bps: 500,
            max_drawdown_bps: 1_500,
            concentration_bps: 2_500,
            zombie_secs: 300,
            heartbeat_stale_secs: 30,
            end_of_week_flatten: true,
        }
    }
}

/// Equity bookkeeping the supervisor maintains across cycles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorState {
    /// Trading day (yyyymmdd in exchange time); rollover resets
    /// start-of-day equity.
    pub day_id: i32,
    pub start_of_day_equity_micros: i64,
    /// Lifetime-of-run peak; never reset on day rollover.
    pub peak_equity_micros: i64,
}

impl SupervisorState {
    pub fn new(day_id: i32, equity_micros: i64) -> Self {
        Self {
            day_id,
            start_of_day_equity_micros: equity_micros,
            peak_equity_micros: equity_micros,
        }
    }

    pub fn tick(&mut self, day_id: i32, equity_micros: i64) {
        if day_id != self.day_id {
            self.day_id = day_id;
            self.start_of_day_equity_micros = equity_micros;
        }
        if equity_micros > self.peak_equity_micros {
            self.peak_equity_micros = equity_micros;
        }
    }
}

/// One open order as the broker reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenOrderInfo {
    pub broker_order_id: String,
    /// Broker status string ("accepted", "pending_cancel", ...).
    pub status: String,
    pub age_secs: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KillInput {
    pub now: DateTime<Utc>,
    pub equity_micros: i64,
    /// |qty| * entry price per symbol, from the broker.
    pub symbol_notional_micros: Vec<(String, i64)>,
    pub open_orders: Vec<OpenOrderInfo>,
    /// None = no trading heartbeat has ever been seen.
    pub tp_heartbeat_age_secs: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KillAction {
    /// Max drawdown: halt that only an operator can clear. Open orders
    /// are cancelled; positions are left for the operator's judgment.
    HardHalt { reason: String },
    /// Daily loss or lost heartbeat: graceful flatten + halt.
    FlattenAllAndHalt { reason: String },
    /// Concentration breach in one symbol.
    FlattenSymbol { symbol: String, reason: String },
    /// Zombie order: cancel via the supervisor's own broker access.
    CancelOrder { broker_order_id: String, reason: String },
    /// End-of-week flatten; trading may resume next session.
    FlattenAll { reason: String },
}

fn bps_floor(base_micros: i64, bps: i64) -> i64 {
    let drop = (base_micros as i128) * (bps as i128) / 10_000;
    (base_micros as i128 - drop) as i64
}

/// Evaluate every rule against one cycle's input.
///
/// Whole-book verdicts (drawdown, daily loss, heartbeat) supersede the
/// narrower ones; the first that fires is the only action returned.
pub fn evaluate(cfg: &KillConfig, st: &SupervisorState, input: &KillInput) -> Vec<KillAction> {
    // Max drawdown first: the hard stop outranks everything.
    if cfg.max_drawdown_bps > 0
        && st.peak_equity_micros > 0
        && input.equity_micros <= bps_floor(st.peak_equity_micros, cfg.max_drawdown_bps)
    {
        return vec![KillAction::HardHalt {
            reason: format!(
                "MAX_DRAWDOWN: equity {} below {} bps floor of peak {}",
                input.equity_micros, cfg.max_drawdown_bps, st.peak_equity_micros
            ),
        }];
    }

    if cfg.daily_loss_bps > 0
        && st.start_of_day_equity_micros > 0
        && input.equity_micros <= bps_floor(st.start_of_day_equity_micros, cfg.daily_loss_bps)
    {
        return vec![KillAction::FlattenAllAndHalt {
            reason: format!(
                "DAILY_LOSS: equity {} below {} bps floor of day-start {}",
                input.equity_micros, cfg.daily_loss_bps, st.start_of_day_equity_micros
            ),
        }];
    }

    let heartbeat_stale = match input.tp_heartbeat_age_secs {
        Some(age) => age > cfg.heartbeat_stale_secs,
        None => true,
    };
    if heartbeat_stale {
        return vec![KillAction::FlattenAllAndHalt {
            reason: format!(
                "HEARTBEAT_STALE: trading heartbeat age {:?}s exceeds {}s",
                input.tp_heartbeat_age_secs, cfg.heartbeat_stale_secs
            ),
        }];
    }

    let mut actions = Vec::new();

    if cfg.concentration_bps > 0 && input.equity_micros > 0 {
        let cap = (input.equity_micros as i128) * (cfg.concentration_bps as i128) / 10_000;
        for (symbol, notional) in &input.symbol_notional_micros {
            if (*notional as i128) > cap {
                actions.push(KillAction::FlattenSymbol {
                    symbol: symbol.clone(),
                    reason: format!(
                        "CONCENTRATION: {symbol} notional {notional} exceeds {} bps of equity",
                        cfg.concentration_bps
                    ),
                });
            }
        }
    }

    for order in &input.open_orders {
        let zombie_status = matches!(order.status.as_str(), "accepted" | "pending_cancel");
        if zombie_status && order.age_secs > cfg.zombie_secs {
            actions.push(KillAction::CancelOrder {
                broker_order_id: order.broker_order_id.clone(),
                reason: format!(
                    "ZOMBIE: order age {}s exceeds {}s",
                    order.age_secs, cfg.zombie_secs
                ),
            });
        }
    }

    if cfg.end_of_week_flatten && is_past_friday_cutoff(input.now) {
        actions.push(KillAction::FlattenAll {
            reason: "END_OF_WEEK: Friday 15:55 America/New_York".to_string(),
        });
    }

    actions
}

/// Friday at or after 15:55 exchange time.
fn is_past_friday_cutoff(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&New_York);
    local.weekday() == chrono::Weekday::Fri
        && (local.hour() > 15 || (local.hour() == 15 && local.minute() >= 55))
}

/// Trading-day id (yyyymmdd) in exchange time.
pub(crate) fn day_id(now: DateTime<Utc>) -> i32 {
    let local = now.with_timezone(&New_York);
    local.year() * 10_000 + local.month() as i32 * 100 + local.day() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const M: i64 = 1_000_000;

    fn healthy_input(now: DateTime<Utc>, equity: i64) -> KillInput {
        KillInput {
            now,
            equity_micros: equity,
            symbol_notional_micros: vec![],
            open_orders: vec![],
            tp_heartbeat_age_secs: Some(1),
        }
    }

    // A Wednesday mid-session, well away from the Friday cutoff.
    fn midweek() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap()
    }

    #[test]
    fn healthy_book_fires_nothing() {
        let st = SupervisorState::new(20260304, 100_000 * M);
        let actions = evaluate(
            &KillConfig::default(),
            &st,
            &healthy_input(midweek(), 100_000 * M),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn daily_loss_breach_flattens_and_halts() {
        let st = SupervisorState::new(20260304, 100_000 * M);
        // -5.1% of start-of-day.
        let actions = evaluate(
            &KillConfig::default(),
            &st,
            &healthy_input(midweek(), 94_900 * M),
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], KillAction::FlattenAllAndHalt { reason } if reason.contains("DAILY_LOSS")));
    }

    #[test]
    fn exactly_at_floor_fires() {
        let st = SupervisorState::new(20260304, 100_000 * M);
        let actions = evaluate(
            &KillConfig::default(),
            &st,
            &healthy_input(midweek(), 95_000 * M),
        );
        assert_eq!(actions.len(), 1, "<= floor is a breach");
    }

    #[test]
    fn drawdown_outranks_daily_loss() {
        let mut st = SupervisorState::new(20260304, 80_000 * M);
        st.peak_equity_micros = 100_000 * M;
        // 15% off the peak AND below the daily floor: hard halt wins.
        let actions = evaluate(
            &KillConfig::default(),
            &st,
            &healthy_input(midweek(), 85_000 * M),
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], KillAction::HardHalt { reason } if reason.contains("MAX_DRAWDOWN")));
    }

    #[test]
    fn concentration_flattens_only_the_breaching_symbol() {
        let st = SupervisorState::new(20260304, 100_000 * M);
        let mut input = healthy_input(midweek(), 100_000 * M);
        input.symbol_notional_micros = vec![
            ("AAPL".to_string(), 30_000 * M), // > 25%
            ("MSFT".to_string(), 10_000 * M),
        ];
        let actions = evaluate(&KillConfig::default(), &st, &input);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], KillAction::FlattenSymbol { symbol, .. } if symbol == "AAPL"));
    }

    #[test]
    fn zombie_orders_get_cancelled() {
        let st = SupervisorState::new(20260304, 100_000 * M);
        let mut input = healthy_input(midweek(), 100_000 * M);
        input.open_orders = vec![
            OpenOrderInfo {
                broker_order_id: "b-1".to_string(),
                status: "accepted".to_string(),
                age_secs: 301,
            },
            OpenOrderInfo {
                broker_order_id: "b-2".to_string(),
                status: "accepted".to_string(),
                age_secs: 10,
            },
        ];
        let actions = evaluate(&KillConfig::default(), &st, &input);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], KillAction::CancelOrder { broker_order_id, .. } if broker_order_id == "b-1"));
    }

    #[test]
    fn stale_or_missing_heartbeat_flattens() {
        let st = SupervisorState::new(20260304, 100_000 * M);
        let mut input = healthy_input(midweek(), 100_000 * M);
        input.tp_heartbeat_age_secs = Some(31);
        let actions = evaluate(&KillConfig::default(), &st, &input);
        assert!(matches!(&actions[0], KillAction::FlattenAllAndHalt { reason } if reason.contains("HEARTBEAT")));

        input.tp_heartbeat_age_secs = None;
        let actions = evaluate(&KillConfig::default(), &st, &input);
        assert!(matches!(&actions[0], KillAction::FlattenAllAndHalt { .. }));
    }

    #[test]
    fn friday_cutoff_flattens_without_halt() {
        let st = SupervisorState::new(20260306, 100_000 * M);
        // 2026-03-06 is a Friday; 20:56 UTC == 15:56 EST.
        let now = Utc.with_ymd_and_hms(2026, 3, 6, 20, 56, 0).unwrap();
        let actions = evaluate(&KillConfig::default(), &st, &healthy_input(now, 100_000 * M));
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], KillAction::FlattenAll { reason } if reason.contains("END_OF_WEEK")));

        // Same instant on Thursday: nothing.
        let thursday = Utc.with_ymd_and_hms(2026, 3, 5, 20, 56, 0).unwrap();
        let st = SupervisorState::new(20260305, 100_000 * M);
        assert!(evaluate(&KillConfig::default(), &st, &healthy_input(thursday, 100_000 * M)).is_empty());
    }

    #[test]
    fn day_rollover_resets_start_of_day_not_peak() {
        let mut st = SupervisorState::new(20260304, 100_000 * M);
        st.tick(20260304, 110_000 * M);
        assert_eq!(st.peak_equity_micros, 110_000 * M);

        st.tick(20260305, 90_000 * M);
        assert_eq!(st.start_of_day_equity_micros, 90_000 * M);
        assert_eq!(st.peak_equity_micros, 110_000 * M, "peak survives rollover");
    }
}

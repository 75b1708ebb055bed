//! pdk-strategy
//!
//! The strategy capability contract. Strategy implementations live
//! OUTSIDE this workspace; the core only defines the narrow surface it
//! calls and a static registry to hold the variants the operator wires in
//! at startup. No inheritance chains, no dynamic discovery.

use pdk_schemas::{Bar, MarketRegime, OrderType, Side};
use std::collections::BTreeMap;

/// What the decision loop hands each strategy on its tick.
#[derive(Clone, Debug)]
pub struct StrategyContext {
    pub regime: MarketRegime,
    /// Bounded recent-bar window per symbol, oldest first.
    pub bars: BTreeMap<String, Vec<Bar>>,
    /// Current signed positions.
    pub positions: BTreeMap<String, i64>,
    /// Decision-tick bucket; flows into client_order_id derivation.
    pub decision_ts_bucket: i64,
}

/// A strategy's proposed trade, before risk approval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalIntent {
    pub signal_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub order_type: OrderType,
    pub limit_price_micros: Option<i64>,
}

/// The narrow polymorphic capability every strategy implements.
pub trait Strategy: Send {
    fn id(&self) -> &str;
    /// Gate on the detected regime; strategies that decline do not tick.
    fn should_run(&self, regime: MarketRegime) -> bool;
    fn produce_intents(&mut self, ctx: &StrategyContext) -> Vec<SignalIntent>;
}

/// Statically registered strategy set.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.entries.push(strategy);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tick every strategy whose regime gate passes. Returns
    /// `(strategy_id, intent)` pairs in registration order.
    pub fn produce_all(&mut self, ctx: &StrategyContext) -> Vec<(String, SignalIntent)> {
        let mut out = Vec::new();
        for s in self.entries.iter_mut() {
            if !s.should_run(ctx.regime) {
                continue;
            }
            let id = s.id().to_string();
            for intent in s.produce_intents(ctx) {
                out.push((id.clone(), intent));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TrendFollower {
        fired: bool,
    }

    impl Strategy for TrendFollower {
        fn id(&self) -> &str {
            "trend"
        }
        fn should_run(&self, regime: MarketRegime) -> bool {
            regime == MarketRegime::Trending
        }
        fn produce_intents(&mut self, _ctx: &StrategyContext) -> Vec<SignalIntent> {
            self.fired = true;
            vec![SignalIntent {
                signal_id: "s1".to_string(),
                symbol: "AAPL".to_string(),
                side: Side::Buy,
                qty: 10,
                order_type: OrderType::Market,
                limit_price_micros: None,
            }]
        }
    }

    fn ctx(regime: MarketRegime) -> StrategyContext {
        StrategyContext {
            regime,
            bars: BTreeMap::new(),
            positions: BTreeMap::new(),
            decision_ts_bucket: 42,
        }
    }

    #[test]
    fn regime_gate_filters_strategies() {
        let mut reg = StrategyRegistry::new();
        reg.register(Box::new(TrendFollower { fired: false }));

        assert!(reg.produce_all(&ctx(MarketRegime::Choppy)).is_empty());

        let intents = reg.produce_all(&ctx(MarketRegime::Trending));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].0, "trend");
        assert_eq!(intents[0].1.symbol, "AAPL");
    }
}

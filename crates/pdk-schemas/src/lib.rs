//! pdk-schemas
//!
//! Shared data model for the PaperDesk control plane. Pure types only:
//! no IO, no clocks, no broker calls. Every other crate depends on this
//! one; this crate depends on nothing but serde/chrono/uuid.

mod broker_wire;
mod market;
mod money;
mod order;
mod state;

pub use broker_wire::{
    map_broker_status, BrokerEvent, BrokerEventKind, BrokerOrderView, BrokerPositionView,
};
pub use market::{Bar, MarketRegime, QualityTier};
pub use money::{
    micros_from_decimal_str, micros_to_decimal_string, MoneyParseError, MICROS_PER_UNIT,
};
pub use order::{Fill, Order, OrderIntent, OrderState, OrderType, Side};
pub use state::{EquityPoint, HaltFlag, Heartbeat, Position, ProcessRole};

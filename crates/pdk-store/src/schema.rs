//! Table DDL. Applied idempotently at worker startup.

use anyhow::{Context, Result};
use sqlx::PgPool;

const DDL: &[&str] = &[
    r#"
    create table if not exists bars (
      symbol        text        not null,
      ts            timestamptz not null,
      open_micros   bigint      not null,
      high_micros   bigint      not null,
      low_micros    bigint      not null,
      close_micros  bigint      not null,
      volume        bigint      not null,
      tier          text        not null,
      primary key (symbol, ts)
    )
    "#,
    r#"
    create table if not exists orders (
      order_id            text primary key,
      client_order_id     text not null,
      symbol              text not null,
      side                text not null,
      qty                 bigint not null,
      type                text not null,
      limit_price_micros  bigint,
      final_state         text,
      created_at          timestamptz not null,
      terminal_at         timestamptz
    )
    "#,
    r#"
    create table if not exists fills (
      fill_id       text primary key,
      order_id      text not null,
      qty           bigint not null,
      price_micros  bigint not null,
      fees_micros   bigint not null,
      ts            timestamptz not null
    )
    "#,
    r#"
    create table if not exists positions (
      ts               timestamptz not null,
      symbol           text        not null,
      net_qty          bigint      not null,
      avg_cost_micros  bigint      not null,
      unrealized_pnl_micros bigint not null default 0,
      primary key (ts, symbol)
    )
    "#,
    r#"
    create table if not exists performance (
      ts                      timestamptz primary key,
      equity_micros           bigint not null,
      cash_micros             bigint not null,
      positions_value_micros  bigint not null
    )
    "#,
];

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for ddl in DDL {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .context("apply analytical schema")?;
    }
    Ok(())
}

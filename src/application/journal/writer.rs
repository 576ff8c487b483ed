use crate::application::journal::service::{DailySummary, TradeEntry, TradeJournal};
use crate::domain::market::Candle;
use crate::domain::order::OrderSide;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Renders a TradeJournal to a markdown file.
pub struct JournalWriter;

impl JournalWriter {
    pub fn write(journal: &TradeJournal, output_path: &Path) -> Result<PathBuf> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }
        std::fs::write(output_path, Self::render(journal))
            .context("Failed to write journal file")?;
        Ok(output_path.to_path_buf())
    }

    fn render(journal: &TradeJournal) -> String {
        let mut parts = Vec::new();
        parts.push(format!(
            "# Daily Trading Journal - {}\n",
            journal.date.format("%Y-%m-%d")
        ));
        parts.push(Self::render_summary(&journal.summary));

        for (idx, trade) in journal.trades.iter().enumerate() {
            parts.push("---\n".to_string());
            parts.push(Self::render_trade(idx + 1, trade));
        }

        parts.push("---\n".to_string());
        parts.push(format!(
            "## Portfolio\n- Equity: {}\n- Cash: {}\n",
            journal.portfolio_equity, journal.portfolio_cash
        ));
        parts.join("\n")
    }

    fn render_summary(summary: &DailySummary) -> String {
        let mut symbols = summary.symbols_traded[..summary.symbols_traded.len().min(3)].join(", ");
        if summary.symbols_traded.len() > 3 {
            symbols.push_str(", ...");
        }
        [
            "## Summary".to_string(),
            "| Item | Value |".to_string(),
            "|------|-------|".to_string(),
            format!(
                "| Trades | {} ({} buy / {} sell) |",
                summary.total_trades, summary.buy_count, summary.sell_count
            ),
            format!("| Commission | {} |", summary.total_commission),
            format!("| Symbols | {symbols} |"),
            format!("| Strategy | {} |", summary.strategy_name),
            String::new(),
        ]
        .join("\n")
    }

    fn render_trade(idx: usize, trade: &TradeEntry) -> String {
        let side = match trade.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let mut lines = vec![
            format!("## Trade #{idx}: {} {}", trade.symbol, side),
            format!(
                "**Time:** {} | **Strategy:** {} | **Confidence:** {}%",
                trade.created_at.format("%H:%M:%S"),
                trade.strategy_name,
                (trade.confidence * 100.0) as i64
            ),
            String::new(),
            "### Entry reason".to_string(),
            format!("> {}", trade.reason),
            String::new(),
        ];

        if !trade.candles_before.is_empty() {
            lines.push("### Price action (1m, before entry)".to_string());
            lines.push(Self::render_candle_table(&trade.candles_before));
            lines.push(String::new());
        }

        lines.push("### Execution".to_string());
        lines.push(format!("- Order type: {}", trade.order_type));
        lines.push(format!("- Avg fill price: {}", trade.avg_fill_price()));
        lines.push(format!("- Quantity: {}", trade.quantity));
        lines.push(format!("- Notional: {}", trade.notional_value()));
        lines.push(format!("- Commission: {}", trade.total_commission()));
        lines.push(String::new());

        if !trade.candles_after.is_empty() {
            lines.push("### After entry (5m)".to_string());
            lines.push(Self::render_candle_table(&trade.candles_after));
            lines.push(String::new());
        }

        lines.join("\n")
    }

    fn render_candle_table(candles: &[Candle]) -> String {
        let mut lines = vec![
            "| Time | Open | High | Low | Close | Volume |".to_string(),
            "|------|------|------|-----|-------|--------|".to_string(),
        ];
        for candle in candles {
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} |",
                candle.open_time.format("%H:%M"),
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.volume
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use crate::domain::order::{Fill, OrderType};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_render_contains_sections() {
        let ts = Utc.timestamp_opt(1_704_103_200, 0).unwrap();
        let journal = TradeJournal {
            date: ts,
            summary: DailySummary {
                total_trades: 1,
                buy_count: 1,
                sell_count: 0,
                total_commission: dec!(105),
                symbols_traded: vec!["005930".to_string()],
                strategy_name: "pullback_v1".to_string(),
            },
            trades: vec![TradeEntry {
                order_id: "ORD-1".to_string(),
                symbol: "005930".to_string(),
                side: OrderSide::Buy,
                order_type: OrderType::Market,
                quantity: 10,
                created_at: ts,
                strategy_name: "pullback_v1".to_string(),
                confidence: 0.8,
                reason: "entry_trigger".to_string(),
                fills: vec![Fill {
                    fill_id: "FILL-ORD-1-1".to_string(),
                    order_id: "ORD-1".to_string(),
                    broker_fill_id: None,
                    quantity: 10,
                    price: dec!(70000),
                    commission: Some(dec!(105)),
                    filled_at: ts,
                }],
                candles_before: vec![Candle {
                    symbol: "005930".to_string(),
                    timeframe: Timeframe::OneMin,
                    open_time: ts,
                    open: dec!(69900),
                    high: dec!(70100),
                    low: dec!(69800),
                    close: dec!(70000),
                    volume: 1200,
                }],
                candles_after: Vec::new(),
            }],
            portfolio_equity: dec!(10000000),
            portfolio_cash: dec!(9300000),
        };

        let rendered = JournalWriter::render(&journal);
        assert!(rendered.contains("# Daily Trading Journal - 2024-01-01"));
        assert!(rendered.contains("## Summary"));
        assert!(rendered.contains("## Trade #1: 005930 BUY"));
        assert!(rendered.contains("Confidence:** 80%"));
        assert!(rendered.contains("| Time | Open | High | Low | Close | Volume |"));
        assert!(rendered.contains("## Portfolio"));
    }
}

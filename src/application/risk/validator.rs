use crate::application::strategies::StrategyContext;
use crate::config::RiskConfig;
use crate::domain::portfolio::Portfolio;
use crate::domain::signal::{Signal, SignalAction};
use chrono::{Local, Timelike};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Outcome of pre-trade validation. A check that cannot grant the full
/// requested quantity may approve a smaller one; the final quantity is the
/// minimum over all partial approvals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub approved: bool,
    pub approved_quantity: i64,
    pub reject_reason: Option<String>,
}

impl ValidationResult {
    pub fn accept(quantity: i64) -> Self {
        Self {
            approved: true,
            approved_quantity: quantity,
            reject_reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            approved_quantity: 0,
            reject_reason: Some(reason.into()),
        }
    }
}

/// Pre-trade risk checks, applied in a fixed order with the first failure
/// short-circuiting. Holds the kill switch: once active, every validation
/// rejects until it is explicitly deactivated.
pub struct RiskValidator {
    config: RiskConfig,
    kill_switch_active: AtomicBool,
}

impl RiskValidator {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            kill_switch_active: AtomicBool::new(false),
        }
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch_active.load(Ordering::SeqCst)
    }

    pub fn activate_kill_switch(&self) {
        self.kill_switch_active.store(true, Ordering::SeqCst);
        warn!("Kill switch ACTIVATED - no new orders will be placed");
    }

    pub fn deactivate_kill_switch(&self) {
        self.kill_switch_active.store(false, Ordering::SeqCst);
        info!("Kill switch deactivated");
    }

    /// Validate a signal against the full rule chain.
    pub fn validate_signal(
        &self,
        signal: &Signal,
        portfolio: &Portfolio,
        current_price: Option<Decimal>,
        context: Option<&StrategyContext>,
    ) -> ValidationResult {
        if self.kill_switch_active() {
            return ValidationResult::reject("Kill switch is active");
        }

        if signal.action == SignalAction::Hold {
            return ValidationResult::reject("HOLD signals do not generate orders");
        }

        if !self.is_trading_hours() {
            return ValidationResult::reject("Outside trading hours");
        }

        let requested_qty = match signal.suggested_quantity.filter(|q| *q > 0) {
            Some(quantity) => quantity,
            None => {
                let Some(price) = current_price.filter(|p| *p > Decimal::ZERO) else {
                    return ValidationResult::reject(
                        "Cannot calculate position size: no price available",
                    );
                };
                let calculated = self.calculate_position_size(portfolio, price);
                if calculated <= 0 {
                    return ValidationResult::reject(
                        "Calculated position size is zero (insufficient equity)",
                    );
                }
                info!(
                    "Position size calculated: {} shares ({}% of {} equity @ {})",
                    calculated,
                    self.config.position_size_pct * Decimal::ONE_HUNDRED,
                    portfolio.total_equity,
                    price
                );
                calculated
            }
        };

        if let Some(context) = context {
            let result = self.check_max_trades_per_day(context);
            if !result.approved {
                return result;
            }
        }

        let position_result = self.check_position_size(
            &signal.symbol,
            signal.action,
            requested_qty,
            portfolio,
        );
        if !position_result.approved {
            return position_result;
        }

        let exposure_result =
            self.check_portfolio_exposure(requested_qty, current_price, portfolio);
        if !exposure_result.approved {
            return exposure_result;
        }

        let cash_result = if signal.action == SignalAction::Buy {
            let result = self.check_available_cash(requested_qty, current_price, portfolio);
            if !result.approved {
                return result;
            }
            result
        } else {
            ValidationResult::accept(requested_qty)
        };

        let daily_loss_result = self.check_daily_loss_limit(portfolio);
        if !daily_loss_result.approved {
            return daily_loss_result;
        }

        let final_qty = requested_qty
            .min(position_result.approved_quantity)
            .min(exposure_result.approved_quantity)
            .min(cash_result.approved_quantity);

        if final_qty <= 0 {
            return ValidationResult::reject("Approved quantity is zero");
        }

        if let Some(price) = current_price {
            let estimated_fee =
                price * Decimal::from(final_qty) * self.config.transaction_cost_rate;
            info!(
                "Signal approved: {} {} qty={} (requested={}), estimated_fee={}",
                signal.action, signal.symbol, final_qty, requested_qty, estimated_fee
            );
        } else {
            info!(
                "Signal approved: {} {} qty={} (requested={})",
                signal.action, signal.symbol, final_qty, requested_qty
            );
        }

        ValidationResult::accept(final_qty)
    }

    /// quantity = floor((equity * position_size_pct) / price), capped by
    /// max_position_size.
    fn calculate_position_size(&self, portfolio: &Portfolio, price: Decimal) -> i64 {
        if price <= Decimal::ZERO || portfolio.total_equity <= Decimal::ZERO {
            return 0;
        }
        let target_value = portfolio.total_equity * self.config.position_size_pct;
        let quantity = (target_value / price).trunc().to_i64().unwrap_or(0);
        quantity.min(self.config.max_position_size).max(0)
    }

    fn check_max_trades_per_day(&self, context: &StrategyContext) -> ValidationResult {
        let max_trades = self.config.max_trades_per_day;
        if context.daily_trades_count >= max_trades {
            warn!(
                "Max trades per day reached: {}/{}",
                context.daily_trades_count, max_trades
            );
            return ValidationResult::reject(format!(
                "Max trades per day reached ({}/{})",
                context.daily_trades_count, max_trades
            ));
        }
        ValidationResult::accept(i64::MAX)
    }

    fn is_trading_hours(&self) -> bool {
        let now = Local::now();
        let minutes_now = now.hour() * 60 + now.minute();
        let start = self.config.trading_start_hour * 60 + self.config.trading_start_minute;
        let end = self.config.trading_end_hour * 60 + self.config.trading_end_minute;
        (start..=end).contains(&minutes_now)
    }

    /// Per-symbol cap: if the cap would be exceeded, approve the remaining
    /// headroom rather than rejecting outright.
    fn check_position_size(
        &self,
        symbol: &str,
        action: SignalAction,
        quantity: i64,
        portfolio: &Portfolio,
    ) -> ValidationResult {
        let current_qty = portfolio.position_quantity(symbol);
        let resulting_qty = match action {
            SignalAction::Sell => current_qty - quantity,
            _ => current_qty + quantity,
        };

        if resulting_qty.abs() > self.config.max_position_size {
            let headroom = self.config.max_position_size - current_qty.abs();
            if headroom <= 0 {
                return ValidationResult::reject(format!(
                    "Position size limit reached for {symbol}"
                ));
            }
            return ValidationResult::accept(headroom);
        }
        ValidationResult::accept(quantity)
    }

    fn check_portfolio_exposure(
        &self,
        quantity: i64,
        current_price: Option<Decimal>,
        portfolio: &Portfolio,
    ) -> ValidationResult {
        let Some(price) = current_price else {
            return ValidationResult::accept(quantity);
        };
        if portfolio.total_equity <= Decimal::ZERO {
            return ValidationResult::accept(quantity);
        }

        let order_value = price * Decimal::from(quantity);
        let position_value = portfolio.total_position_value();
        let projected = (position_value + order_value) / portfolio.total_equity;

        if projected > self.config.max_portfolio_exposure_pct {
            let max_additional =
                portfolio.total_equity * self.config.max_portfolio_exposure_pct - position_value;
            if max_additional <= Decimal::ZERO {
                return ValidationResult::reject("Portfolio exposure limit reached");
            }
            let max_qty = (max_additional / price).trunc().to_i64().unwrap_or(0);
            if max_qty <= 0 {
                return ValidationResult::reject("Portfolio exposure limit reached");
            }
            return ValidationResult::accept(max_qty);
        }
        ValidationResult::accept(quantity)
    }

    /// BUY affordability including fees: price * qty * (1 + rate) <= cash,
    /// otherwise approve floor(cash / (price * (1 + rate))).
    fn check_available_cash(
        &self,
        quantity: i64,
        current_price: Option<Decimal>,
        portfolio: &Portfolio,
    ) -> ValidationResult {
        let Some(price) = current_price else {
            return ValidationResult::accept(quantity);
        };

        let effective_price = price * (Decimal::ONE + self.config.transaction_cost_rate);
        let total_cost = effective_price * Decimal::from(quantity);

        if total_cost > portfolio.cash {
            let max_qty = (portfolio.cash / effective_price).trunc().to_i64().unwrap_or(0);
            if max_qty <= 0 {
                return ValidationResult::reject(format!(
                    "Insufficient cash (need {:.0}, have {:.0})",
                    total_cost, portfolio.cash
                ));
            }
            return ValidationResult::accept(max_qty);
        }
        ValidationResult::accept(quantity)
    }

    fn check_daily_loss_limit(&self, portfolio: &Portfolio) -> ValidationResult {
        if portfolio.daily_pnl > -self.config.daily_loss_limit {
            ValidationResult::accept(i64::MAX)
        } else {
            ValidationResult::reject("Daily loss limit exceeded")
        }
    }
}

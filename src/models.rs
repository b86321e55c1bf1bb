// src/models.rs
use crate::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    // Stored as given; there is no login flow that would check it.
    pub password: String,
    pub balance: Decimal,
}

/// A user's holding of one currency.
#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    pub user_id: String,
    pub symbol: String,
    pub amount: Decimal,
    pub average_price: Decimal,
}

impl Wallet {
    /// Unrealized gain or loss against the cost basis, in percent.
    pub fn profitability(&self, current_price: Decimal) -> Decimal {
        if self.average_price.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.average_price)
            .checked_div(self.average_price)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    Buy,
    Sell,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "buy",
            TradeKind::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeKind::Buy),
            "sell" => Ok(TradeKind::Sell),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// One row of the append-only transaction log.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: String,
    pub user_id: String,
    pub kind: TradeKind,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Currency {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

/// Raw form body of the buy and sell endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TradeForm {
    pub symbol: Option<String>,
    pub quantity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchForm {
    pub symbol: Option<String>,
}

/// A validated trade request: uppercase symbol and a strictly positive quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOrder {
    symbol: String,
    quantity: Decimal,
}

impl TradeOrder {
    pub fn new(symbol: &str, quantity: Decimal) -> Result<Self, AppError> {
        let symbol = normalize_symbol(symbol).ok_or(AppError::InvalidInput)?;
        if quantity <= Decimal::ZERO {
            return Err(AppError::InvalidInput);
        }
        Ok(TradeOrder { symbol, quantity })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }
}

impl TryFrom<TradeForm> for TradeOrder {
    type Error = AppError;

    fn try_from(form: TradeForm) -> Result<Self, Self::Error> {
        let symbol = form.symbol.ok_or(AppError::InvalidInput)?;
        let quantity = form
            .quantity
            .as_deref()
            .map(str::trim)
            .and_then(|q| Decimal::from_str(q).ok())
            .ok_or(AppError::InvalidInput)?;
        TradeOrder::new(&symbol, quantity)
    }
}

/// Trims and uppercases a ticker, `None` when nothing is left.
pub fn normalize_symbol(symbol: &str) -> Option<String> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol.to_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletDetail {
    pub symbol: String,
    pub amount: Decimal,
    pub average_price: String,
    pub profitability: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub wallet_details: Vec<WalletDetail>,
    pub total_balance: String,
}

/// Two decimals, half away from zero, comma-grouped thousands: `1234.565` -> `1,234.57`.
pub fn format_money(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    let text = rounded.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}{}.{}", sign, grouped, frac_part)
}

/// Quantities are shown without trailing zeros.
pub fn format_quantity(value: Decimal) -> String {
    value.normalize().to_string()
}

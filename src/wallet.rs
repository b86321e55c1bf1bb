// src/wallet.rs
use crate::db::Store;
use crate::error::AppError;
use crate::ledger::{TransactionLedger, UserLedger, WalletLedger};
use crate::market::{current_prices, MarketData};
use crate::models::{
    format_money, format_quantity, Currency, Portfolio, TradeKind, TradeOrder,
    TransactionRecord, User, Wallet, WalletDetail,
};
use chrono::Utc;
use log::{info, warn};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of a buy or sell request. Only `Bought` and `Sold` changed any state.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Bought {
        quantity: Decimal,
        symbol: String,
        total_cost: Decimal,
    },
    Sold {
        quantity: Decimal,
        symbol: String,
        total_value: Decimal,
    },
    InvalidIndex,
    InsufficientFunds {
        needed: Decimal,
        available: Decimal,
    },
    EmptyWallet,
    NoHolding {
        symbol: String,
    },
    InsufficientHoldings {
        symbol: String,
        held: Decimal,
    },
}

impl Settlement {
    pub fn is_executed(&self) -> bool {
        matches!(self, Settlement::Bought { .. } | Settlement::Sold { .. })
    }
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Settlement::Bought {
                quantity,
                symbol,
                total_cost,
            } => write!(
                f,
                "You bought {} {} for ${}.",
                format_quantity(*quantity),
                symbol,
                format_money(*total_cost)
            ),
            Settlement::Sold {
                quantity,
                symbol,
                total_value,
            } => write!(
                f,
                "You sold {} {} for ${}.",
                format_quantity(*quantity),
                symbol,
                format_money(*total_value)
            ),
            Settlement::InvalidIndex => write!(f, "Invalid index."),
            Settlement::InsufficientFunds { needed, available } => write!(
                f,
                "You need ${} but you have ${}.",
                format_money(*needed),
                format_money(*available)
            ),
            Settlement::EmptyWallet => write!(f, "There are no items in your wallet."),
            Settlement::NoHolding { symbol } => write!(
                f,
                "There are no items in your wallet with the symbol {}.",
                symbol
            ),
            Settlement::InsufficientHoldings { symbol, held } => write!(
                f,
                "You only have {} of {} to sell.",
                format_quantity(*held),
                symbol
            ),
        }
    }
}

/// Buys and sells against live prices and keeps balance, holdings and the
/// transaction log in step.
pub struct WalletService {
    market: Arc<dyn MarketData>,
    store: Arc<dyn Store>,
    users: UserLedger,
    wallets: WalletLedger,
    transactions: TransactionLedger,
    // Held from the balance read until the changeset is committed.
    settlement_lock: Mutex<()>,
}

impl WalletService {
    pub fn new(market: Arc<dyn MarketData>, store: Arc<dyn Store>) -> Self {
        WalletService {
            market,
            users: UserLedger::new(store.clone()),
            wallets: WalletLedger::new(store.clone()),
            transactions: TransactionLedger::new(store.clone()),
            store,
            settlement_lock: Mutex::new(()),
        }
    }

    pub fn users(&self) -> &UserLedger {
        &self.users
    }

    pub async fn user_by_name(&self, username: &str) -> Result<User, AppError> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))
    }

    async fn user_by_id(&self, user_id: &str) -> Result<User, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))
    }

    pub async fn top_currencies(&self) -> Result<Vec<Currency>, AppError> {
        Ok(self.market.fetch_top().await?)
    }

    pub async fn find_currency(&self, symbol: &str) -> Result<Currency, AppError> {
        Ok(self.market.find_by_symbol(symbol).await?)
    }

    pub async fn buy(&self, user_id: &str, order: &TradeOrder) -> Result<Settlement, AppError> {
        let _guard = self.settlement_lock.lock().await;
        let symbol = order.symbol();
        let quantity = order.quantity();

        let prices = current_prices(self.market.as_ref()).await;
        let price = match prices.get(symbol) {
            Some(price) => *price,
            None => return Ok(Settlement::InvalidIndex),
        };
        let total_cost = price.checked_mul(quantity).ok_or(AppError::InvalidInput)?;

        let user = self.user_by_id(user_id).await?;
        if user.balance < total_cost {
            return Ok(Settlement::InsufficientFunds {
                needed: total_cost,
                available: user.balance,
            });
        }

        let balance = user
            .balance
            .checked_sub(total_cost)
            .ok_or(AppError::InvalidInput)?;
        let wallet_change = match self.wallets.find(user_id, symbol).await? {
            Some(existing) => {
                let amount = existing
                    .amount
                    .checked_add(quantity)
                    .ok_or(AppError::InvalidInput)?;
                let average_price = existing
                    .average_price
                    .checked_mul(existing.amount)
                    .and_then(|held| held.checked_add(total_cost))
                    .and_then(|cost| cost.checked_div(amount))
                    .ok_or(AppError::InvalidInput)?;
                self.wallets.update(&Wallet {
                    amount,
                    average_price,
                    ..existing
                })
            }
            None => self.wallets.create(&Wallet {
                user_id: user_id.to_string(),
                symbol: symbol.to_string(),
                amount: quantity,
                average_price: price,
            }),
        };

        self.store
            .commit(vec![
                wallet_change,
                self.users.update_balance(user_id, balance),
                self.transactions.record(
                    user_id,
                    TradeKind::Buy,
                    symbol,
                    price,
                    quantity,
                    Utc::now(),
                ),
            ])
            .await?;

        info!(
            "{} bought {} {} at {} (total {})",
            user.username, quantity, symbol, price, total_cost
        );
        Ok(Settlement::Bought {
            quantity,
            symbol: symbol.to_string(),
            total_cost,
        })
    }

    pub async fn sell(&self, user_id: &str, order: &TradeOrder) -> Result<Settlement, AppError> {
        let _guard = self.settlement_lock.lock().await;
        let symbol = order.symbol();
        let quantity = order.quantity();

        let prices = current_prices(self.market.as_ref()).await;
        let wallets = self.wallets.list_for_user(user_id).await?;
        if wallets.is_empty() {
            return Ok(Settlement::EmptyWallet);
        }
        let wallet = match wallets.into_iter().find(|w| w.symbol == symbol) {
            Some(wallet) => wallet,
            None => {
                return Ok(Settlement::NoHolding {
                    symbol: symbol.to_string(),
                })
            }
        };
        if wallet.amount < quantity {
            return Ok(Settlement::InsufficientHoldings {
                symbol: symbol.to_string(),
                held: wallet.amount,
            });
        }

        let current_price = match prices.get(symbol) {
            Some(price) => *price,
            None => {
                warn!("No price for {}, selling at zero", symbol);
                Decimal::ZERO
            }
        };
        let total_value = current_price
            .checked_mul(quantity)
            .ok_or(AppError::InvalidInput)?;
        let remaining = wallet.amount - quantity;

        let wallet_change = if remaining > Decimal::ZERO {
            self.wallets.update_amount(user_id, symbol, remaining)
        } else {
            self.wallets.remove(user_id, symbol)
        };

        let user = self.user_by_id(user_id).await?;
        let balance = user
            .balance
            .checked_add(total_value)
            .ok_or(AppError::InvalidInput)?;
        self.store
            .commit(vec![
                wallet_change,
                self.users.update_balance(user_id, balance),
                self.transactions.record(
                    user_id,
                    TradeKind::Sell,
                    symbol,
                    current_price,
                    quantity,
                    Utc::now(),
                ),
            ])
            .await?;

        info!(
            "{} sold {} {} at {} (total {})",
            user.username, quantity, symbol, current_price, total_value
        );
        Ok(Settlement::Sold {
            quantity,
            symbol: symbol.to_string(),
            total_value,
        })
    }

    /// Holdings with their profitability against current prices, plus the cash balance.
    pub async fn display(&self, user_id: &str) -> Result<Portfolio, AppError> {
        let user = self.user_by_id(user_id).await?;
        let wallets = self.wallets.list_for_user(user_id).await?;
        let prices = current_prices(self.market.as_ref()).await;

        let wallet_details = wallets
            .into_iter()
            .map(|wallet| {
                let current_price = prices.get(&wallet.symbol).copied().unwrap_or_default();
                let profitability = wallet.profitability(current_price);
                WalletDetail {
                    amount: wallet.amount.normalize(),
                    average_price: format_money(wallet.average_price),
                    profitability: format!("{}%", format_money(profitability)),
                    symbol: wallet.symbol,
                }
            })
            .collect();

        Ok(Portfolio {
            wallet_details,
            total_balance: format_money(user.balance),
        })
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<TransactionRecord>, AppError> {
        Ok(self.transactions.history(user_id).await?)
    }
}

// src/ledger.rs
use crate::db::{Filter, Mutation, Row, Store, Table};
use crate::error::DbError;
use crate::models::{TradeKind, TransactionRecord, User, Wallet};
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

fn text(row: &Row, table: Table, column: &'static str) -> Result<String, DbError> {
    row.get(column).cloned().ok_or_else(|| DbError::Decode {
        table: table.name(),
        reason: format!("missing column {}", column),
    })
}

fn decimal(row: &Row, table: Table, column: &'static str) -> Result<Decimal, DbError> {
    let raw = text(row, table, column)?;
    Decimal::from_str(&raw).map_err(|e| DbError::Decode {
        table: table.name(),
        reason: format!("{} = '{}': {}", column, raw, e),
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct UserLedger {
    store: Arc<dyn Store>,
}

impl UserLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        UserLedger { store }
    }

    fn decode(row: &Row) -> Result<User, DbError> {
        Ok(User {
            id: text(row, Table::Users, "id")?,
            username: text(row, Table::Users, "username")?,
            password: text(row, Table::Users, "password")?,
            balance: decimal(row, Table::Users, "balance")?,
        })
    }

    async fn find_one(&self, filter: Filter) -> Result<Option<User>, DbError> {
        let rows = self.store.find_by(Table::Users, &filter).await?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => Self::decode(row).map(Some),
            _ => Err(DbError::Conflict(format!(
                "{} users match {:?}",
                rows.len(),
                filter.conditions()
            ))),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>, DbError> {
        self.find_one(Filter::new().eq("id", id)).await
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        self.find_one(Filter::new().eq("username", username)).await
    }

    pub async fn add(
        &self,
        username: &str,
        password: &str,
        balance: Decimal,
    ) -> Result<User, DbError> {
        if self.find_by_username(username).await?.is_some() {
            return Err(DbError::Conflict(format!(
                "username {} is taken",
                username
            )));
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password: password.to_string(),
            balance,
        };
        let mut row = Row::new();
        row.insert("id", user.id.clone());
        row.insert("username", user.username.clone());
        row.insert("password", user.password.clone());
        row.insert("balance", user.balance.to_string());
        self.store.insert(Table::Users, row).await?;
        info!("Created user {}", user.username);
        Ok(user)
    }

    /// Returns the configured user, creating it with `balance` on first start.
    pub async fn ensure(
        &self,
        username: &str,
        password: &str,
        balance: Decimal,
    ) -> Result<User, DbError> {
        match self.find_by_username(username).await? {
            Some(user) => Ok(user),
            None => self.add(username, password, balance).await,
        }
    }

    pub fn update_balance(&self, user_id: &str, balance: Decimal) -> Mutation {
        let mut set = Row::new();
        set.insert("balance", balance.to_string());
        Mutation::Update {
            table: Table::Users,
            set,
            filter: Filter::new().eq("id", user_id),
        }
    }

    /// Removes the user together with their wallets and transaction log.
    pub async fn delete(&self, user_id: &str) -> Result<(), DbError> {
        let changeset = vec![
            Mutation::Delete {
                table: Table::Wallets,
                filter: Filter::new().eq("user_id", user_id),
            },
            Mutation::Delete {
                table: Table::Transactions,
                filter: Filter::new().eq("user_id", user_id),
            },
            Mutation::Delete {
                table: Table::Users,
                filter: Filter::new().eq("id", user_id),
            },
        ];
        self.store.commit(changeset).await
    }

    /// Drops any existing account under `username` and starts it over with `balance`.
    pub async fn reset(
        &self,
        username: &str,
        password: &str,
        balance: Decimal,
    ) -> Result<User, DbError> {
        if let Some(existing) = self.find_by_username(username).await? {
            self.delete(&existing.id).await?;
            info!("Deleted user {} and their history", username);
        }
        self.add(username, password, balance).await
    }
}

pub struct WalletLedger {
    store: Arc<dyn Store>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        WalletLedger { store }
    }

    fn decode(row: &Row) -> Result<Wallet, DbError> {
        Ok(Wallet {
            user_id: text(row, Table::Wallets, "user_id")?,
            symbol: text(row, Table::Wallets, "symbol")?,
            amount: decimal(row, Table::Wallets, "amount")?,
            average_price: decimal(row, Table::Wallets, "average_price")?,
        })
    }

    async fn load(&self, filter: Filter) -> Result<Vec<Wallet>, DbError> {
        let rows = self.store.find_by(Table::Wallets, &filter).await?;
        let mut wallets = Vec::with_capacity(rows.len());
        for row in &rows {
            let wallet = Self::decode(row)?;
            // Emptied holdings are never shown.
            if wallet.amount > Decimal::ZERO {
                wallets.push(wallet);
            }
        }
        wallets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(wallets)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Wallet>, DbError> {
        self.load(Filter::new().eq("user_id", user_id)).await
    }

    pub async fn find(&self, user_id: &str, symbol: &str) -> Result<Option<Wallet>, DbError> {
        let wallets = self
            .load(Filter::new().eq("user_id", user_id).eq("symbol", symbol))
            .await?;
        Ok(wallets.into_iter().next())
    }

    pub fn create(&self, wallet: &Wallet) -> Mutation {
        let mut row = Row::new();
        row.insert("user_id", wallet.user_id.clone());
        row.insert("symbol", wallet.symbol.clone());
        row.insert("amount", wallet.amount.to_string());
        row.insert("average_price", wallet.average_price.to_string());
        Mutation::Insert {
            table: Table::Wallets,
            row,
        }
    }

    pub fn update(&self, wallet: &Wallet) -> Mutation {
        let mut set = Row::new();
        set.insert("amount", wallet.amount.to_string());
        set.insert("average_price", wallet.average_price.to_string());
        Mutation::Update {
            table: Table::Wallets,
            set,
            filter: Self::key(&wallet.user_id, &wallet.symbol),
        }
    }

    pub fn update_amount(&self, user_id: &str, symbol: &str, amount: Decimal) -> Mutation {
        let mut set = Row::new();
        set.insert("amount", amount.to_string());
        Mutation::Update {
            table: Table::Wallets,
            set,
            filter: Self::key(user_id, symbol),
        }
    }

    pub fn remove(&self, user_id: &str, symbol: &str) -> Mutation {
        Mutation::Delete {
            table: Table::Wallets,
            filter: Self::key(user_id, symbol),
        }
    }

    fn key(user_id: &str, symbol: &str) -> Filter {
        Filter::new().eq("user_id", user_id).eq("symbol", symbol)
    }
}

pub struct TransactionLedger {
    store: Arc<dyn Store>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        TransactionLedger { store }
    }

    pub fn record(
        &self,
        user_id: &str,
        kind: TradeKind,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Mutation {
        let mut row = Row::new();
        row.insert("id", Uuid::new_v4().to_string());
        row.insert("user_id", user_id.to_string());
        row.insert("kind", kind.as_str().to_string());
        row.insert("symbol", symbol.to_string());
        row.insert("price", price.to_string());
        row.insert("quantity", quantity.to_string());
        row.insert("created_at", timestamp(at));
        Mutation::Insert {
            table: Table::Transactions,
            row,
        }
    }

    /// The user's transactions, newest first.
    pub async fn history(&self, user_id: &str) -> Result<Vec<TransactionRecord>, DbError> {
        let rows = self
            .store
            .find_by(Table::Transactions, &Filter::new().eq("user_id", user_id))
            .await?;
        let mut records = rows
            .iter()
            .map(Self::decode)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    fn decode(row: &Row) -> Result<TransactionRecord, DbError> {
        let table = Table::Transactions;
        let kind = text(row, table, "kind")?;
        let created_at = text(row, table, "created_at")?;
        Ok(TransactionRecord {
            id: text(row, table, "id")?,
            user_id: text(row, table, "user_id")?,
            kind: TradeKind::from_str(&kind).map_err(|reason| DbError::Decode {
                table: table.name(),
                reason,
            })?,
            symbol: text(row, table, "symbol")?,
            price: decimal(row, table, "price")?,
            quantity: decimal(row, table, "quantity")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| DbError::Decode {
                    table: table.name(),
                    reason: format!("created_at = '{}': {}", created_at, e),
                })?
                .with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use chrono::Duration;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn store() -> (Arc<MemoryStore>, Arc<dyn Store>) {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        (memory, store)
    }

    #[tokio::test]
    async fn users_are_found_by_id_and_username() {
        let (_, store) = store();
        let users = UserLedger::new(store);
        let created = users.add("Customer", "pw", dec("1000")).await.unwrap();

        let by_name = users.find_by_username("Customer").await.unwrap().unwrap();
        assert_eq!(by_name, created);
        let by_id = users.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(by_id.balance, dec("1000"));
        assert!(users.find_by_username("Nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn usernames_are_unique_and_ensure_is_idempotent() {
        let (memory, store) = store();
        let users = UserLedger::new(store);
        let first = users.ensure("Customer", "pw", dec("1000")).await.unwrap();
        let second = users.ensure("Customer", "other", dec("5")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(memory.row_count(Table::Users), 1);

        let err = users.add("Customer", "pw", dec("1")).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn balance_updates_keep_exact_decimals() {
        let (_, store) = store();
        let users = UserLedger::new(store.clone());
        let user = users.add("Customer", "pw", dec("1000")).await.unwrap();

        store
            .commit(vec![users.update_balance(&user.id, dec("799.995"))])
            .await
            .unwrap();
        let reloaded = users.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance, dec("799.995"));
    }

    #[tokio::test]
    async fn empty_wallets_are_invisible() {
        let (_, store) = store();
        let wallets = WalletLedger::new(store.clone());
        let held = Wallet {
            user_id: "u1".into(),
            symbol: "ETH".into(),
            amount: dec("1.5"),
            average_price: dec("2000"),
        };
        let emptied = Wallet {
            symbol: "BTC".into(),
            amount: Decimal::ZERO,
            ..held.clone()
        };
        store
            .commit(vec![wallets.create(&held), wallets.create(&emptied)])
            .await
            .unwrap();

        let listed = wallets.list_for_user("u1").await.unwrap();
        assert_eq!(listed, vec![held.clone()]);
        assert!(wallets.find("u1", "BTC").await.unwrap().is_none());
        assert_eq!(wallets.find("u1", "ETH").await.unwrap(), Some(held));
        assert!(wallets.list_for_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wallet_mutations_target_one_holding() {
        let (memory, store) = store();
        let wallets = WalletLedger::new(store.clone());
        let btc = Wallet {
            user_id: "u1".into(),
            symbol: "BTC".into(),
            amount: dec("2"),
            average_price: dec("100"),
        };
        let eth = Wallet {
            symbol: "ETH".into(),
            ..btc.clone()
        };
        store
            .commit(vec![wallets.create(&btc), wallets.create(&eth)])
            .await
            .unwrap();

        store
            .commit(vec![wallets.update_amount("u1", "BTC", dec("0.5"))])
            .await
            .unwrap();
        let btc_now = wallets.find("u1", "BTC").await.unwrap().unwrap();
        assert_eq!(btc_now.amount, dec("0.5"));
        assert_eq!(btc_now.average_price, dec("100"));

        store
            .commit(vec![wallets.remove("u1", "BTC")])
            .await
            .unwrap();
        assert_eq!(memory.row_count(Table::Wallets), 1);
        assert!(wallets.find("u1", "ETH").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let (_, store) = store();
        let log = TransactionLedger::new(store.clone());
        let t0 = Utc::now();
        store
            .commit(vec![
                log.record("u1", TradeKind::Buy, "BTC", dec("100"), dec("2"), t0),
                log.record(
                    "u1",
                    TradeKind::Sell,
                    "BTC",
                    dec("300"),
                    dec("2"),
                    t0 + Duration::seconds(5),
                ),
                log.record("u2", TradeKind::Buy, "ETH", dec("1"), dec("1"), t0),
            ])
            .await
            .unwrap();

        let history = log.history("u1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TradeKind::Sell);
        assert_eq!(history[0].price, dec("300"));
        assert_eq!(history[1].kind, TradeKind::Buy);
        assert_eq!(history[1].created_at, history[0].created_at - Duration::seconds(5));
    }

    #[tokio::test]
    async fn deleting_a_user_cascades() {
        let (memory, store) = store();
        let users = UserLedger::new(store.clone());
        let wallets = WalletLedger::new(store.clone());
        let log = TransactionLedger::new(store.clone());
        let user = users.add("Customer", "pw", dec("10")).await.unwrap();
        let other = users.add("Other", "pw", dec("10")).await.unwrap();
        let wallet = Wallet {
            user_id: user.id.clone(),
            symbol: "BTC".into(),
            amount: dec("1"),
            average_price: dec("1"),
        };
        let other_wallet = Wallet {
            user_id: other.id.clone(),
            ..wallet.clone()
        };
        store
            .commit(vec![
                wallets.create(&wallet),
                wallets.create(&other_wallet),
                log.record(&user.id, TradeKind::Buy, "BTC", dec("1"), dec("1"), Utc::now()),
            ])
            .await
            .unwrap();

        users.delete(&user.id).await.unwrap();

        assert!(users.find_by_id(&user.id).await.unwrap().is_none());
        assert!(users.find_by_id(&other.id).await.unwrap().is_some());
        assert_eq!(memory.row_count(Table::Wallets), 1);
        assert_eq!(memory.row_count(Table::Transactions), 0);
    }

    #[tokio::test]
    async fn reset_starts_the_account_over() {
        let (memory, store) = store();
        let users = UserLedger::new(store.clone());
        let wallets = WalletLedger::new(store.clone());
        let log = TransactionLedger::new(store.clone());
        let user = users.add("Customer", "pw", dec("10")).await.unwrap();
        store
            .commit(vec![
                wallets.create(&Wallet {
                    user_id: user.id.clone(),
                    symbol: "BTC".into(),
                    amount: dec("1"),
                    average_price: dec("1"),
                }),
                log.record(&user.id, TradeKind::Buy, "BTC", dec("1"), dec("1"), Utc::now()),
            ])
            .await
            .unwrap();

        let fresh = users.reset("Customer", "pw", dec("1000")).await.unwrap();
        assert_ne!(fresh.id, user.id);
        assert_eq!(fresh.balance, dec("1000"));
        assert_eq!(memory.row_count(Table::Users), 1);
        assert_eq!(memory.row_count(Table::Wallets), 0);
        assert_eq!(memory.row_count(Table::Transactions), 0);

        let created = users.reset("Newcomer", "pw", dec("5")).await.unwrap();
        assert_eq!(created.balance, dec("5"));
        assert_eq!(memory.row_count(Table::Users), 2);
    }

    #[tokio::test]
    async fn malformed_rows_are_decode_errors() {
        let (_, store) = store();
        let mut row = Row::new();
        row.insert("user_id", "u1".to_string());
        row.insert("symbol", "BTC".to_string());
        row.insert("amount", "two".to_string());
        row.insert("average_price", "1".to_string());
        store.insert(Table::Wallets, row).await.unwrap();

        let err = WalletLedger::new(store).list_for_user("u1").await.unwrap_err();
        assert!(matches!(err, DbError::Decode { .. }));
    }
}

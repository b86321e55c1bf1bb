// src/db.rs
use crate::error::DbError;
use async_trait::async_trait;
use log::{debug, info};
use scylla::batch::{Batch, BatchType};
use scylla::frame::response::result::CqlValue;
use scylla::query::Query;
use scylla::{Session, SessionBuilder};
use std::collections::BTreeMap;

/// The three logical tables of the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Users,
    Wallets,
    Transactions,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Wallets => "wallets",
            Table::Transactions => "transactions",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Users => &["id", "username", "password", "balance"],
            Table::Wallets => &["user_id", "symbol", "amount", "average_price"],
            Table::Transactions => &[
                "user_id",
                "created_at",
                "id",
                "kind",
                "symbol",
                "price",
                "quantity",
            ],
        }
    }

    /// Primary key columns, partition key first.
    pub fn key(&self) -> &'static [&'static str] {
        match self {
            Table::Users => &["id"],
            Table::Wallets => &["user_id", "symbol"],
            Table::Transactions => &["user_id", "created_at", "id"],
        }
    }

    fn column(&self, name: &str) -> Result<&'static str, DbError> {
        self.columns()
            .iter()
            .copied()
            .find(|c| *c == name)
            .ok_or_else(|| DbError::Query(format!("no column {} in {}", name, self.name())))
    }
}

/// Column name -> textual cell value.
pub type Row = BTreeMap<&'static str, String>;

/// Conjunction of column equalities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(&'static str, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.conditions.push((column, value.into()));
        self
    }

    pub fn conditions(&self) -> &[(&'static str, String)] {
        &self.conditions
    }

    #[cfg(test)]
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert { table: Table, row: Row },
    Update { table: Table, set: Row, filter: Filter },
    Delete { table: Table, filter: Filter },
}

impl Mutation {
    pub fn table(&self) -> Table {
        match self {
            Mutation::Insert { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::Delete { table, .. } => *table,
        }
    }

    /// Rejects unknown columns, partial inserts and key updates.
    pub fn validate(&self) -> Result<(), DbError> {
        let table = self.table();
        match self {
            Mutation::Insert { row, .. } => {
                for column in row.keys() {
                    table.column(column)?;
                }
                if let Some(missing) = table.columns().iter().find(|c| !row.contains_key(*c)) {
                    return Err(DbError::Query(format!(
                        "insert into {} without {}",
                        table.name(),
                        missing
                    )));
                }
            }
            Mutation::Update { set, filter, .. } => {
                if set.is_empty() {
                    return Err(DbError::Query(format!("empty update of {}", table.name())));
                }
                for column in set.keys() {
                    table.column(column)?;
                    if table.key().contains(column) {
                        return Err(DbError::Query(format!(
                            "cannot update key column {} of {}",
                            column,
                            table.name()
                        )));
                    }
                }
                validate_filter(table, filter)?;
            }
            Mutation::Delete { filter, .. } => validate_filter(table, filter)?,
        }
        Ok(())
    }
}

fn validate_filter(table: Table, filter: &Filter) -> Result<(), DbError> {
    if filter.conditions().is_empty() {
        return Err(DbError::Query(format!(
            "unfiltered write to {}",
            table.name()
        )));
    }
    for (column, _) in filter.conditions() {
        table.column(column)?;
    }
    Ok(())
}

/// Generic row store behind the ledgers.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_by(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, DbError>;

    /// Applies every mutation or none of them.
    async fn commit(&self, changeset: Vec<Mutation>) -> Result<(), DbError>;

    async fn insert(&self, table: Table, row: Row) -> Result<(), DbError> {
        self.commit(vec![Mutation::Insert { table, row }]).await
    }
}

pub struct ScyllaStore {
    session: Session,
    keyspace: String,
}

impl ScyllaStore {
    /// Connects and creates the keyspace, tables and indexes if they don't exist.
    pub async fn init(node: &str, keyspace: &str) -> Result<Self, DbError> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let store = ScyllaStore {
            session,
            keyspace: keyspace.to_string(),
        };
        store.create_schema().await?;

        info!("Successfully connected to ScyllaDB at {}.", node);
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), DbError> {
        let ks = &self.keyspace;
        let statements = [
            format!("CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.users (id TEXT PRIMARY KEY, username TEXT, password TEXT, balance TEXT)", ks),
            format!("CREATE INDEX IF NOT EXISTS users_username_idx ON {}.users (username)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.wallets (user_id TEXT, symbol TEXT, amount TEXT, average_price TEXT, PRIMARY KEY (user_id, symbol))", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.transactions (user_id TEXT, created_at TEXT, id TEXT, kind TEXT, symbol TEXT, price TEXT, quantity TEXT, PRIMARY KEY (user_id, created_at, id)) WITH CLUSTERING ORDER BY (created_at DESC, id ASC)", ks),
        ];
        for statement in statements.iter() {
            self.session
                .query(statement.as_str(), &[])
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
        }
        Ok(())
    }
}

/// CQL text and bind values for one mutation, values in marker order.
fn statement(keyspace: &str, mutation: &Mutation) -> (String, Vec<String>) {
    let table = format!("{}.{}", keyspace, mutation.table().name());
    match mutation {
        Mutation::Insert { row, .. } => {
            let columns: Vec<&str> = row.keys().copied().collect();
            let markers = vec!["?"; columns.len()].join(", ");
            let cql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                markers
            );
            (cql, row.values().cloned().collect())
        }
        Mutation::Update { set, filter, .. } => {
            let assignments: Vec<String> =
                set.keys().map(|column| format!("{} = ?", column)).collect();
            let cql = format!(
                "UPDATE {} SET {}{}",
                table,
                assignments.join(", "),
                where_clause(filter)
            );
            let values = set
                .values()
                .cloned()
                .chain(filter.conditions().iter().map(|(_, v)| v.clone()))
                .collect();
            (cql, values)
        }
        Mutation::Delete { filter, .. } => {
            let cql = format!("DELETE FROM {}{}", table, where_clause(filter));
            (cql, filter.conditions().iter().map(|(_, v)| v.clone()).collect())
        }
    }
}

fn where_clause(filter: &Filter) -> String {
    if filter.conditions().is_empty() {
        return String::new();
    }
    let predicates: Vec<String> = filter
        .conditions()
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect();
    format!(" WHERE {}", predicates.join(" AND "))
}

#[async_trait]
impl Store for ScyllaStore {
    async fn find_by(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, DbError> {
        for (column, _) in filter.conditions() {
            table.column(column)?;
        }
        let columns = table.columns();
        let cql = format!(
            "SELECT {} FROM {}.{}{}",
            columns.join(", "),
            self.keyspace,
            table.name(),
            where_clause(filter)
        );
        let values: Vec<String> = filter.conditions().iter().map(|(_, v)| v.clone()).collect();
        debug!("{}", cql);

        let result = self
            .session
            .query(Query::new(cql), values)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let mut rows = Vec::new();
        for raw in result.rows.unwrap_or_default() {
            let mut row = Row::new();
            for (name, value) in columns.iter().zip(raw.columns.into_iter()) {
                let text = match value {
                    Some(CqlValue::Text(text)) => text,
                    other => {
                        return Err(DbError::Decode {
                            table: table.name(),
                            reason: format!("column {} holds {:?}", name, other),
                        })
                    }
                };
                row.insert(*name, text);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn commit(&self, changeset: Vec<Mutation>) -> Result<(), DbError> {
        for mutation in &changeset {
            mutation.validate()?;
        }

        let mut statements: Vec<(String, Vec<String>)> = changeset
            .iter()
            .map(|mutation| statement(&self.keyspace, mutation))
            .collect();

        if statements.len() > 1 {
            let mut batch = Batch::new(BatchType::Logged);
            let mut values = Vec::with_capacity(statements.len());
            for (cql, row_values) in statements {
                debug!("BATCH {}", cql);
                batch.append_statement(Query::new(cql));
                values.push(row_values);
            }
            self.session
                .batch(&batch, values)
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
        } else if let Some((cql, values)) = statements.pop() {
            debug!("{}", cql);
            self.session
                .query(Query::new(cql), values)
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
        }
        Ok(())
    }
}

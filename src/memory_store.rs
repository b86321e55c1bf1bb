// src/memory_store.rs
use crate::db::{Filter, Mutation, Row, Store, Table};
use crate::error::DbError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

type Tables = HashMap<Table, Vec<Row>>;

/// In-process `Store` for tests. A commit works on a copy of the tables and
/// only replaces them once every mutation has applied.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_commits: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Makes every following commit fail, to exercise error paths.
    pub fn fail_commits(&self, fail: bool) {
        *self.fail_commits.lock().unwrap() = fail;
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn apply(tables: &mut Tables, mutation: Mutation) -> Result<(), DbError> {
    mutation.validate()?;
    match mutation {
        Mutation::Insert { table, row } => {
            let rows = tables.entry(table).or_default();
            let same_key = |other: &Row| table.key().iter().all(|k| other.get(k) == row.get(k));
            if rows.iter().any(same_key) {
                return Err(DbError::Conflict(format!(
                    "duplicate key in {}",
                    table.name()
                )));
            }
            rows.push(row);
        }
        Mutation::Update { table, set, filter } => {
            if let Some(rows) = tables.get_mut(&table) {
                for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                    for (column, value) in &set {
                        row.insert(*column, value.clone());
                    }
                }
            }
        }
        Mutation::Delete { table, filter } => {
            if let Some(rows) = tables.get_mut(&table) {
                rows.retain(|r| !filter.matches(r));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_by(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, DbError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(&table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, changeset: Vec<Mutation>) -> Result<(), DbError> {
        if *self.fail_commits.lock().unwrap() {
            return Err(DbError::Query("commit refused".to_string()));
        }
        let mut tables = self.tables.lock().unwrap();
        let mut staged = tables.clone();
        for mutation in changeset {
            apply(&mut staged, mutation)?;
        }
        *tables = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_row(id: &str, username: &str) -> Row {
        let mut row = Row::new();
        row.insert("id", id.to_string());
        row.insert("username", username.to_string());
        row.insert("password", "secret".to_string());
        row.insert("balance", "10".to_string());
        row
    }

    #[tokio::test]
    async fn failed_changeset_leaves_no_trace() {
        let store = MemoryStore::new();
        store.insert(Table::Users, user_row("1", "a")).await.unwrap();

        let result = store
            .commit(vec![
                Mutation::Insert {
                    table: Table::Users,
                    row: user_row("2", "b"),
                },
                Mutation::Insert {
                    table: Table::Users,
                    row: user_row("1", "duplicate"),
                },
            ])
            .await;

        assert!(matches!(result, Err(DbError::Conflict(_))));
        assert_eq!(store.row_count(Table::Users), 1);
    }

    #[tokio::test]
    async fn find_by_uses_non_key_columns() {
        let store = MemoryStore::new();
        store.insert(Table::Users, user_row("1", "a")).await.unwrap();
        store.insert(Table::Users, user_row("2", "b")).await.unwrap();

        let rows = store
            .find_by(Table::Users, &Filter::new().eq("username", "b"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "2");
    }

    #[tokio::test]
    async fn refused_commits_surface_as_errors() {
        let store = MemoryStore::new();
        store.fail_commits(true);
        assert!(store.insert(Table::Users, user_row("1", "a")).await.is_err());
        assert_eq!(store.row_count(Table::Users), 0);
    }
}

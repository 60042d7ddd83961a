//! Account lookup.

use sqlx::FromRow;

use crate::error::DatabaseError;
use crate::types::{Account, AccountId};
use crate::{Error, Result};

use super::Database;

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    account_name: String,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId(row.id),
            account_name: row.account_name,
        }
    }
}

impl Database {
    /// Insert an account
    pub async fn create_account(&self, account_name: &str) -> Result<Account> {
        let result = sqlx::query("INSERT INTO accounts (account_name, created_at) VALUES (?, ?)")
            .bind(account_name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert account: {}",
                    e
                )))
            })?;

        Ok(Account {
            id: AccountId(result.last_insert_rowid()),
            account_name: account_name.to_string(),
        })
    }

    /// Get an account by ID
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, account_name FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get account: {}",
                e
            )))
        })?;

        Ok(row.map(Account::from))
    }

    /// Get an account by name
    pub async fn find_account_by_name(&self, account_name: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, account_name FROM accounts WHERE account_name = ?",
        )
        .bind(account_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find account: {}",
                e
            )))
        })?;

        Ok(row.map(Account::from))
    }
}

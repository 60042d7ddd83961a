use super::Database;
use crate::types::Account;
use tempfile::NamedTempFile;


/// Fresh database with one account; keep the file alive for the test's duration
async fn setup() -> (Database, Account, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let account = db.create_account("alice").await.unwrap();
    (db, account, temp_file)
}

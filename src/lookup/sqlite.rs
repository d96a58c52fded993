//! SQLite-backed product store.
//!
//! Uses the `products` table layout of the product management tooling, so
//! an existing `products.db` can be opened as-is.

use super::{CodeStore, ProductRecord, StoreError};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gs1_code TEXT UNIQUE,
        product_name TEXT,
        product_image TEXT,
        packaging_waste_type TEXT,
        product_waste_type TEXT,
        packaging_material TEXT,
        plastic_type TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
";

const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// How long a statement waits on a database locked by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Product store on a local SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Product database opened");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))
    }

    /// Inserts a record, replacing any existing record with the same code.
    pub fn insert(&self, record: &ProductRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO products (
                gs1_code, product_name, product_image, packaging_waste_type,
                product_waste_type, packaging_material, plastic_type
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(gs1_code) DO UPDATE SET
                product_name = excluded.product_name,
                product_image = excluded.product_image,
                packaging_waste_type = excluded.packaging_waste_type,
                product_waste_type = excluded.product_waste_type,
                packaging_material = excluded.packaging_material,
                plastic_type = excluded.plastic_type,
                updated_at = CURRENT_TIMESTAMP",
            params![
                record.code,
                record.name,
                record.image_path,
                record.packaging_waste_type,
                record.product_waste_type,
                record.packaging_material,
                record.plastic_type,
            ],
        )?;
        tracing::debug!(code = %record.code, "Product record stored");
        Ok(())
    }

    /// Number of products in the table.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn parse_timestamp(code: &str, value: Option<String>) -> Option<NaiveDateTime> {
    let value = value?;
    match NaiveDateTime::parse_from_str(&value, SQLITE_TIMESTAMP) {
        Ok(ts) => Some(ts),
        Err(e) => {
            tracing::warn!(code, value = %value, error = %e, "Unparseable created_at");
            None
        }
    }
}

impl CodeStore for SqliteStore {
    fn lookup(&self, code: &str) -> Result<Option<ProductRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT product_name, product_image, packaging_waste_type,
                        product_waste_type, packaging_material, plastic_type, created_at
                 FROM products
                 WHERE gs1_code = ?1",
                params![code],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(
            |(name, image_path, packaging_waste, product_waste, material, plastic, created)| {
                ProductRecord {
                    code: code.to_string(),
                    name,
                    image_path,
                    packaging_waste_type: packaging_waste,
                    product_waste_type: product_waste,
                    packaging_material: material,
                    plastic_type: plastic,
                    created_at: parse_timestamp(code, created),
                }
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = ProductRecord {
            code: "6901234567892".into(),
            name: Some("Sparkling water".into()),
            packaging_material: Some("PET".into()),
            plastic_type: Some("1".into()),
            ..Default::default()
        };

        store.insert(&record).unwrap();
        let found = store.lookup("6901234567892").unwrap().unwrap();

        assert_eq!(found.name.as_deref(), Some("Sparkling water"));
        assert_eq!(found.plastic_type.as_deref(), Some("1"));
        assert!(found.created_at.is_some());
    }

    #[test]
    fn test_missing_code_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.lookup("000").unwrap().is_none());
    }

    #[test]
    fn test_insert_replaces_existing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&ProductRecord::named("111", "Old")).unwrap();
        store.insert(&ProductRecord::named("111", "New")).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(
            store.lookup("111").unwrap().unwrap().name.as_deref(),
            Some("New")
        );
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.db");

        SqliteStore::open(&path)
            .unwrap()
            .insert(&ProductRecord::named("4006381333931", "Pen"))
            .unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.lookup("4006381333931").unwrap().is_some());
    }
}

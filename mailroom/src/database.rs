use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// One stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub message: String,
}

/// Handle over the relational backend, shared by all request handlers.
/// Cloning is cheap; the underlying pool is reference-counted.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a connection pool against `url` and make sure the messages
    /// table exists.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            // A shared in-memory database is dropped once its last
            // connection closes; keep one around.
            .min_connections(1)
            .connect(url)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool; this is how `#[sqlx::test]` fixtures get a
    /// handle with the schema in place.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_message(&self, message: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO messages (message) VALUES (?1)")
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_messages(&self) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT id, message FROM messages ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
    }
}

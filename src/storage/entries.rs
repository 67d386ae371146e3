use serde_json::{Map, Value};
use sqlx::QueryBuilder;

use super::schema::{Database, ENTRIES_TABLE};
use super::types::{DatabaseError, FeedRecord, MergeSummary};

/// Returns true when `name` can be spliced into SQL as a bare identifier.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(name: &str) -> Result<(), DatabaseError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_owned()))
    }
}

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Check whether an entry with exactly this `link` is already stored.
    pub async fn is_entry_link(&self, url: &str) -> Result<bool, DatabaseError> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT EXISTS(SELECT 1 FROM {ENTRIES_TABLE} WHERE link = ?)"
        ))
        .bind(url)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.0 != 0)
    }

    /// Insert one row built from a column → value map and return its id.
    ///
    /// JSON values map to SQLite types as: null → NULL, bool → INTEGER 0/1,
    /// integer → INTEGER, float → REAL, string → TEXT; arrays and objects
    /// are stored as their JSON text.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::InvalidIdentifier`] if the table or a column name
    ///   is not a plain identifier
    /// - [`DatabaseError::Conflict`] if the row violates a UNIQUE constraint
    ///   (for the entries table: the link is already stored)
    pub async fn insert_json_data(
        &self,
        table: &str,
        properties: &Map<String, Value>,
    ) -> Result<i64, DatabaseError> {
        check_identifier(table)?;
        for column in properties.keys() {
            check_identifier(column)?;
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = if properties.is_empty() {
            QueryBuilder::new(format!("INSERT INTO {table} DEFAULT VALUES"))
        } else {
            let columns: Vec<&str> = properties.keys().map(String::as_str).collect();
            let mut builder =
                QueryBuilder::new(format!("INSERT INTO {table} ({}) VALUES (", columns.join(", ")));

            let mut separated = builder.separated(", ");
            for value in properties.values() {
                match value {
                    Value::Null => separated.push_bind(Option::<String>::None),
                    Value::Bool(b) => separated.push_bind(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => separated.push_bind(i),
                        None => separated.push_bind(n.as_f64().unwrap_or_default()),
                    },
                    Value::String(s) => separated.push_bind(s.clone()),
                    other => separated.push_bind(other.to_string()),
                };
            }
            separated.push_unseparated(")");
            builder
        };
        builder.push(" RETURNING id");

        let row: (i64,) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(row.0)
    }

    /// Insert a feed record into the entries table.
    pub async fn insert_feed_record(&self, record: &FeedRecord) -> Result<i64, DatabaseError> {
        let properties = record.to_properties()?;
        self.insert_json_data(ENTRIES_TABLE, &properties).await
    }

    /// Get every non-null `link` of a table.
    ///
    /// Used by `convert` to read candidates out of a places store, whose
    /// table name is user-supplied.
    pub async fn get_entry_links(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        check_identifier(table)?;
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT link FROM {table} WHERE link IS NOT NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(|(link,)| link).collect())
    }

    /// Get every stored feed record, oldest first.
    pub async fn get_feed_records(&self) -> Result<Vec<FeedRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, FeedRecord>(&format!(
            r#"
            SELECT link, title, description, status_code, thumbnail, language, author,
                   source_url, permanent, bookmarked, contents_type, page_rating,
                   page_rating_votes, page_rating_contents, manual_status_code, date_created
            FROM {ENTRIES_TABLE}
            ORDER BY id
        "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(records)
    }

    /// Copy every record of `other` whose link is not stored here.
    ///
    /// Records keep their original metadata, including `date_created`.
    pub async fn merge_from(&self, other: &Database) -> Result<MergeSummary, DatabaseError> {
        let mut summary = MergeSummary::default();

        for record in other.get_feed_records().await? {
            summary.read += 1;
            if self.is_entry_link(&record.link).await? {
                summary.present += 1;
                continue;
            }
            match self.insert_feed_record(&record).await {
                Ok(_) => summary.copied += 1,
                Err(DatabaseError::Conflict(_)) => summary.present += 1,
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            read = summary.read,
            copied = summary.copied,
            present = summary.present,
            "Merged entry stores"
        );
        Ok(summary)
    }

    /// Number of rows in the entries table.
    pub async fn count_entries(&self) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {ENTRIES_TABLE}"))
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(row.0)
    }
}

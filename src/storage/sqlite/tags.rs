use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::errors::Result;
use crate::models::Tag;
use crate::storage::TagStore;

pub struct SqliteTagStore {
    db: Database,
}

impl SqliteTagStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        tag_type: row.get(1)?,
        name: row.get(2)?,
    })
}

#[async_trait]
impl TagStore for SqliteTagStore {
    async fn get_tags(&self, job: Option<i64>) -> Result<Vec<Tag>> {
        self.db
            .call(move |conn| {
                let tags = match job {
                    Some(job) => {
                        let mut stmt = conn.prepare(
                            "SELECT t.id, t.tag_type, t.tag_name FROM tag t
                             JOIN jobtag jt ON jt.tag_id = t.id
                             WHERE jt.job_id = ?1
                             ORDER BY t.tag_type, t.tag_name",
                        )?;
                        let rows = stmt
                            .query_map(params![job], tag_from_row)?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(
                            "SELECT id, tag_type, tag_name FROM tag ORDER BY tag_type, tag_name",
                        )?;
                        let rows = stmt
                            .query_map([], tag_from_row)?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                };
                Ok(tags)
            })
            .await
    }

    async fn tag_id(&self, tag_type: &str, name: &str) -> Result<Option<i64>> {
        let tag_type = tag_type.to_string();
        let name = name.to_string();
        self.db
            .call(move |conn| {
                let id = conn
                    .query_row(
                        "SELECT id FROM tag WHERE tag_type = ?1 AND tag_name = ?2",
                        params![tag_type, name],
                        |r| r.get(0),
                    )
                    .optional()?;
                Ok(id)
            })
            .await
    }

    async fn add_tag_or_create(&self, job: i64, tag_type: &str, name: &str) -> Result<i64> {
        let tag_type = tag_type.to_string();
        let name = name.to_string();
        self.db
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO tag (tag_type, tag_name) VALUES (?1, ?2)",
                    params![tag_type, name],
                )?;
                let tag_id: i64 = tx.query_row(
                    "SELECT id FROM tag WHERE tag_type = ?1 AND tag_name = ?2",
                    params![tag_type, name],
                    |r| r.get(0),
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO jobtag (job_id, tag_id) VALUES (?1, ?2)",
                    params![job, tag_id],
                )?;
                tx.commit()?;
                Ok(tag_id)
            })
            .await
    }

    async fn remove_tag(&self, job: i64, tag: i64) -> Result<()> {
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM jobtag WHERE job_id = ?1 AND tag_id = ?2",
                    params![job, tag],
                )?;
                Ok(())
            })
            .await
    }
}

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{parse_datetime, parse_uuid, to_limit},
    Database, SettingsContent, SettingsSnapshot, StoredSnapshot,
};
use crate::settings::SettingsHistoryStore;

struct SnapshotRow {
    id: i64,
    sync_identifier: String,
    timestamp: String,
    content: String,
}

fn read_row(row: &Row) -> Result<SnapshotRow, rusqlite::Error> {
    Ok(SnapshotRow {
        id: row.get("id")?,
        sync_identifier: row.get("sync_identifier")?,
        timestamp: row.get("timestamp")?,
        content: row.get("content")?,
    })
}

impl SnapshotRow {
    fn into_stored(self) -> Result<StoredSnapshot> {
        let content: SettingsContent = serde_json::from_str(&self.content)
            .with_context(|| format!("failed to decode settings content for row {}", self.id))?;
        Ok(StoredSnapshot {
            id: self.id,
            snapshot: SettingsSnapshot::from_parts(
                parse_datetime(&self.timestamp, "timestamp")?,
                parse_uuid(&self.sync_identifier, "sync_identifier")?,
                content,
            ),
        })
    }
}

#[async_trait]
impl SettingsHistoryStore for Database {
    async fn latest(&self) -> Result<Option<SettingsSnapshot>> {
        self.execute(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, sync_identifier, timestamp, content
                     FROM settings_history
                     ORDER BY timestamp_ms DESC, id DESC
                     LIMIT 1",
                    [],
                    read_row,
                )
                .optional()?;

            row.map(|row| row.into_stored().map(|stored| stored.snapshot))
                .transpose()
        })
        .await
    }

    async fn store(&self, snapshot: SettingsSnapshot) -> Result<()> {
        let content = serde_json::to_string(snapshot.content())
            .context("failed to encode settings content")?;

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let timestamp_ms = snapshot.timestamp().timestamp_millis();

            let latest_ms: Option<i64> =
                tx.query_row("SELECT MAX(timestamp_ms) FROM settings_history", [], |row| {
                    row.get(0)
                })?;
            if let Some(latest_ms) = latest_ms {
                if timestamp_ms <= latest_ms {
                    bail!(
                        "settings snapshot at {} is not newer than the latest stored snapshot",
                        snapshot.timestamp().to_rfc3339()
                    );
                }
            }

            tx.execute(
                "INSERT INTO settings_history (sync_identifier, timestamp, timestamp_ms, content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    snapshot.sync_identifier().to_string(),
                    snapshot.timestamp().to_rfc3339(),
                    timestamp_ms,
                    content,
                ],
            )
            .with_context(|| "failed to insert settings snapshot")?;
            tx.commit().context("failed to commit settings snapshot")?;
            Ok(())
        })
        .await
    }

    async fn settings_since(
        &self,
        anchor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredSnapshot>> {
        let anchor = anchor.unwrap_or(0);
        let limit = to_limit(limit);

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sync_identifier, timestamp, content
                 FROM settings_history
                 WHERE id > ?1
                 ORDER BY id ASC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(params![anchor, limit], read_row)?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(SnapshotRow::into_stored).collect()
        })
        .await
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>, uploaded_through: i64) -> Result<usize> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM settings_history
                     WHERE timestamp_ms < ?1
                       AND id <= ?2
                       AND id <> (SELECT id FROM settings_history
                                  ORDER BY timestamp_ms DESC, id DESC LIMIT 1)",
                    params![cutoff_ms, uploaded_through],
                )
                .with_context(|| "failed to purge settings history")?;
            Ok(removed)
        })
        .await
    }
}

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::api::pager::RawRecord;
use crate::database::schema::SCHEMA;
use crate::ingest::normalizer::{normalize, NormalizedRecord};

/// Counts reported back after a batch is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub stored: usize,
    pub skipped: usize,
    pub colors: usize,
}

/// Owns the three artifact tables.
///
/// Metadata rows are upserted by artifact id. Media and color rows belong to
/// the latest ingestion of their artifact: re-ingesting an id replaces them
/// instead of appending duplicates.
pub struct ArtifactStore {
    conn: Connection,
}

impl ArtifactStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch(SCHEMA).context("Failed to initialize schema")?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Writes every record in one transaction; a failure rolls back the whole batch.
    pub fn insert_batch(&mut self, records: &[RawRecord]) -> Result<InsertReport> {
        let mut report = InsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let tx = self.conn.transaction().context("Failed to begin transaction")?;

        {
            let mut stmt_metadata = tx.prepare(
                "INSERT OR REPLACE INTO artifact_metadata
                    (id, title, culture, period, century, medium, dimensions,
                     description, department, classification, accessionyear, accessionmethod)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;

            let mut stmt_clear_media = tx.prepare("DELETE FROM artifact_media WHERE objectid = ?1")?;
            let mut stmt_clear_colors = tx.prepare("DELETE FROM artifact_colors WHERE objectid = ?1")?;

            let mut stmt_media = tx.prepare(
                "INSERT INTO artifact_media
                    (objectid, imagecount, mediacount, colorcount, rank, datebegin, dateend)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            let mut stmt_color = tx.prepare(
                "INSERT INTO artifact_colors (objectid, color, spectrum, hue, percent, css3)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for record in records {
                let normalized = normalize(record);
                let Some(id) = normalized.artifact_id() else {
                    warn!("Skipping record without an artifact id (title: {:?})", normalized.metadata.title);
                    report.skipped += 1;
                    continue;
                };
                let NormalizedRecord { metadata: m, media, colors } = normalized;

                // 1. Metadata: every column replaced on conflict
                stmt_metadata
                    .execute(params![
                        id,
                        m.title,
                        m.culture,
                        m.period,
                        m.century,
                        m.medium,
                        m.dimensions,
                        m.description,
                        m.department,
                        m.classification,
                        m.accession_year,
                        m.accession_method,
                    ])
                    .with_context(|| format!("Failed to upsert metadata for artifact {}", id))?;

                // 2. Drop dependents left over from an earlier ingestion of this id
                stmt_clear_media.execute(params![id])?;
                stmt_clear_colors.execute(params![id])?;

                // 3. Fresh media and color rows
                stmt_media.execute(params![
                    media.object_id,
                    media.image_count,
                    media.media_count,
                    media.color_count,
                    media.rank,
                    media.date_begin,
                    media.date_end,
                ])?;

                for color in &colors {
                    stmt_color.execute(params![
                        color.object_id,
                        color.color,
                        color.spectrum,
                        color.hue,
                        color.percent,
                        color.css3,
                    ])?;
                }

                debug!("Stored artifact {} with {} colors", id, colors.len());
                report.stored += 1;
                report.colors += colors.len();
            }
        }

        tx.commit().context("Failed to commit transaction")?;
        info!(
            "Stored {} artifacts ({} colors, {} skipped)",
            report.stored, report.colors, report.skipped
        );
        Ok(report)
    }
}

/// Opens the store, writes one batch and closes it again.
pub fn store_records(path: &Path, records: &[RawRecord]) -> Result<InsertReport> {
    let mut store = ArtifactStore::open(path)?;
    store.insert_batch(records)
}

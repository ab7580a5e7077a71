use std::convert::TryFrom;

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, params_from_iter, Row};

use crate::db::{connection::Database, helpers::to_i32, models::ExposureRecord};
use crate::log_debug;

const ENABLE_LOGS: bool = true;

/// Stored column for each non-identity field, in insert order.
pub const EXPOSURE_COLUMNS: [&str; 6] = [
    "date_millis_since_epoch",
    "received_timestamp_ms",
    "duration_minutes",
    "attenuation",
    "risk_level",
    "risk_score",
];

fn insert_sql() -> String {
    let placeholders: Vec<String> = (1..=EXPOSURE_COLUMNS.len())
        .map(|index| format!("?{index}"))
        .collect();
    format!(
        "INSERT INTO exposures ({}) VALUES ({})",
        EXPOSURE_COLUMNS.join(", "),
        placeholders.join(", ")
    )
}

fn select_sql(tail: &str) -> String {
    format!(
        "SELECT id, {} FROM exposures {tail}",
        EXPOSURE_COLUMNS.join(", ")
    )
}

/// Column values for `record`, lined up with [`EXPOSURE_COLUMNS`].
fn exposure_to_row(record: &ExposureRecord) -> [i64; 6] {
    [
        record.date_millis_since_epoch(),
        record.received_timestamp_ms(),
        i64::from(record.duration_minutes()),
        i64::from(record.attenuation()),
        i64::from(record.risk_level()),
        i64::from(record.risk_score()),
    ]
}

fn row_to_exposure(row: &Row) -> Result<ExposureRecord> {
    let id: i64 = row.get("id")?;
    let duration_minutes: i64 = row.get("duration_minutes")?;
    let attenuation: i64 = row.get("attenuation")?;
    let risk_level: i64 = row.get("risk_level")?;
    let risk_score: i64 = row.get("risk_score")?;

    let mut record = ExposureRecord::create(
        row.get("date_millis_since_epoch")?,
        row.get("received_timestamp_ms")?,
        to_i32(duration_minutes, "duration_minutes")?,
        to_i32(attenuation, "attenuation")?,
        to_i32(risk_level, "risk_level")?,
        to_i32(risk_score, "risk_score")?,
    );
    record.assign_id(id)?;
    Ok(record)
}

fn ensure_unpersisted(record: &ExposureRecord) -> Result<()> {
    match record.id() {
        Some(id) => bail!("exposure {id} is already persisted"),
        None => Ok(()),
    }
}

impl Database {
    /// Stores a new exposure and returns it with its assigned id.
    pub async fn insert_exposure(&self, record: &ExposureRecord) -> Result<ExposureRecord> {
        ensure_unpersisted(record)?;
        let mut persisted = record.clone();
        self.execute(move |conn| {
            conn.execute(&insert_sql(), params_from_iter(exposure_to_row(&persisted)))
                .context("failed to insert exposure")?;
            persisted.assign_id(conn.last_insert_rowid())?;
            log_debug!("Stored exposure {:?}", persisted.id());
            Ok(persisted)
        })
        .await
    }

    /// Stores every record in one transaction. Nothing is written if any
    /// insert fails.
    pub async fn insert_exposures(
        &self,
        records: Vec<ExposureRecord>,
    ) -> Result<Vec<ExposureRecord>> {
        for record in &records {
            ensure_unpersisted(record)?;
        }

        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open exposure insert transaction")?;
            let mut persisted = Vec::with_capacity(records.len());
            {
                let mut stmt = tx.prepare(&insert_sql())?;
                for mut record in records {
                    stmt.execute(params_from_iter(exposure_to_row(&record)))
                        .context("failed to insert exposure")?;
                    record.assign_id(tx.last_insert_rowid())?;
                    persisted.push(record);
                }
            }
            tx.commit().context("failed to commit exposure inserts")?;
            log_debug!("Stored {} exposures", persisted.len());
            Ok(persisted)
        })
        .await
    }

    pub async fn get_exposure(&self, exposure_id: i64) -> Result<Option<ExposureRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&select_sql("WHERE id = ?1"))?;
            let mut rows = stmt.query(params![exposure_id])?;
            let record = match rows.next()? {
                Some(row) => Some(row_to_exposure(row)?),
                None => None,
            };
            Ok(record)
        })
        .await
    }

    /// All stored exposures, most recent day first.
    pub async fn get_exposures(&self) -> Result<Vec<ExposureRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&select_sql(
                "ORDER BY date_millis_since_epoch DESC, id DESC",
            ))?;

            let mut rows = stmt.query([])?;
            let mut exposures = Vec::new();
            while let Some(row) = rows.next()? {
                exposures.push(row_to_exposure(row)?);
            }

            Ok(exposures)
        })
        .await
    }

    pub async fn count_exposures(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM exposures", [], |row| {
                row.get(0)
            })?;
            usize::try_from(count).map_err(|_| anyhow!("negative exposure count {count}"))
        })
        .await
    }

    /// Rewrites the correctable columns (duration, attenuation, risk level and
    /// risk score) of an already stored exposure.
    pub async fn update_exposure(&self, record: &ExposureRecord) -> Result<()> {
        let exposure_id = record
            .id()
            .ok_or_else(|| anyhow!("cannot update an exposure that was never persisted"))?;
        let record = record.clone();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE exposures
                     SET duration_minutes = ?1,
                         attenuation = ?2,
                         risk_level = ?3,
                         risk_score = ?4
                     WHERE id = ?5",
                    params![
                        record.duration_minutes(),
                        record.attenuation(),
                        record.risk_level(),
                        record.risk_score(),
                        exposure_id,
                    ],
                )
                .context("failed to update exposure")?;

            if rows_affected == 0 {
                bail!("exposure {exposure_id} not found");
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_exposure(&self, exposure_id: i64) -> Result<bool> {
        self.execute(move |conn| {
            let rows_affected = conn
                .execute("DELETE FROM exposures WHERE id = ?1", params![exposure_id])
                .context("failed to delete exposure")?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn delete_all_exposures(&self) -> Result<usize> {
        self.execute(|conn| {
            let removed = conn
                .execute("DELETE FROM exposures", [])
                .context("failed to delete exposures")?;
            log_debug!("Removed {removed} exposures");
            Ok(removed)
        })
        .await
    }
}

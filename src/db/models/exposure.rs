//! Exposure record, one per detected proximity encounter.
//!
//! Partners storing these on device are expected to run a daily expiry and to
//! meet their own encryption and retention obligations. None of that happens
//! here.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::db::helpers::{millis_to_datetime, millis_to_naive_date};

/// A single exposure as shown in the exposures list.
///
/// `id` stays `None` until the record is first written by
/// [`Database::insert_exposure`](crate::db::Database::insert_exposure), which
/// is the only code allowed to assign it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    /// Day of the exposure in millis since epoch, rounded to the day by the
    /// caller.
    date_millis_since_epoch: i64,
    /// When the exposure status update was received by the app.
    received_timestamp_ms: i64,
    duration_minutes: i32,
    attenuation: i32,
    risk_level: i32,
    risk_score: i32,
}

impl ExposureRecord {
    /// Builds an unpersisted record. Values are taken as-is.
    pub fn create(
        date_millis_since_epoch: i64,
        received_timestamp_ms: i64,
        duration_minutes: i32,
        attenuation: i32,
        risk_level: i32,
        risk_score: i32,
    ) -> Self {
        Self {
            id: None,
            date_millis_since_epoch,
            received_timestamp_ms,
            duration_minutes,
            attenuation,
            risk_level,
            risk_score,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn date_millis_since_epoch(&self) -> i64 {
        self.date_millis_since_epoch
    }

    pub fn received_timestamp_ms(&self) -> i64 {
        self.received_timestamp_ms
    }

    pub fn duration_minutes(&self) -> i32 {
        self.duration_minutes
    }

    pub fn attenuation(&self) -> i32 {
        self.attenuation
    }

    pub fn risk_level(&self) -> i32 {
        self.risk_level
    }

    pub fn risk_score(&self) -> i32 {
        self.risk_score
    }

    pub fn set_duration_minutes(&mut self, duration_minutes: i32) {
        self.duration_minutes = duration_minutes;
    }

    pub fn set_attenuation(&mut self, attenuation: i32) {
        self.attenuation = attenuation;
    }

    pub fn set_risk_level(&mut self, risk_level: i32) {
        self.risk_level = risk_level;
    }

    pub fn set_risk_score(&mut self, risk_score: i32) {
        self.risk_score = risk_score;
    }

    pub fn with_duration_minutes(mut self, duration_minutes: i32) -> Self {
        self.set_duration_minutes(duration_minutes);
        self
    }

    pub fn with_attenuation(mut self, attenuation: i32) -> Self {
        self.set_attenuation(attenuation);
        self
    }

    pub fn with_risk_level(mut self, risk_level: i32) -> Self {
        self.set_risk_level(risk_level);
        self
    }

    pub fn with_risk_score(mut self, risk_score: i32) -> Self {
        self.set_risk_score(risk_score);
        self
    }

    /// Calendar day (UTC) the exposure was recorded against.
    pub fn exposure_date(&self) -> Option<NaiveDate> {
        millis_to_naive_date(self.date_millis_since_epoch)
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.received_timestamp_ms)
    }

    /// Multi-line dump for logs. Existing log consumers diff this output, so
    /// the label spacing must not change.
    pub fn debug_summary(&self) -> String {
        format!(
            "Duration: {} minutes\nAttenuation:{} dBm\nRisk level: {}\nRisk score: {}",
            self.duration_minutes, self.attenuation, self.risk_level, self.risk_score
        )
    }

    /// Identity write path for the storage layer.
    pub(crate) fn assign_id(&mut self, id: i64) -> Result<()> {
        match self.id {
            Some(existing) if existing != id => {
                bail!("exposure already persisted as {existing}, refusing id {id}")
            }
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }
}

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::HoursConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub business_id: Ulid,
    pub config: HoursConfig,
}

/// Source of per-business operating hours for bulk pre-generation.
#[async_trait]
pub trait BusinessDirectory: Send + Sync {
    async fn businesses(&self) -> Result<Vec<BusinessHours>, EngineError>;
}

/// Fixed list, for embedding and tests.
pub struct StaticDirectory(pub Vec<BusinessHours>);

#[async_trait]
impl BusinessDirectory for StaticDirectory {
    async fn businesses(&self) -> Result<Vec<BusinessHours>, EngineError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct RawEntry {
    business_id: Ulid,
    opening: String,
    closing: String,
    slot_minutes: u32,
}

/// JSON array of `{business_id, opening, closing, slot_minutes}`, re-read on every call.
///
/// Entries with unusable hours are skipped with a warning so one bad profile
/// doesn't stop generation for the rest.
pub struct JsonFileDirectory {
    path: PathBuf,
}

impl JsonFileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BusinessDirectory for JsonFileDirectory {
    async fn businesses(&self) -> Result<Vec<BusinessHours>, EngineError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let raw: Vec<RawEntry> = serde_json::from_str(&text).map_err(|e| {
            EngineError::InvalidConfig(format!("{}: {e}", self.path.display()))
        })?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            match HoursConfig::parse(&entry.opening, &entry.closing, entry.slot_minutes) {
                Ok(config) => out.push(BusinessHours {
                    business_id: entry.business_id,
                    config,
                }),
                Err(e) => warn!(business_id = %entry.business_id, "skipping business: {e}"),
            }
        }
        Ok(out)
    }
}

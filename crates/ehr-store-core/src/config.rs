//! Store configuration.
//!
//! Configuration is resolved once at process startup and passed into the
//! services. The library never reads environment variables itself.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::db::{Database, DbResult};

/// Default collection holding patient documents.
pub const DEFAULT_PATIENTS_COLLECTION: &str = "patients";
/// Default collection holding clinical record documents.
pub const DEFAULT_EHR_COLLECTION: &str = "ehr_records";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Store configuration resolved at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    database_path: Option<PathBuf>,
    patients_collection: String,
    ehr_collection: String,
}

impl StoreConfig {
    /// Create a new `StoreConfig`.
    ///
    /// `database_path` of `None` selects an in-memory database. Collection
    /// names must be non-empty and distinct.
    pub fn new(
        database_path: Option<PathBuf>,
        patients_collection: impl Into<String>,
        ehr_collection: impl Into<String>,
    ) -> ConfigResult<Self> {
        let patients_collection = patients_collection.into();
        let ehr_collection = ehr_collection.into();

        if patients_collection.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "patients_collection cannot be empty".into(),
            ));
        }
        if ehr_collection.trim().is_empty() {
            return Err(ConfigError::Invalid("ehr_collection cannot be empty".into()));
        }
        if patients_collection == ehr_collection {
            return Err(ConfigError::Invalid(format!(
                "patients and EHR records cannot share collection '{}'",
                patients_collection
            )));
        }

        Ok(Self {
            database_path,
            patients_collection,
            ehr_collection,
        })
    }

    /// Default collections backed by a database file.
    pub fn with_database_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.database_path.as_deref()
    }

    pub fn patients_collection(&self) -> &str {
        &self.patients_collection
    }

    pub fn ehr_collection(&self) -> &str {
        &self.ehr_collection
    }

    /// Open the database this configuration describes.
    pub fn open_database(&self) -> DbResult<Database> {
        match &self.database_path {
            Some(path) => Database::open(path),
            None => Database::open_in_memory(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            patients_collection: DEFAULT_PATIENTS_COLLECTION.into(),
            ehr_collection: DEFAULT_EHR_COLLECTION.into(),
        }
    }
}

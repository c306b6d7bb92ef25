//! Drive state catalogue
//!
//! The catalogue stores one [`TapeDrive`] record per drive. The record in
//! the catalogue is the only authority on a drive's state: callers read it,
//! decide what the next state looks like, and write it back. Nothing is
//! cached between calls.
//!
//! - [`RdbmsDriveStateCatalogue`]: SQLite backed catalogue
//! - [`DummyDriveStateCatalogue`]: holds a single record in memory
//! - [`CatalogueRetryWrapper`]: retries any catalogue on lost connections

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Error;
use thiserror::Error;

use tds_api_types::{
    DesiredDriveState, DiskSpaceReservationRequest, DriveConfigEntry, SqliteCatalogueConfig,
    TapeDrive, TapeDriveStatistics, MAX_COMMENT_OR_REASON_LENGTH,
};

use crate::rdbms::ConnPool;

pub mod columns;

mod dummy;
pub use dummy::*;

mod rdbms;
pub use rdbms::*;

mod retry;
pub use retry::*;

#[derive(Error, Debug)]
pub enum CatalogueError {
    #[error("{0}")]
    UserError(String),
    #[error("unexpected drive status: {0}")]
    UnexpectedStatus(String),
    #[error("lost connection to the catalogue: {0}")]
    ConnectionLost(String),
    #[error("{0} is not implemented by this catalogue")]
    NotImplemented(&'static str),
    #[error("{0}")]
    DriveAlreadyExists(String),
}

fn catalogue_error(err: &Error) -> Option<&CatalogueError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CatalogueError>())
}

/// The error was caused by a lost database connection and may go away on retry.
pub fn is_connection_lost(err: &Error) -> bool {
    matches!(catalogue_error(err), Some(CatalogueError::ConnectionLost(_)))
}

/// The error is about the request itself, e.g. a drive which does not exist.
pub fn is_user_error(err: &Error) -> bool {
    matches!(catalogue_error(err), Some(CatalogueError::UserError(_)))
}

/// Storage agnostic access to drive records and disk space reservations
pub trait DriveStateCatalogue: Send + Sync {
    /// Insert a new drive record.
    fn create_tape_drive(&self, drive: &TapeDrive) -> Result<(), Error>;

    /// Read one drive record, `None` if the drive is unknown.
    fn get_tape_drive(&self, drive_name: &str) -> Result<Option<TapeDrive>, Error>;

    /// All drive records, ordered by drive name.
    fn get_tape_drives(&self) -> Result<Vec<TapeDrive>, Error>;

    fn get_tape_drive_names(&self) -> Result<Vec<String>, Error>;

    /// Remove a drive record. Unknown drives are ignored.
    fn delete_tape_drive(&self, drive_name: &str) -> Result<(), Error>;

    /// Overwrite the operator intent (`up`, `force_down` and `reason`).
    fn set_desired_tape_drive_state(
        &self,
        drive_name: &str,
        desired: &DesiredDriveState,
    ) -> Result<(), Error>;

    /// Overwrite the user comment only. An empty comment clears it.
    fn set_desired_tape_drive_state_comment(
        &self,
        drive_name: &str,
        comment: &str,
    ) -> Result<(), Error>;

    /// Update transfer counters, only while the drive is transferring.
    fn update_tape_drive_statistics(
        &self,
        drive_name: &str,
        host: &str,
        logical_library: &str,
        statistics: &TapeDriveStatistics,
    ) -> Result<(), Error>;

    /// Persist a new drive state computed by the caller.
    ///
    /// When the stored status equals `drive.drive_status` only the columns of
    /// [`columns::unchanged_status_columns`] are written, otherwise those of
    /// [`columns::status_change_columns`]. Unknown drives are a user error.
    fn update_tape_drive_status(&self, drive: &TapeDrive) -> Result<(), Error>;

    /// Reserved bytes summed up per disk system.
    fn get_disk_space_reservations(&self) -> Result<BTreeMap<String, u64>, Error>;

    /// Add to the reservation of mount `mount_id`, or start a new one.
    fn reserve_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error>;

    /// Subtract from the reservation of mount `mount_id`, never below zero.
    fn release_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error>;
}

/// Per drive key/value configuration, kept next to the drive records
pub trait DriveConfigCatalogue: Send + Sync {
    fn create_tape_drive_config(&self, entry: &DriveConfigEntry) -> Result<(), Error>;

    fn get_tape_drive_configs(&self) -> Result<Vec<DriveConfigEntry>, Error>;

    /// `(drive name, key name)` of every stored value.
    fn get_tape_drive_config_names_and_keys(&self) -> Result<Vec<(String, String)>, Error>;

    /// Replace category, value and source of an existing key.
    fn modify_tape_drive_config(&self, entry: &DriveConfigEntry) -> Result<(), Error>;

    fn get_tape_drive_config(
        &self,
        drive_name: &str,
        key_name: &str,
    ) -> Result<Option<DriveConfigEntry>, Error>;

    fn delete_tape_drive_config(&self, drive_name: &str, key_name: &str) -> Result<(), Error>;
}

/// Largest byte count a catalogue stores. Reservations saturate there.
pub const MAX_STORED_BYTES: u64 = i64::MAX as u64;

fn count_out_of_range(column: &str, value: u64) -> Error {
    CatalogueError::UserError(format!(
        "{} of {} is out of range, at most {} can be stored",
        column, value, MAX_STORED_BYTES
    ))
    .into()
}

/// Reject a reservation larger than [`MAX_STORED_BYTES`].
pub fn check_reservation_bytes(bytes: u64) -> Result<u64, Error> {
    if bytes > MAX_STORED_BYTES {
        return Err(count_out_of_range("RESERVED_BYTES", bytes));
    }
    Ok(bytes)
}

/// Reject a record whose counters a catalogue cannot store.
pub fn check_record_counts(drive: &TapeDrive) -> Result<(), Error> {
    let counts = [
        ("BYTES_TRANSFERED_IN_SESSION", drive.bytes_transfered_in_session),
        ("FILES_TRANSFERED_IN_SESSION", drive.files_transfered_in_session),
        ("RESERVED_BYTES", drive.reserved_bytes),
    ];
    for (column, value) in counts {
        if let Some(value) = value {
            if value > MAX_STORED_BYTES {
                return Err(count_out_of_range(column, value));
            }
        }
    }
    Ok(())
}

/// Limit a reason or comment to [`MAX_COMMENT_OR_REASON_LENGTH`] characters.
pub fn check_comment_or_reason_length(text: &str) -> String {
    if text.chars().count() <= MAX_COMMENT_OR_REASON_LENGTH {
        return text.to_string();
    }
    log::warn!(
        "reason or comment longer than {} characters, truncating it",
        MAX_COMMENT_OR_REASON_LENGTH
    );
    text.chars().take(MAX_COMMENT_OR_REASON_LENGTH).collect()
}

/// Open the catalogue described by a configuration entry.
///
/// Creates the database tables if missing.
pub fn open_catalogue(
    config: &SqliteCatalogueConfig,
) -> Result<CatalogueRetryWrapper<RdbmsDriveStateCatalogue>, Error> {
    let pool = ConnPool::new(&config.path, config.pool_size());
    let catalogue = RdbmsDriveStateCatalogue::new(Arc::new(pool));

    let catalogue = CatalogueRetryWrapper::new(catalogue, config.max_tries_to_connect());
    catalogue.create_schema()?;

    log::debug!("opened catalogue '{}' at {}", config.name, config.path);
    Ok(catalogue)
}

/// Open a catalogue configured in `catalogue.cfg`.
///
/// Without a name the only configured catalogue is used.
pub fn open_configured_catalogue(
    name: Option<&str>,
) -> Result<CatalogueRetryWrapper<RdbmsDriveStateCatalogue>, Error> {
    let (config, _digest) = tds_config::catalogue::config()?;
    let entry = match name {
        Some(name) => tds_config::catalogue::lookup_sqlite(&config, name)?,
        None => tds_config::catalogue::default_sqlite(&config)?,
    };
    open_catalogue(&entry)
}

#[cfg(test)]
mod test {
    use anyhow::format_err;

    use super::*;

    #[test]
    fn classify_wrapped_errors() {
        let err: Error = CatalogueError::ConnectionLost("gone".to_string()).into();
        assert!(is_connection_lost(&err));
        assert!(!is_user_error(&err));

        let err = err.context("while reading drive VDSTK11");
        assert!(is_connection_lost(&err));

        let err: Error = CatalogueError::UserError("no such drive".to_string()).into();
        assert!(is_user_error(&err));

        assert!(!is_connection_lost(&format_err!("some other failure")));
    }

    #[test]
    fn byte_counts_are_bounded() -> Result<(), Error> {
        assert_eq!(check_reservation_bytes(MAX_STORED_BYTES)?, MAX_STORED_BYTES);
        let err = check_reservation_bytes(MAX_STORED_BYTES + 1).unwrap_err();
        assert!(is_user_error(&err));

        let mut drive = TapeDrive::new("VDSTK11", "tpsrv01", "VLSTK10");
        drive.session_id = Some(u64::MAX);
        drive.reservation_session_id = Some(u64::MAX);
        check_record_counts(&drive)?;

        drive.files_transfered_in_session = Some(u64::MAX);
        assert!(is_user_error(&check_record_counts(&drive).unwrap_err()));
        Ok(())
    }

    #[test]
    fn long_reasons_are_truncated() {
        let short = "drive replaced";
        assert_eq!(check_comment_or_reason_length(short), short);

        let long = "x".repeat(MAX_COMMENT_OR_REASON_LENGTH + 10);
        let checked = check_comment_or_reason_length(&long);
        assert_eq!(checked.len(), MAX_COMMENT_OR_REASON_LENGTH);

        let wide = "\u{00e9}".repeat(MAX_COMMENT_OR_REASON_LENGTH);
        assert_eq!(check_comment_or_reason_length(&wide), wide);
    }
}

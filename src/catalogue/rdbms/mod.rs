//! SQLite backed drive state catalogue

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Error;
use rusqlite::types::{Type, Value};
use rusqlite::{named_params, OptionalExtension, Row, ToSql};

use tds_api_types::{
    DesiredDriveState, DiskSpaceReservationRequest, DriveStatus, EntryLog, TapeDrive,
    TapeDriveStatistics,
};

use super::columns::{
    non_empty, status_change_columns, unchanged_status_columns, ColumnUpdate, DriveColumn,
};
use super::{
    check_comment_or_reason_length, check_reservation_bytes, count_out_of_range, CatalogueError,
    DriveStateCatalogue,
};
use crate::rdbms::ConnPool;

mod drive_config;
mod schema;

const SELECT_TAPE_DRIVE: &str = r#"
SELECT
    DRIVE_NAME, HOST, LOGICAL_LIBRARY, SESSION_ID,
    BYTES_TRANSFERED_IN_SESSION, FILES_TRANSFERED_IN_SESSION,
    SESSION_START_TIME, SESSION_ELAPSED_TIME, MOUNT_START_TIME, TRANSFER_START_TIME,
    UNLOAD_START_TIME, UNMOUNT_START_TIME, DRAINING_START_TIME, DOWN_OR_UP_START_TIME,
    PROBE_START_TIME, CLEANUP_START_TIME, START_START_TIME, SHUTDOWN_TIME,
    MOUNT_TYPE, DRIVE_STATUS, DESIRED_UP, DESIRED_FORCE_DOWN, REASON_UP_DOWN,
    CURRENT_VID, CTA_VERSION, CURRENT_PRIORITY, CURRENT_ACTIVITY, CURRENT_TAPE_POOL,
    NEXT_MOUNT_TYPE, NEXT_VID, NEXT_TAPE_POOL, NEXT_PRIORITY, NEXT_ACTIVITY,
    DEV_FILE_NAME, RAW_LIBRARY_SLOT, CURRENT_VO, NEXT_VO, USER_COMMENT,
    CREATION_LOG_USER_NAME, CREATION_LOG_HOST_NAME, CREATION_LOG_TIME,
    LAST_UPDATE_USER_NAME, LAST_UPDATE_HOST_NAME, LAST_UPDATE_TIME,
    DISK_SYSTEM_NAME, RESERVED_BYTES, RESERVATION_SESSION_ID,
    PHYSICAL_LIBRARY_NAME
FROM
    DRIVE_STATE
"#;

// an up request resolved against the stored operator intent
const UP_OR_MAYBE_DOWN: &str = "CASE WHEN DESIRED_UP = 0 THEN 'DOWN' ELSE 'UP' END";

/// Drive state catalogue on top of a [`ConnPool`]
pub struct RdbmsDriveStateCatalogue {
    pool: Arc<ConnPool>,
}

impl RdbmsDriveStateCatalogue {
    pub fn new(pool: Arc<ConnPool>) -> Self {
        Self { pool }
    }

    /// Create the catalogue tables if they do not exist yet.
    pub fn create_schema(&self) -> Result<(), Error> {
        let mut conn = self.pool.get_conn()?;
        conn.transaction(|tx| {
            tx.execute_batch(schema::CREATE_DRIVE_STATE_TABLE)?;
            tx.execute_batch(schema::CREATE_DRIVE_CONFIG_TABLE)?;
            Ok(())
        })
    }
}

// ids and priorities are only compared for equality, they are stored bit
// for bit in the signed column
fn id_value(value: Option<u64>) -> Value {
    match value {
        Some(value) => Value::Integer(value as i64),
        None => Value::Null,
    }
}

fn id_from_sql(value: Option<i64>) -> Option<u64> {
    value.map(|value| value as u64)
}

fn count_value(column: DriveColumn, value: Option<u64>) -> Result<Value, Error> {
    match value {
        Some(value) => Ok(Value::Integer(sql_count(column.name(), value)?)),
        None => Ok(Value::Null),
    }
}

fn sql_count(column: &str, value: u64) -> Result<i64, Error> {
    i64::try_from(value).map_err(|_| count_out_of_range(column, value))
}

fn count_from_sql(row: &Row, column: &str) -> rusqlite::Result<Option<u64>> {
    let value: Option<i64> = row.get(column)?;
    match value {
        Some(value) => u64::try_from(value).map(Some).map_err(|err| {
            let position = row.as_ref().column_index(column).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(position, Type::Integer, Box::new(err))
        }),
        None => Ok(None),
    }
}

fn opt_time(value: Option<i64>) -> Value {
    match value {
        Some(value) => Value::Integer(value),
        None => Value::Null,
    }
}

fn opt_text(value: &Option<String>) -> Value {
    match non_empty(value) {
        Some(text) => Value::Text(text),
        None => Value::Null,
    }
}

fn checked(value: &Option<String>) -> Option<String> {
    non_empty(value).map(|text| check_comment_or_reason_length(&text))
}

/// The SQL value of a column taken from a drive record.
fn column_value(column: DriveColumn, drive: &TapeDrive) -> Result<Value, Error> {
    let log = drive.last_modification_log.as_ref();
    let value = match column {
        DriveColumn::Host => Value::Text(drive.host.clone()),
        DriveColumn::LogicalLibrary => Value::Text(drive.logical_library.clone()),
        DriveColumn::SessionId => id_value(drive.session_id),
        DriveColumn::BytesTransferedInSession => {
            count_value(column, drive.bytes_transfered_in_session)?
        }
        DriveColumn::FilesTransferedInSession => {
            count_value(column, drive.files_transfered_in_session)?
        }
        DriveColumn::SessionStartTime => opt_time(drive.session_start_time),
        DriveColumn::SessionElapsedTime => opt_time(drive.session_elapsed_time),
        DriveColumn::MountStartTime => opt_time(drive.mount_start_time),
        DriveColumn::TransferStartTime => opt_time(drive.transfer_start_time),
        DriveColumn::UnloadStartTime => opt_time(drive.unload_start_time),
        DriveColumn::UnmountStartTime => opt_time(drive.unmount_start_time),
        DriveColumn::DrainingStartTime => opt_time(drive.draining_start_time),
        DriveColumn::DownOrUpStartTime => opt_time(drive.down_or_up_start_time),
        DriveColumn::ProbeStartTime => opt_time(drive.probe_start_time),
        DriveColumn::CleanupStartTime => opt_time(drive.cleanup_start_time),
        DriveColumn::StartStartTime => opt_time(drive.start_start_time),
        DriveColumn::ShutdownTime => opt_time(drive.shutdown_time),
        DriveColumn::MountType => Value::Text(drive.mount_type.to_string()),
        DriveColumn::DriveStatus => Value::Text(drive.drive_status.to_string()),
        DriveColumn::DesiredUp => Value::Integer(drive.desired_up as i64),
        DriveColumn::DesiredForceDown => Value::Integer(drive.desired_force_down as i64),
        DriveColumn::ReasonUpDown => opt_text(&checked(&drive.reason_up_down)),
        DriveColumn::CurrentVid => opt_text(&drive.current_vid),
        DriveColumn::CurrentActivity => opt_text(&drive.current_activity),
        DriveColumn::CurrentTapePool => opt_text(&drive.current_tape_pool),
        DriveColumn::CurrentVo => opt_text(&drive.current_vo),
        DriveColumn::CurrentPriority => id_value(drive.current_priority),
        DriveColumn::UserComment => opt_text(&checked(&drive.user_comment)),
        DriveColumn::LastUpdateUserName => match log {
            Some(log) => Value::Text(log.username.clone()),
            None => Value::Null,
        },
        DriveColumn::LastUpdateHostName => match log {
            Some(log) => Value::Text(log.host.clone()),
            None => Value::Null,
        },
        DriveColumn::LastUpdateTime => opt_time(log.map(|log| log.time)),
        DriveColumn::DiskSystemName => opt_text(&drive.disk_system_name),
        DriveColumn::ReservedBytes => count_value(column, drive.reserved_bytes)?,
        DriveColumn::ReservationSessionId => id_value(drive.reservation_session_id),
    };
    Ok(value)
}

/// An UPDATE statement for one drive with its named parameters.
struct DriveUpdate {
    sql: String,
    params: Vec<(String, Value)>,
}

impl DriveUpdate {
    fn new(
        updates: &[ColumnUpdate],
        drive: &TapeDrive,
        guard_status: Option<DriveStatus>,
    ) -> Result<Self, Error> {
        let mut assignments = Vec::with_capacity(updates.len());
        let mut params = Vec::with_capacity(updates.len() + 2);

        for update in updates {
            match *update {
                ColumnUpdate::Value(column) => {
                    assignments.push(format!("{0} = :{0}", column.name()));
                    params.push((format!(":{}", column.name()), column_value(column, drive)?));
                }
                ColumnUpdate::Clear(column) => {
                    assignments.push(format!("{} = NULL", column.name()));
                }
                ColumnUpdate::ElapsedSinceSessionStart => {
                    assignments.push(
                        "SESSION_ELAPSED_TIME = CASE WHEN SESSION_START_TIME IS NULL \
                         THEN 0 ELSE :REPORT_TIME - SESSION_START_TIME END"
                            .to_string(),
                    );
                    let report_time = drive
                        .last_modification_log
                        .as_ref()
                        .map(|log| log.time)
                        .unwrap_or_else(proxmox_time::epoch_i64);
                    params.push((":REPORT_TIME".to_string(), Value::Integer(report_time)));
                }
                ColumnUpdate::UpOrMaybeDown => {
                    assignments.push(format!("DRIVE_STATUS = {}", UP_OR_MAYBE_DOWN));
                }
            }
        }

        let mut sql = format!(
            "UPDATE DRIVE_STATE SET {} WHERE DRIVE_NAME = :DRIVE_NAME",
            assignments.join(", ")
        );
        params.push((":DRIVE_NAME".to_string(), Value::Text(drive.drive_name.clone())));

        match guard_status {
            Some(DriveStatus::Up) => {
                sql.push_str(&format!(" AND DRIVE_STATUS = {}", UP_OR_MAYBE_DOWN));
            }
            Some(status) => {
                sql.push_str(" AND DRIVE_STATUS = :STORED_DRIVE_STATUS");
                params.push((
                    ":STORED_DRIVE_STATUS".to_string(),
                    Value::Text(status.to_string()),
                ));
            }
            None => {}
        }

        Ok(Self { sql, params })
    }

    fn execute(&self, conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
        let params: Vec<(&str, &dyn ToSql)> = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        conn.execute(&self.sql, params.as_slice())
    }
}

fn parse_column<T>(row: &Row, index: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(index)?;
    let position = row.as_ref().column_index(index)?;
    text.parse().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(position, Type::Text, Box::new(err))
    })
}

fn entry_log(row: &Row, prefix: &str) -> rusqlite::Result<Option<EntryLog>> {
    let username: Option<String> = row.get(format!("{}_USER_NAME", prefix).as_str())?;
    let username = match username {
        Some(username) => username,
        None => return Ok(None),
    };
    let host: Option<String> = row.get(format!("{}_HOST_NAME", prefix).as_str())?;
    let time: Option<i64> = row.get(format!("{}_TIME", prefix).as_str())?;
    Ok(Some(EntryLog::new(
        username,
        host.unwrap_or_default(),
        time.unwrap_or(0),
    )))
}

fn row_to_tape_drive(row: &Row) -> rusqlite::Result<TapeDrive> {
    Ok(TapeDrive {
        drive_name: row.get("DRIVE_NAME")?,
        host: row.get("HOST")?,
        logical_library: row.get("LOGICAL_LIBRARY")?,
        physical_library_name: row.get("PHYSICAL_LIBRARY_NAME")?,
        session_id: id_from_sql(row.get("SESSION_ID")?),
        bytes_transfered_in_session: count_from_sql(row, "BYTES_TRANSFERED_IN_SESSION")?,
        files_transfered_in_session: count_from_sql(row, "FILES_TRANSFERED_IN_SESSION")?,
        session_start_time: row.get("SESSION_START_TIME")?,
        session_elapsed_time: row.get("SESSION_ELAPSED_TIME")?,
        mount_start_time: row.get("MOUNT_START_TIME")?,
        transfer_start_time: row.get("TRANSFER_START_TIME")?,
        unload_start_time: row.get("UNLOAD_START_TIME")?,
        unmount_start_time: row.get("UNMOUNT_START_TIME")?,
        draining_start_time: row.get("DRAINING_START_TIME")?,
        down_or_up_start_time: row.get("DOWN_OR_UP_START_TIME")?,
        probe_start_time: row.get("PROBE_START_TIME")?,
        cleanup_start_time: row.get("CLEANUP_START_TIME")?,
        start_start_time: row.get("START_START_TIME")?,
        shutdown_time: row.get("SHUTDOWN_TIME")?,
        mount_type: parse_column(row, "MOUNT_TYPE")?,
        drive_status: parse_column(row, "DRIVE_STATUS")?,
        desired_up: row.get("DESIRED_UP")?,
        desired_force_down: row.get("DESIRED_FORCE_DOWN")?,
        reason_up_down: row.get("REASON_UP_DOWN")?,
        current_vid: row.get("CURRENT_VID")?,
        cta_version: row.get("CTA_VERSION")?,
        current_priority: id_from_sql(row.get("CURRENT_PRIORITY")?),
        current_activity: row.get("CURRENT_ACTIVITY")?,
        current_tape_pool: row.get("CURRENT_TAPE_POOL")?,
        next_mount_type: parse_column(row, "NEXT_MOUNT_TYPE")?,
        next_vid: row.get("NEXT_VID")?,
        next_tape_pool: row.get("NEXT_TAPE_POOL")?,
        next_priority: id_from_sql(row.get("NEXT_PRIORITY")?),
        next_activity: row.get("NEXT_ACTIVITY")?,
        dev_file_name: row.get("DEV_FILE_NAME")?,
        raw_library_slot: row.get("RAW_LIBRARY_SLOT")?,
        current_vo: row.get("CURRENT_VO")?,
        next_vo: row.get("NEXT_VO")?,
        user_comment: row.get("USER_COMMENT")?,
        creation_log: entry_log(row, "CREATION_LOG")?,
        last_modification_log: entry_log(row, "LAST_UPDATE")?,
        disk_system_name: row.get("DISK_SYSTEM_NAME")?,
        reserved_bytes: count_from_sql(row, "RESERVED_BYTES")?,
        reservation_session_id: id_from_sql(row.get("RESERVATION_SESSION_ID")?),
    })
}

fn unknown_drive(drive_name: &str) -> Error {
    CatalogueError::UserError(format!(
        "Cannot modify Tape Drive: {} because it doesn't exist",
        drive_name
    ))
    .into()
}

impl DriveStateCatalogue for RdbmsDriveStateCatalogue {
    fn create_tape_drive(&self, drive: &TapeDrive) -> Result<(), Error> {
        let bytes_transfered = count_value(
            DriveColumn::BytesTransferedInSession,
            drive.bytes_transfered_in_session,
        )?;
        let files_transfered = count_value(
            DriveColumn::FilesTransferedInSession,
            drive.files_transfered_in_session,
        )?;
        let reserved_bytes = count_value(DriveColumn::ReservedBytes, drive.reserved_bytes)?;
        let creation = drive.creation_log.as_ref();
        let update = drive.last_modification_log.as_ref();

        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            c.execute(
                r#"
INSERT INTO DRIVE_STATE(
    DRIVE_NAME, HOST, LOGICAL_LIBRARY, SESSION_ID,
    BYTES_TRANSFERED_IN_SESSION, FILES_TRANSFERED_IN_SESSION,
    SESSION_START_TIME, SESSION_ELAPSED_TIME, MOUNT_START_TIME, TRANSFER_START_TIME,
    UNLOAD_START_TIME, UNMOUNT_START_TIME, DRAINING_START_TIME, DOWN_OR_UP_START_TIME,
    PROBE_START_TIME, CLEANUP_START_TIME, START_START_TIME, SHUTDOWN_TIME,
    MOUNT_TYPE, DRIVE_STATUS, DESIRED_UP, DESIRED_FORCE_DOWN, REASON_UP_DOWN,
    CURRENT_VID, CTA_VERSION, CURRENT_PRIORITY, CURRENT_ACTIVITY, CURRENT_TAPE_POOL,
    NEXT_MOUNT_TYPE, NEXT_VID, NEXT_TAPE_POOL, NEXT_PRIORITY, NEXT_ACTIVITY,
    DEV_FILE_NAME, RAW_LIBRARY_SLOT, CURRENT_VO, NEXT_VO, USER_COMMENT,
    CREATION_LOG_USER_NAME, CREATION_LOG_HOST_NAME, CREATION_LOG_TIME,
    LAST_UPDATE_USER_NAME, LAST_UPDATE_HOST_NAME, LAST_UPDATE_TIME,
    DISK_SYSTEM_NAME, RESERVED_BYTES, RESERVATION_SESSION_ID,
    PHYSICAL_LIBRARY_NAME)
VALUES(
    :DRIVE_NAME, :HOST, :LOGICAL_LIBRARY, :SESSION_ID,
    :BYTES_TRANSFERED_IN_SESSION, :FILES_TRANSFERED_IN_SESSION,
    :SESSION_START_TIME, :SESSION_ELAPSED_TIME, :MOUNT_START_TIME, :TRANSFER_START_TIME,
    :UNLOAD_START_TIME, :UNMOUNT_START_TIME, :DRAINING_START_TIME, :DOWN_OR_UP_START_TIME,
    :PROBE_START_TIME, :CLEANUP_START_TIME, :START_START_TIME, :SHUTDOWN_TIME,
    :MOUNT_TYPE, :DRIVE_STATUS, :DESIRED_UP, :DESIRED_FORCE_DOWN, :REASON_UP_DOWN,
    :CURRENT_VID, :CTA_VERSION, :CURRENT_PRIORITY, :CURRENT_ACTIVITY, :CURRENT_TAPE_POOL,
    :NEXT_MOUNT_TYPE, :NEXT_VID, :NEXT_TAPE_POOL, :NEXT_PRIORITY, :NEXT_ACTIVITY,
    :DEV_FILE_NAME, :RAW_LIBRARY_SLOT, :CURRENT_VO, :NEXT_VO, :USER_COMMENT,
    :CREATION_LOG_USER_NAME, :CREATION_LOG_HOST_NAME, :CREATION_LOG_TIME,
    :LAST_UPDATE_USER_NAME, :LAST_UPDATE_HOST_NAME, :LAST_UPDATE_TIME,
    :DISK_SYSTEM_NAME, :RESERVED_BYTES, :RESERVATION_SESSION_ID,
    :PHYSICAL_LIBRARY_NAME)
"#,
                named_params! {
                    ":DRIVE_NAME": drive.drive_name,
                    ":HOST": drive.host,
                    ":LOGICAL_LIBRARY": drive.logical_library,
                    ":SESSION_ID": id_value(drive.session_id),
                    ":BYTES_TRANSFERED_IN_SESSION": bytes_transfered,
                    ":FILES_TRANSFERED_IN_SESSION": files_transfered,
                    ":SESSION_START_TIME": drive.session_start_time,
                    ":SESSION_ELAPSED_TIME": drive.session_elapsed_time,
                    ":MOUNT_START_TIME": drive.mount_start_time,
                    ":TRANSFER_START_TIME": drive.transfer_start_time,
                    ":UNLOAD_START_TIME": drive.unload_start_time,
                    ":UNMOUNT_START_TIME": drive.unmount_start_time,
                    ":DRAINING_START_TIME": drive.draining_start_time,
                    ":DOWN_OR_UP_START_TIME": drive.down_or_up_start_time,
                    ":PROBE_START_TIME": drive.probe_start_time,
                    ":CLEANUP_START_TIME": drive.cleanup_start_time,
                    ":START_START_TIME": drive.start_start_time,
                    ":SHUTDOWN_TIME": drive.shutdown_time,
                    ":MOUNT_TYPE": drive.mount_type.to_string(),
                    ":DRIVE_STATUS": drive.drive_status.to_string(),
                    ":DESIRED_UP": drive.desired_up,
                    ":DESIRED_FORCE_DOWN": drive.desired_force_down,
                    ":REASON_UP_DOWN": checked(&drive.reason_up_down),
                    ":CURRENT_VID": non_empty(&drive.current_vid),
                    ":CTA_VERSION": non_empty(&drive.cta_version),
                    ":CURRENT_PRIORITY": id_value(drive.current_priority),
                    ":CURRENT_ACTIVITY": non_empty(&drive.current_activity),
                    ":CURRENT_TAPE_POOL": non_empty(&drive.current_tape_pool),
                    ":NEXT_MOUNT_TYPE": drive.next_mount_type.to_string(),
                    ":NEXT_VID": non_empty(&drive.next_vid),
                    ":NEXT_TAPE_POOL": non_empty(&drive.next_tape_pool),
                    ":NEXT_PRIORITY": id_value(drive.next_priority),
                    ":NEXT_ACTIVITY": non_empty(&drive.next_activity),
                    ":DEV_FILE_NAME": non_empty(&drive.dev_file_name),
                    ":RAW_LIBRARY_SLOT": non_empty(&drive.raw_library_slot),
                    ":CURRENT_VO": non_empty(&drive.current_vo),
                    ":NEXT_VO": non_empty(&drive.next_vo),
                    ":USER_COMMENT": checked(&drive.user_comment),
                    ":CREATION_LOG_USER_NAME": creation.map(|log| &log.username),
                    ":CREATION_LOG_HOST_NAME": creation.map(|log| &log.host),
                    ":CREATION_LOG_TIME": creation.map(|log| log.time),
                    ":LAST_UPDATE_USER_NAME": update.map(|log| &log.username),
                    ":LAST_UPDATE_HOST_NAME": update.map(|log| &log.host),
                    ":LAST_UPDATE_TIME": update.map(|log| log.time),
                    ":DISK_SYSTEM_NAME": non_empty(&drive.disk_system_name),
                    ":RESERVED_BYTES": reserved_bytes,
                    ":RESERVATION_SESSION_ID": id_value(drive.reservation_session_id),
                    ":PHYSICAL_LIBRARY_NAME": non_empty(&drive.physical_library_name),
                },
            )
        })?;

        log::info!(
            "catalogue - created tape drive '{}' (host {}, library {}, status {})",
            drive.drive_name,
            drive.host,
            drive.logical_library,
            drive.drive_status,
        );
        Ok(())
    }

    fn get_tape_drive(&self, drive_name: &str) -> Result<Option<TapeDrive>, Error> {
        let sql = format!("{} WHERE DRIVE_NAME = :DRIVE_NAME", SELECT_TAPE_DRIVE);
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            c.query_row(
                &sql,
                named_params! { ":DRIVE_NAME": drive_name },
                row_to_tape_drive,
            )
            .optional()
        })
    }

    fn get_tape_drives(&self) -> Result<Vec<TapeDrive>, Error> {
        let sql = format!("{} ORDER BY DRIVE_NAME", SELECT_TAPE_DRIVE);
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            let mut stmt = c.prepare(&sql)?;
            let drives = stmt.query_map([], row_to_tape_drive)?;
            drives.collect()
        })
    }

    fn get_tape_drive_names(&self) -> Result<Vec<String>, Error> {
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            let mut stmt = c.prepare("SELECT DRIVE_NAME FROM DRIVE_STATE ORDER BY DRIVE_NAME")?;
            let names = stmt.query_map([], |row| row.get(0))?;
            names.collect()
        })
    }

    fn delete_tape_drive(&self, drive_name: &str) -> Result<(), Error> {
        let mut conn = self.pool.get_conn()?;
        let count = conn.run(|c| {
            c.execute(
                "DELETE FROM DRIVE_STATE WHERE DRIVE_NAME = :DRIVE_NAME",
                named_params! { ":DRIVE_NAME": drive_name },
            )
        })?;
        if count == 0 {
            log::debug!("catalogue - tape drive '{}' not deleted, no such drive", drive_name);
        }
        Ok(())
    }

    fn set_desired_tape_drive_state(
        &self,
        drive_name: &str,
        desired: &DesiredDriveState,
    ) -> Result<(), Error> {
        let reason = checked(&desired.reason);
        let mut conn = self.pool.get_conn()?;
        let count = conn.run(|c| {
            c.execute(
                "UPDATE DRIVE_STATE SET \
                 DESIRED_UP = :DESIRED_UP, \
                 DESIRED_FORCE_DOWN = :DESIRED_FORCE_DOWN, \
                 REASON_UP_DOWN = :REASON_UP_DOWN \
                 WHERE DRIVE_NAME = :DRIVE_NAME",
                named_params! {
                    ":DESIRED_UP": desired.up,
                    ":DESIRED_FORCE_DOWN": desired.force_down,
                    ":REASON_UP_DOWN": reason,
                    ":DRIVE_NAME": drive_name,
                },
            )
        })?;
        if count == 0 {
            return Err(unknown_drive(drive_name));
        }
        Ok(())
    }

    fn set_desired_tape_drive_state_comment(
        &self,
        drive_name: &str,
        comment: &str,
    ) -> Result<(), Error> {
        let comment = checked(&Some(comment.to_string()));
        let mut conn = self.pool.get_conn()?;
        let count = conn.run(|c| {
            c.execute(
                "UPDATE DRIVE_STATE SET USER_COMMENT = :USER_COMMENT \
                 WHERE DRIVE_NAME = :DRIVE_NAME",
                named_params! {
                    ":USER_COMMENT": comment,
                    ":DRIVE_NAME": drive_name,
                },
            )
        })?;
        if count == 0 {
            return Err(unknown_drive(drive_name));
        }
        Ok(())
    }

    fn update_tape_drive_statistics(
        &self,
        drive_name: &str,
        host: &str,
        logical_library: &str,
        statistics: &TapeDriveStatistics,
    ) -> Result<(), Error> {
        let bytes_transfered = sql_count(
            DriveColumn::BytesTransferedInSession.name(),
            statistics.bytes_transfered_in_session,
        )?;
        let files_transfered = sql_count(
            DriveColumn::FilesTransferedInSession.name(),
            statistics.files_transfered_in_session,
        )?;
        let log = &statistics.last_modification_log;
        let mut conn = self.pool.get_conn()?;
        let count = conn.run(|c| {
            c.execute(
                "UPDATE DRIVE_STATE SET \
                 HOST = :HOST, \
                 LOGICAL_LIBRARY = :LOGICAL_LIBRARY, \
                 BYTES_TRANSFERED_IN_SESSION = :BYTES_TRANSFERED_IN_SESSION, \
                 FILES_TRANSFERED_IN_SESSION = :FILES_TRANSFERED_IN_SESSION, \
                 SESSION_ELAPSED_TIME = CASE WHEN SESSION_START_TIME IS NULL \
                     THEN 0 ELSE :REPORT_TIME - SESSION_START_TIME END, \
                 LAST_UPDATE_USER_NAME = :LAST_UPDATE_USER_NAME, \
                 LAST_UPDATE_HOST_NAME = :LAST_UPDATE_HOST_NAME, \
                 LAST_UPDATE_TIME = :LAST_UPDATE_TIME \
                 WHERE DRIVE_NAME = :DRIVE_NAME AND DRIVE_STATUS = 'TRANSFERING'",
                named_params! {
                    ":HOST": host,
                    ":LOGICAL_LIBRARY": logical_library,
                    ":BYTES_TRANSFERED_IN_SESSION": bytes_transfered,
                    ":FILES_TRANSFERED_IN_SESSION": files_transfered,
                    ":REPORT_TIME": statistics.report_time,
                    ":LAST_UPDATE_USER_NAME": log.username,
                    ":LAST_UPDATE_HOST_NAME": log.host,
                    ":LAST_UPDATE_TIME": log.time,
                    ":DRIVE_NAME": drive_name,
                },
            )
        })?;
        if count == 0 {
            log::debug!(
                "catalogue - statistics of tape drive '{}' not updated, drive is not transferring",
                drive_name
            );
        }
        Ok(())
    }

    fn update_tape_drive_status(&self, drive: &TapeDrive) -> Result<(), Error> {
        if drive.drive_status == DriveStatus::Unknown {
            return Err(CatalogueError::UnexpectedStatus(format!(
                "cannot store status {} for tape drive {}",
                drive.drive_status, drive.drive_name
            ))
            .into());
        }

        let unchanged = DriveUpdate::new(
            &unchanged_status_columns(drive),
            drive,
            Some(drive.drive_status),
        )?;
        let changed = DriveUpdate::new(&status_change_columns(drive), drive, None)?;

        let mut conn = self.pool.get_conn()?;
        let count = conn.transaction(|tx| {
            if unchanged.execute(tx)? > 0 {
                return Ok(1);
            }
            changed.execute(tx)
        })?;

        if count == 0 {
            return Err(CatalogueError::UserError(format!(
                "Cannot update status for drive {}. Drive not found.",
                drive.drive_name
            ))
            .into());
        }
        Ok(())
    }

    fn get_disk_space_reservations(&self) -> Result<BTreeMap<String, u64>, Error> {
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            let mut stmt = c.prepare(
                "SELECT DISK_SYSTEM_NAME, RESERVED_BYTES FROM DRIVE_STATE \
                 WHERE DISK_SYSTEM_NAME IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                let bytes = count_from_sql(row, "RESERVED_BYTES")?;
                Ok((row.get::<_, String>("DISK_SYSTEM_NAME")?, bytes.unwrap_or(0)))
            })?;

            // summed here, the total of all drives may exceed the column type
            let mut reservations = BTreeMap::new();
            for row in rows {
                let (disk_system, bytes) = row?;
                let total: &mut u64 = reservations.entry(disk_system).or_default();
                *total = total.saturating_add(bytes);
            }
            Ok(reservations)
        })
    }

    fn reserve_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error> {
        let (disk_system, bytes) = match request.first() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let bytes_to_add = sql_count(
            DriveColumn::ReservedBytes.name(),
            check_reservation_bytes(bytes)?,
        )?;
        log::debug!(
            "drive '{}' mount {} - reserving {} bytes on disk system '{}'",
            drive_name,
            mount_id,
            bytes,
            disk_system
        );

        let mut conn = self.pool.get_conn()?;
        let (accumulated, reset) = conn.transaction(|tx| {
            let accumulated = tx.execute(
                "UPDATE DRIVE_STATE SET RESERVED_BYTES = CASE \
                 WHEN RESERVED_BYTES > :MAX_BYTES - :BYTES_TO_ADD THEN :MAX_BYTES \
                 ELSE RESERVED_BYTES + :BYTES_TO_ADD END \
                 WHERE DRIVE_NAME = :DRIVE_NAME \
                 AND DISK_SYSTEM_NAME = :DISK_SYSTEM_NAME \
                 AND RESERVATION_SESSION_ID = :RESERVATION_SESSION_ID",
                named_params! {
                    ":BYTES_TO_ADD": bytes_to_add,
                    ":MAX_BYTES": i64::MAX,
                    ":DRIVE_NAME": drive_name,
                    ":DISK_SYSTEM_NAME": disk_system,
                    ":RESERVATION_SESSION_ID": id_value(Some(mount_id)),
                },
            )?;
            if accumulated == 1 {
                return Ok((accumulated, 0));
            }
            // another mount (or none) owns the reservation, start a new one
            let reset = tx.execute(
                "UPDATE DRIVE_STATE SET \
                 DISK_SYSTEM_NAME = :DISK_SYSTEM_NAME, \
                 RESERVED_BYTES = :BYTES_TO_ADD, \
                 RESERVATION_SESSION_ID = :RESERVATION_SESSION_ID \
                 WHERE DRIVE_NAME = :DRIVE_NAME",
                named_params! {
                    ":BYTES_TO_ADD": bytes_to_add,
                    ":DRIVE_NAME": drive_name,
                    ":DISK_SYSTEM_NAME": disk_system,
                    ":RESERVATION_SESSION_ID": id_value(Some(mount_id)),
                },
            )?;
            Ok((accumulated, reset))
        })?;

        if accumulated != 1 {
            if reset == 1 {
                log::info!(
                    "drive '{}' mount {} - created reservation of {} bytes on disk system '{}'",
                    drive_name,
                    mount_id,
                    bytes,
                    disk_system
                );
            } else {
                log::error!(
                    "drive '{}' mount {} - failed to create disk space reservation on '{}', \
                     no such drive",
                    drive_name,
                    mount_id,
                    disk_system
                );
            }
        }
        Ok(())
    }

    fn release_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error> {
        let (disk_system, bytes) = match request.first() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        log::debug!(
            "drive '{}' mount {} - releasing {} bytes on disk system '{}'",
            drive_name,
            mount_id,
            bytes,
            disk_system
        );

        // no stored reservation exceeds the column type, larger releases
        // clear it just the same
        let bytes_to_subtract = i64::try_from(bytes).unwrap_or(i64::MAX);

        let mut conn = self.pool.get_conn()?;
        let count = conn.run(|c| {
            c.execute(
                "UPDATE DRIVE_STATE SET RESERVED_BYTES = CASE \
                 WHEN RESERVED_BYTES > :BYTES_TO_SUBTRACT THEN RESERVED_BYTES - :BYTES_TO_SUBTRACT \
                 ELSE 0 END \
                 WHERE DRIVE_NAME = :DRIVE_NAME \
                 AND DISK_SYSTEM_NAME = :DISK_SYSTEM_NAME \
                 AND RESERVATION_SESSION_ID = :RESERVATION_SESSION_ID",
                named_params! {
                    ":BYTES_TO_SUBTRACT": bytes_to_subtract,
                    ":DRIVE_NAME": drive_name,
                    ":DISK_SYSTEM_NAME": disk_system,
                    ":RESERVATION_SESSION_ID": id_value(Some(mount_id)),
                },
            )
        })?;

        if count != 1 {
            log::warn!(
                "drive '{}' mount {} - release of {} bytes on disk system '{}' ignored, \
                 reservation belongs to another mount or disk system",
                drive_name,
                mount_id,
                bytes,
                disk_system
            );
        }
        Ok(())
    }
}

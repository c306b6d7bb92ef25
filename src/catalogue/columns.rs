//! Columns written by a drive status update
//!
//! A status update either keeps the stored status, then only a few columns
//! change, or moves the drive to another status, then most of the record is
//! replaced. Which columns are written depends on the new status and on the
//! optional fields the record carries. Both tables are shared by all
//! catalogue implementations, so the SQL and the in-memory catalogue persist
//! the same subset of a record.

use tds_api_types::{DriveStatus, TapeDrive};

/// A column of the `DRIVE_STATE` table which status updates may write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveColumn {
    Host,
    LogicalLibrary,
    SessionId,
    BytesTransferedInSession,
    FilesTransferedInSession,
    SessionStartTime,
    SessionElapsedTime,
    MountStartTime,
    TransferStartTime,
    UnloadStartTime,
    UnmountStartTime,
    DrainingStartTime,
    DownOrUpStartTime,
    ProbeStartTime,
    CleanupStartTime,
    StartStartTime,
    ShutdownTime,
    MountType,
    DriveStatus,
    DesiredUp,
    DesiredForceDown,
    ReasonUpDown,
    CurrentVid,
    CurrentActivity,
    CurrentTapePool,
    CurrentVo,
    CurrentPriority,
    UserComment,
    LastUpdateUserName,
    LastUpdateHostName,
    LastUpdateTime,
    DiskSystemName,
    ReservedBytes,
    ReservationSessionId,
}

/// How a column is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnUpdate {
    /// The value the record carries
    Value(DriveColumn),
    /// NULL
    Clear(DriveColumn),
    /// Seconds between the stored session start and the time of the report,
    /// zero without a session start
    ElapsedSinceSessionStart,
    /// `UP`, unless the stored operator intent is down, then `DOWN`
    UpOrMaybeDown,
}

impl DriveColumn {
    /// Column name in the `DRIVE_STATE` table.
    pub fn name(self) -> &'static str {
        match self {
            DriveColumn::Host => "HOST",
            DriveColumn::LogicalLibrary => "LOGICAL_LIBRARY",
            DriveColumn::SessionId => "SESSION_ID",
            DriveColumn::BytesTransferedInSession => "BYTES_TRANSFERED_IN_SESSION",
            DriveColumn::FilesTransferedInSession => "FILES_TRANSFERED_IN_SESSION",
            DriveColumn::SessionStartTime => "SESSION_START_TIME",
            DriveColumn::SessionElapsedTime => "SESSION_ELAPSED_TIME",
            DriveColumn::MountStartTime => "MOUNT_START_TIME",
            DriveColumn::TransferStartTime => "TRANSFER_START_TIME",
            DriveColumn::UnloadStartTime => "UNLOAD_START_TIME",
            DriveColumn::UnmountStartTime => "UNMOUNT_START_TIME",
            DriveColumn::DrainingStartTime => "DRAINING_START_TIME",
            DriveColumn::DownOrUpStartTime => "DOWN_OR_UP_START_TIME",
            DriveColumn::ProbeStartTime => "PROBE_START_TIME",
            DriveColumn::CleanupStartTime => "CLEANUP_START_TIME",
            DriveColumn::StartStartTime => "START_START_TIME",
            DriveColumn::ShutdownTime => "SHUTDOWN_TIME",
            DriveColumn::MountType => "MOUNT_TYPE",
            DriveColumn::DriveStatus => "DRIVE_STATUS",
            DriveColumn::DesiredUp => "DESIRED_UP",
            DriveColumn::DesiredForceDown => "DESIRED_FORCE_DOWN",
            DriveColumn::ReasonUpDown => "REASON_UP_DOWN",
            DriveColumn::CurrentVid => "CURRENT_VID",
            DriveColumn::CurrentActivity => "CURRENT_ACTIVITY",
            DriveColumn::CurrentTapePool => "CURRENT_TAPE_POOL",
            DriveColumn::CurrentVo => "CURRENT_VO",
            DriveColumn::CurrentPriority => "CURRENT_PRIORITY",
            DriveColumn::UserComment => "USER_COMMENT",
            DriveColumn::LastUpdateUserName => "LAST_UPDATE_USER_NAME",
            DriveColumn::LastUpdateHostName => "LAST_UPDATE_HOST_NAME",
            DriveColumn::LastUpdateTime => "LAST_UPDATE_TIME",
            DriveColumn::DiskSystemName => "DISK_SYSTEM_NAME",
            DriveColumn::ReservedBytes => "RESERVED_BYTES",
            DriveColumn::ReservationSessionId => "RESERVATION_SESSION_ID",
        }
    }

    /// Copy the column's value from `from` into `to`.
    pub fn copy(self, from: &TapeDrive, to: &mut TapeDrive) {
        match self {
            DriveColumn::Host => to.host = from.host.clone(),
            DriveColumn::LogicalLibrary => to.logical_library = from.logical_library.clone(),
            DriveColumn::SessionId => to.session_id = from.session_id,
            DriveColumn::BytesTransferedInSession => {
                to.bytes_transfered_in_session = from.bytes_transfered_in_session
            }
            DriveColumn::FilesTransferedInSession => {
                to.files_transfered_in_session = from.files_transfered_in_session
            }
            DriveColumn::SessionStartTime => to.session_start_time = from.session_start_time,
            DriveColumn::SessionElapsedTime => to.session_elapsed_time = from.session_elapsed_time,
            DriveColumn::MountStartTime => to.mount_start_time = from.mount_start_time,
            DriveColumn::TransferStartTime => to.transfer_start_time = from.transfer_start_time,
            DriveColumn::UnloadStartTime => to.unload_start_time = from.unload_start_time,
            DriveColumn::UnmountStartTime => to.unmount_start_time = from.unmount_start_time,
            DriveColumn::DrainingStartTime => to.draining_start_time = from.draining_start_time,
            DriveColumn::DownOrUpStartTime => to.down_or_up_start_time = from.down_or_up_start_time,
            DriveColumn::ProbeStartTime => to.probe_start_time = from.probe_start_time,
            DriveColumn::CleanupStartTime => to.cleanup_start_time = from.cleanup_start_time,
            DriveColumn::StartStartTime => to.start_start_time = from.start_start_time,
            DriveColumn::ShutdownTime => to.shutdown_time = from.shutdown_time,
            DriveColumn::MountType => to.mount_type = from.mount_type,
            DriveColumn::DriveStatus => to.drive_status = from.drive_status,
            DriveColumn::DesiredUp => to.desired_up = from.desired_up,
            DriveColumn::DesiredForceDown => to.desired_force_down = from.desired_force_down,
            DriveColumn::ReasonUpDown => to.reason_up_down = non_empty(&from.reason_up_down),
            DriveColumn::CurrentVid => to.current_vid = non_empty(&from.current_vid),
            DriveColumn::CurrentActivity => to.current_activity = non_empty(&from.current_activity),
            DriveColumn::CurrentTapePool => {
                to.current_tape_pool = non_empty(&from.current_tape_pool)
            }
            DriveColumn::CurrentVo => to.current_vo = non_empty(&from.current_vo),
            DriveColumn::CurrentPriority => to.current_priority = from.current_priority,
            DriveColumn::UserComment => to.user_comment = non_empty(&from.user_comment),
            DriveColumn::LastUpdateUserName
            | DriveColumn::LastUpdateHostName
            | DriveColumn::LastUpdateTime => {
                to.last_modification_log = from.last_modification_log.clone()
            }
            DriveColumn::DiskSystemName => to.disk_system_name = from.disk_system_name.clone(),
            DriveColumn::ReservedBytes => to.reserved_bytes = from.reserved_bytes,
            DriveColumn::ReservationSessionId => {
                to.reservation_session_id = from.reservation_session_id
            }
        }
    }

    /// Set the column to NULL in `to`.
    ///
    /// Only nullable columns are ever cleared, the others are left alone.
    pub fn clear(self, to: &mut TapeDrive) {
        match self {
            DriveColumn::DiskSystemName => to.disk_system_name = None,
            DriveColumn::ReservedBytes => to.reserved_bytes = None,
            DriveColumn::ReservationSessionId => to.reservation_session_id = None,
            DriveColumn::ReasonUpDown => to.reason_up_down = None,
            DriveColumn::UserComment => to.user_comment = None,
            DriveColumn::SessionId => to.session_id = None,
            DriveColumn::SessionStartTime => to.session_start_time = None,
            DriveColumn::SessionElapsedTime => to.session_elapsed_time = None,
            _ => {}
        }
    }
}

/// The status a drive ends up in when `requested` is written.
///
/// `Up` is a request: while the stored operator intent is down the drive
/// stays down. Catalogues resolve it against the intent they hold at the
/// time of the write, never against an earlier read.
pub fn resolved_status(requested: DriveStatus, desired_up: bool) -> DriveStatus {
    if requested == DriveStatus::Up && !desired_up {
        DriveStatus::Down
    } else {
        requested
    }
}

/// Strings are stored as NULL when empty.
pub fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

const STATUS_TIME_COLUMNS: [DriveColumn; 10] = [
    DriveColumn::MountStartTime,
    DriveColumn::TransferStartTime,
    DriveColumn::UnloadStartTime,
    DriveColumn::UnmountStartTime,
    DriveColumn::DrainingStartTime,
    DriveColumn::DownOrUpStartTime,
    DriveColumn::ProbeStartTime,
    DriveColumn::CleanupStartTime,
    DriveColumn::StartStartTime,
    DriveColumn::ShutdownTime,
];

const LAST_UPDATE_COLUMNS: [DriveColumn; 3] = [
    DriveColumn::LastUpdateUserName,
    DriveColumn::LastUpdateHostName,
    DriveColumn::LastUpdateTime,
];

const RESERVATION_COLUMNS: [DriveColumn; 3] = [
    DriveColumn::DiskSystemName,
    DriveColumn::ReservedBytes,
    DriveColumn::ReservationSessionId,
];

/// Columns written when the stored status equals the record's status,
/// resolved with [`resolved_status`].
pub fn unchanged_status_columns(drive: &TapeDrive) -> Vec<ColumnUpdate> {
    let status = drive.drive_status;
    let mut list = vec![
        ColumnUpdate::Value(DriveColumn::Host),
        ColumnUpdate::Value(DriveColumn::LogicalLibrary),
    ];

    if status == DriveStatus::Transferring {
        list.push(ColumnUpdate::Value(DriveColumn::BytesTransferedInSession));
        list.push(ColumnUpdate::Value(DriveColumn::FilesTransferedInSession));
        list.push(ColumnUpdate::ElapsedSinceSessionStart);
    }
    if status.is_idle() {
        list.extend(RESERVATION_COLUMNS.iter().map(|c| ColumnUpdate::Clear(*c)));
    }
    if drive.reason_up_down.is_some() {
        list.push(ColumnUpdate::Value(DriveColumn::ReasonUpDown));
    }

    list.extend(LAST_UPDATE_COLUMNS.iter().map(|c| ColumnUpdate::Value(*c)));
    list
}

/// Columns written when the drive enters the record's status.
pub fn status_change_columns(drive: &TapeDrive) -> Vec<ColumnUpdate> {
    let status = drive.drive_status;
    let mut list = vec![
        ColumnUpdate::Value(DriveColumn::Host),
        ColumnUpdate::Value(DriveColumn::LogicalLibrary),
        ColumnUpdate::Value(DriveColumn::SessionId),
        ColumnUpdate::Value(DriveColumn::BytesTransferedInSession),
        ColumnUpdate::Value(DriveColumn::FilesTransferedInSession),
        ColumnUpdate::Value(DriveColumn::SessionElapsedTime),
    ];
    list.extend(STATUS_TIME_COLUMNS.iter().map(|c| ColumnUpdate::Value(*c)));
    list.push(ColumnUpdate::Value(DriveColumn::MountType));

    // mounting and transferring belong to the session started before
    if !status.keeps_session_start() {
        list.push(ColumnUpdate::Value(DriveColumn::SessionStartTime));
    }

    if status == DriveStatus::Down {
        list.push(ColumnUpdate::Value(DriveColumn::DesiredUp));
        list.push(ColumnUpdate::Value(DriveColumn::DesiredForceDown));
    }

    if status.is_idle() {
        list.extend(RESERVATION_COLUMNS.iter().map(|c| ColumnUpdate::Clear(*c)));
    }

    if status == DriveStatus::Up {
        list.push(ColumnUpdate::UpOrMaybeDown);
    } else {
        list.push(ColumnUpdate::Value(DriveColumn::DriveStatus));
    }

    list.extend(
        [
            DriveColumn::CurrentVid,
            DriveColumn::CurrentActivity,
            DriveColumn::CurrentTapePool,
            DriveColumn::CurrentVo,
            DriveColumn::CurrentPriority,
        ]
        .iter()
        .map(|c| ColumnUpdate::Value(*c)),
    );

    if drive.reason_up_down.is_some() {
        list.push(ColumnUpdate::Value(DriveColumn::ReasonUpDown));
    }
    if drive.user_comment.is_some() {
        list.push(ColumnUpdate::Value(DriveColumn::UserComment));
    }

    list.extend(LAST_UPDATE_COLUMNS.iter().map(|c| ColumnUpdate::Value(*c)));
    list
}

/// Apply an update to an in-memory record the way the SQL catalogue does.
///
/// `report_time` is the time of the status report.
pub fn apply_column_updates(
    updates: &[ColumnUpdate],
    record: &TapeDrive,
    report_time: i64,
    stored: &mut TapeDrive,
) {
    for update in updates {
        match *update {
            ColumnUpdate::Value(column) => column.copy(record, stored),
            ColumnUpdate::Clear(column) => column.clear(stored),
            ColumnUpdate::ElapsedSinceSessionStart => {
                stored.session_elapsed_time = Some(
                    stored
                        .session_start_time
                        .map(|start| report_time - start)
                        .unwrap_or(0),
                );
            }
            ColumnUpdate::UpOrMaybeDown => {
                stored.drive_status = resolved_status(DriveStatus::Up, stored.desired_up);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn written(list: &[ColumnUpdate]) -> Vec<&'static str> {
        list.iter()
            .filter_map(|update| match update {
                ColumnUpdate::Value(column) => Some(column.name()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn unchanged_status_touches_few_columns() {
        let mut drive = TapeDrive::new("VDSTK11", "admin_host", "VLSTK10");
        drive.drive_status = DriveStatus::Mounting;
        let list = unchanged_status_columns(&drive);
        assert_eq!(
            written(&list),
            [
                "HOST",
                "LOGICAL_LIBRARY",
                "LAST_UPDATE_USER_NAME",
                "LAST_UPDATE_HOST_NAME",
                "LAST_UPDATE_TIME"
            ]
        );

        drive.drive_status = DriveStatus::Transferring;
        let list = unchanged_status_columns(&drive);
        assert!(list.contains(&ColumnUpdate::ElapsedSinceSessionStart));
        assert!(list.contains(&ColumnUpdate::Value(DriveColumn::BytesTransferedInSession)));

        drive.drive_status = DriveStatus::Down;
        let list = unchanged_status_columns(&drive);
        assert!(list.contains(&ColumnUpdate::Clear(DriveColumn::ReservedBytes)));
    }

    #[test]
    fn status_change_columns_per_status() {
        let mut drive = TapeDrive::new("VDSTK11", "admin_host", "VLSTK10");

        drive.drive_status = DriveStatus::Mounting;
        let list = status_change_columns(&drive);
        assert!(!list.contains(&ColumnUpdate::Value(DriveColumn::SessionStartTime)));
        assert!(!list.contains(&ColumnUpdate::Value(DriveColumn::DesiredUp)));
        assert!(!list.contains(&ColumnUpdate::Clear(DriveColumn::DiskSystemName)));

        drive.drive_status = DriveStatus::Starting;
        let list = status_change_columns(&drive);
        assert!(list.contains(&ColumnUpdate::Value(DriveColumn::SessionStartTime)));
        assert!(list.contains(&ColumnUpdate::Value(DriveColumn::CurrentPriority)));
        assert!(list.contains(&ColumnUpdate::Value(DriveColumn::StartStartTime)));

        drive.drive_status = DriveStatus::Down;
        let list = status_change_columns(&drive);
        assert!(list.contains(&ColumnUpdate::Value(DriveColumn::DesiredUp)));
        assert!(list.contains(&ColumnUpdate::Clear(DriveColumn::ReservationSessionId)));

        drive.drive_status = DriveStatus::Up;
        let list = status_change_columns(&drive);
        assert!(list.contains(&ColumnUpdate::UpOrMaybeDown));
        assert!(!list.contains(&ColumnUpdate::Value(DriveColumn::DriveStatus)));

        assert!(!list.contains(&ColumnUpdate::Value(DriveColumn::UserComment)));
        drive.user_comment = Some("spare drive".to_string());
        let list = status_change_columns(&drive);
        assert!(list.contains(&ColumnUpdate::Value(DriveColumn::UserComment)));
    }

    #[test]
    fn only_an_explicit_down_writes_the_intent() {
        let mut drive = TapeDrive::new("VDSTK11", "admin_host", "VLSTK10");
        drive.drive_status = DriveStatus::Up;
        let list = status_change_columns(&drive);
        assert!(!list.contains(&ColumnUpdate::Value(DriveColumn::DesiredUp)));
        assert!(!list.contains(&ColumnUpdate::Value(DriveColumn::DesiredForceDown)));

        assert_eq!(resolved_status(DriveStatus::Up, false), DriveStatus::Down);
        assert_eq!(resolved_status(DriveStatus::Up, true), DriveStatus::Up);
        assert_eq!(resolved_status(DriveStatus::Probing, false), DriveStatus::Probing);
    }

    #[test]
    fn up_or_maybe_down_follows_stored_intent() {
        let mut record = TapeDrive::new("VDSTK11", "admin_host", "VLSTK10");
        record.drive_status = DriveStatus::Up;
        let mut stored = record.clone();
        stored.desired_up = false;

        apply_column_updates(&status_change_columns(&record), &record, 10, &mut stored);
        assert_eq!(stored.drive_status, DriveStatus::Down);

        stored.desired_up = true;
        apply_column_updates(&status_change_columns(&record), &record, 10, &mut stored);
        assert_eq!(stored.drive_status, DriveStatus::Up);
    }
}

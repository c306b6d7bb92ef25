//! Types for the tape drive state catalogue
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use proxmox_schema::api;

use crate::{
    DRIVE_CONFIG_KEY_SCHEMA, DRIVE_NAME_SCHEMA, HOST_NAME_SCHEMA, LOGICAL_LIBRARY_NAME_SCHEMA,
    SINGLE_LINE_COMMENT_SCHEMA,
};

#[api()]
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
/// Observed status of a tape drive
pub enum DriveStatus {
    /// Drive is not available for mounts
    Down,
    /// Drive is idle and accepts mounts
    Up,
    /// Tape server is probing the drive
    Probing,
    /// A mount session is starting
    Starting,
    /// A tape is being mounted
    Mounting,
    /// Data is transferred from or to the tape
    #[serde(rename = "TRANSFERING")]
    Transferring,
    /// The tape is being unloaded
    Unloading,
    /// The tape is being unmounted
    Unmounting,
    /// Buffered data is drained to disk
    #[serde(rename = "DRAININGTODISK")]
    DrainingToDisk,
    /// The session cleans up after a failure
    #[serde(rename = "CLEANINGUP")]
    CleaningUp,
    /// The tape server process is shutting down
    Shutdown,
    /// Invalid status, never persisted
    Unknown,
}
serde_plain::derive_display_from_serialize!(DriveStatus);
serde_plain::derive_fromstr_from_deserialize!(DriveStatus);

impl Default for DriveStatus {
    fn default() -> Self {
        DriveStatus::Down
    }
}

impl DriveStatus {
    /// Statuses which a drive record may be stored with.
    pub const VALID: [DriveStatus; 11] = [
        DriveStatus::Down,
        DriveStatus::Up,
        DriveStatus::Probing,
        DriveStatus::Starting,
        DriveStatus::Mounting,
        DriveStatus::Transferring,
        DriveStatus::Unloading,
        DriveStatus::Unmounting,
        DriveStatus::DrainingToDisk,
        DriveStatus::CleaningUp,
        DriveStatus::Shutdown,
    ];

    /// A drive in one of these statuses may not hold a disk space reservation.
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            DriveStatus::Down | DriveStatus::Up | DriveStatus::Shutdown | DriveStatus::Unknown
        )
    }

    /// Statuses which keep the session start time of the running mount.
    pub fn keeps_session_start(self) -> bool {
        matches!(self, DriveStatus::Mounting | DriveStatus::Transferring)
    }
}

#[api()]
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Type of a tape mount
pub enum MountType {
    /// No tape mounted
    NoMount,
    /// Archive user data
    ArchiveForUser,
    /// Archive data for repack
    ArchiveForRepack,
    /// Retrieve data from tape
    Retrieve,
    /// Label a tape
    Label,
    /// Any archive mount
    ArchiveAllTypes,
}
serde_plain::derive_display_from_serialize!(MountType);
serde_plain::derive_fromstr_from_deserialize!(MountType);

impl Default for MountType {
    fn default() -> Self {
        MountType::NoMount
    }
}

#[api(
    properties: {
        host: {
            schema: HOST_NAME_SCHEMA,
        },
    },
)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Who changed a record, from where and when
pub struct EntryLog {
    /// User name
    pub username: String,
    pub host: String,
    /// Epoch
    pub time: i64,
}

impl EntryLog {
    pub fn new<U: Into<String>, H: Into<String>>(username: U, host: H, time: i64) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
            time,
        }
    }
}

#[api(
    properties: {
        "drive-name": {
            schema: DRIVE_NAME_SCHEMA,
        },
        host: {
            schema: HOST_NAME_SCHEMA,
        },
        "logical-library": {
            schema: LOGICAL_LIBRARY_NAME_SCHEMA,
        },
    },
)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Identity of a tape drive as seen by its tape server
pub struct DriveInfo {
    pub drive_name: String,
    pub host: String,
    pub logical_library: String,
}

impl DriveInfo {
    pub fn new<N, H, L>(drive_name: N, host: H, logical_library: L) -> Self
    where
        N: Into<String>,
        H: Into<String>,
        L: Into<String>,
    {
        Self {
            drive_name: drive_name.into(),
            host: host.into(),
            logical_library: logical_library.into(),
        }
    }
}

#[api(
    properties: {
        reason: {
            schema: SINGLE_LINE_COMMENT_SCHEMA,
            optional: true,
        },
        comment: {
            schema: SINGLE_LINE_COMMENT_SCHEMA,
            optional: true,
        },
    },
)]
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Operator intent for a tape drive
pub struct DesiredDriveState {
    /// Drive should be up
    pub up: bool,
    /// Drive should go down even if a session is running
    pub force_down: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Transfer statistics reported during a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeDriveStatistics {
    pub bytes_transfered_in_session: u64,
    pub files_transfered_in_session: u64,
    pub report_time: i64,
    pub last_modification_log: EntryLog,
}

#[api(
    properties: {
        "drive-name": {
            schema: DRIVE_NAME_SCHEMA,
        },
        host: {
            schema: HOST_NAME_SCHEMA,
        },
        "logical-library": {
            schema: LOGICAL_LIBRARY_NAME_SCHEMA,
        },
        "mount-type": {
            type: MountType,
        },
        "drive-status": {
            type: DriveStatus,
        },
        "next-mount-type": {
            type: MountType,
        },
        "reason-up-down": {
            schema: SINGLE_LINE_COMMENT_SCHEMA,
            optional: true,
        },
        "user-comment": {
            schema: SINGLE_LINE_COMMENT_SCHEMA,
            optional: true,
        },
        "creation-log": {
            type: EntryLog,
            optional: true,
        },
        "last-modification-log": {
            type: EntryLog,
            optional: true,
        },
    },
)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Persistent state of one tape drive
pub struct TapeDrive {
    pub drive_name: String,
    pub host: String,
    pub logical_library: String,
    /// Physical library the logical library belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_library_name: Option<String>,

    /// Mount session identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    /// Bytes transferred in the current session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_transfered_in_session: Option<u64>,
    /// Files transferred in the current session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_transfered_in_session: Option<u64>,

    /// Start of the running mount session (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_start_time: Option<i64>,
    /// Seconds since the session started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_elapsed_time: Option<i64>,
    /// Entered Mounting (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_start_time: Option<i64>,
    /// Entered Transferring (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_start_time: Option<i64>,
    /// Entered Unloading (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unload_start_time: Option<i64>,
    /// Entered Unmounting (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmount_start_time: Option<i64>,
    /// Entered DrainingToDisk (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draining_start_time: Option<i64>,
    /// Entered Down or Up (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_or_up_start_time: Option<i64>,
    /// Entered Probing (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_start_time: Option<i64>,
    /// Entered CleaningUp (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_start_time: Option<i64>,
    /// Entered Starting (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_start_time: Option<i64>,
    /// Entered Shutdown (epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_time: Option<i64>,

    pub mount_type: MountType,
    pub drive_status: DriveStatus,
    /// Operator wants the drive up
    pub desired_up: bool,
    /// Operator wants the drive down, even during a session
    pub desired_force_down: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_up_down: Option<String>,

    /// Volume currently mounted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_vid: Option<String>,
    /// Software version of the tape server which created the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cta_version: Option<String>,
    /// Priority of the current mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_priority: Option<u64>,
    /// Activity of the current retrieve mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_activity: Option<String>,
    /// Tape pool of the current mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tape_pool: Option<String>,
    pub next_mount_type: MountType,
    /// Volume of the next mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_vid: Option<String>,
    /// Tape pool of the next mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tape_pool: Option<String>,
    /// Priority of the next mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_priority: Option<u64>,
    /// Activity of the next mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_activity: Option<String>,

    /// Device file of the drive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_file_name: Option<String>,
    /// Library slot, as configured on the tape server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_library_slot: Option<String>,

    /// Virtual organization of the current mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_vo: Option<String>,
    /// Virtual organization of the next mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_vo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_comment: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_log: Option<EntryLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modification_log: Option<EntryLog>,

    /// Disk system holding the reservation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_system_name: Option<String>,
    /// Reserved bytes on the disk system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_bytes: Option<u64>,
    /// Mount which owns the reservation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_session_id: Option<u64>,
}

impl TapeDrive {
    /// A drive record which is down and has no mount.
    pub fn new<N, H, L>(drive_name: N, host: H, logical_library: L) -> Self
    where
        N: Into<String>,
        H: Into<String>,
        L: Into<String>,
    {
        Self {
            drive_name: drive_name.into(),
            host: host.into(),
            logical_library: logical_library.into(),
            physical_library_name: None,
            session_id: None,
            bytes_transfered_in_session: None,
            files_transfered_in_session: None,
            session_start_time: None,
            session_elapsed_time: None,
            mount_start_time: None,
            transfer_start_time: None,
            unload_start_time: None,
            unmount_start_time: None,
            draining_start_time: None,
            down_or_up_start_time: None,
            probe_start_time: None,
            cleanup_start_time: None,
            start_start_time: None,
            shutdown_time: None,
            mount_type: MountType::NoMount,
            drive_status: DriveStatus::Down,
            desired_up: false,
            desired_force_down: false,
            reason_up_down: None,
            current_vid: None,
            cta_version: None,
            current_priority: None,
            current_activity: None,
            current_tape_pool: None,
            next_mount_type: MountType::NoMount,
            next_vid: None,
            next_tape_pool: None,
            next_priority: None,
            next_activity: None,
            dev_file_name: None,
            raw_library_slot: None,
            current_vo: None,
            next_vo: None,
            user_comment: None,
            creation_log: None,
            last_modification_log: None,
            disk_system_name: None,
            reserved_bytes: None,
            reservation_session_id: None,
        }
    }

    /// Identity of the tape server the record was last reported by.
    pub fn drive_info(&self) -> DriveInfo {
        DriveInfo::new(&self.drive_name, &self.host, &self.logical_library)
    }

    /// Mutable access to the timestamp which records when `status` was entered.
    ///
    /// Down and Up share one field. Unknown has none.
    pub fn status_time_mut(&mut self, status: DriveStatus) -> Option<&mut Option<i64>> {
        let field = match status {
            DriveStatus::Down | DriveStatus::Up => &mut self.down_or_up_start_time,
            DriveStatus::Probing => &mut self.probe_start_time,
            DriveStatus::Starting => &mut self.start_start_time,
            DriveStatus::Mounting => &mut self.mount_start_time,
            DriveStatus::Transferring => &mut self.transfer_start_time,
            DriveStatus::Unloading => &mut self.unload_start_time,
            DriveStatus::Unmounting => &mut self.unmount_start_time,
            DriveStatus::DrainingToDisk => &mut self.draining_start_time,
            DriveStatus::CleaningUp => &mut self.cleanup_start_time,
            DriveStatus::Shutdown => &mut self.shutdown_time,
            DriveStatus::Unknown => return None,
        };
        Some(field)
    }

    /// The timestamp which records when `status` was entered.
    pub fn status_time(&self, status: DriveStatus) -> Option<i64> {
        match status {
            DriveStatus::Down | DriveStatus::Up => self.down_or_up_start_time,
            DriveStatus::Probing => self.probe_start_time,
            DriveStatus::Starting => self.start_start_time,
            DriveStatus::Mounting => self.mount_start_time,
            DriveStatus::Transferring => self.transfer_start_time,
            DriveStatus::Unloading => self.unload_start_time,
            DriveStatus::Unmounting => self.unmount_start_time,
            DriveStatus::DrainingToDisk => self.draining_start_time,
            DriveStatus::CleaningUp => self.cleanup_start_time,
            DriveStatus::Shutdown => self.shutdown_time,
            DriveStatus::Unknown => None,
        }
    }

    /// Clear all status timestamps (not the session start time).
    pub fn clear_status_times(&mut self) {
        self.mount_start_time = None;
        self.transfer_start_time = None;
        self.unload_start_time = None;
        self.unmount_start_time = None;
        self.draining_start_time = None;
        self.down_or_up_start_time = None;
        self.probe_start_time = None;
        self.cleanup_start_time = None;
        self.start_start_time = None;
        self.shutdown_time = None;
    }

    /// Number of status timestamps which are set.
    pub fn status_times_set(&self) -> usize {
        [
            self.mount_start_time,
            self.transfer_start_time,
            self.unload_start_time,
            self.unmount_start_time,
            self.draining_start_time,
            self.down_or_up_start_time,
            self.probe_start_time,
            self.cleanup_start_time,
            self.start_start_time,
            self.shutdown_time,
        ]
        .iter()
        .filter(|t| t.is_some())
        .count()
    }

    pub fn has_disk_space_reservation(&self) -> bool {
        self.disk_system_name.is_some()
            || self.reserved_bytes.is_some()
            || self.reservation_session_id.is_some()
    }

    pub fn clear_disk_space_reservation(&mut self) {
        self.disk_system_name = None;
        self.reserved_bytes = None;
        self.reservation_session_id = None;
    }
}

/// Disk space to reserve or release, per disk system
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiskSpaceReservationRequest(BTreeMap<String, u64>);

impl DiskSpaceReservationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `bytes` for `disk_system`, summing up repeated entries.
    pub fn add<S: Into<String>>(&mut self, disk_system: S, bytes: u64) {
        let entry = self.0.entry(disk_system.into()).or_insert(0);
        *entry = entry.saturating_add(bytes);
    }

    /// The entry a catalogue acts on.
    pub fn first(&self) -> Option<(&str, u64)> {
        self.0.iter().next().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for DiskSpaceReservationRequest {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut request = Self::new();
        for (disk_system, bytes) in iter {
            request.add(disk_system, bytes);
        }
        request
    }
}

#[api(
    properties: {
        "drive-name": {
            schema: DRIVE_NAME_SCHEMA,
        },
        "key-name": {
            schema: DRIVE_CONFIG_KEY_SCHEMA,
        },
    },
)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// One configuration value of a tape drive
pub struct DriveConfigEntry {
    pub drive_name: String,
    /// Configuration category, e.g. the file the value was read from
    pub category: String,
    pub key_name: String,
    /// Configured value
    pub value: String,
    /// Where the value comes from
    pub source: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drive_status_names() {
        assert_eq!(DriveStatus::Transferring.to_string(), "TRANSFERING");
        assert_eq!(DriveStatus::DrainingToDisk.to_string(), "DRAININGTODISK");
        assert_eq!(DriveStatus::CleaningUp.to_string(), "CLEANINGUP");
        assert_eq!(DriveStatus::Shutdown.to_string(), "SHUTDOWN");
        assert_eq!("UNKNOWN".parse::<DriveStatus>().unwrap(), DriveStatus::Unknown);
        assert!("TRANSFERRING".parse::<DriveStatus>().is_err());
    }

    #[test]
    fn mount_type_names() {
        assert_eq!(MountType::NoMount.to_string(), "NO_MOUNT");
        assert_eq!(MountType::ArchiveAllTypes.to_string(), "ARCHIVE_ALL_TYPES");
        assert_eq!(
            "ARCHIVE_FOR_REPACK".parse::<MountType>().unwrap(),
            MountType::ArchiveForRepack
        );
    }

    #[test]
    fn status_time_fields_are_distinct() {
        let mut drive = TapeDrive::new("VDSTK11", "admin_host", "VLSTK10");
        for (i, status) in DriveStatus::VALID.iter().enumerate() {
            drive.clear_status_times();
            *drive.status_time_mut(*status).unwrap() = Some(i as i64);
            assert_eq!(drive.status_times_set(), 1);
            assert_eq!(drive.status_time(*status), Some(i as i64));
        }
        assert!(drive.status_time_mut(DriveStatus::Unknown).is_none());
    }

    #[test]
    fn reservation_request_sums_entries() {
        let mut request = DiskSpaceReservationRequest::new();
        assert!(request.first().is_none());
        request.add("sysB", 10);
        request.add("sysA", 5);
        request.add("sysA", 7);
        assert_eq!(request.first(), Some(("sysA", 12)));
    }

    #[test]
    fn drive_record_json() {
        let drive = TapeDrive::new("VDSTK11", "admin_host", "VLSTK10");
        let value = serde_json::to_value(&drive).unwrap();
        assert_eq!(value["drive-status"], "DOWN");
        assert_eq!(value["next-mount-type"], "NO_MOUNT");
        assert!(value.get("session-id").is_none());
        let back: TapeDrive = serde_json::from_value(value).unwrap();
        assert_eq!(back, drive);
    }
}

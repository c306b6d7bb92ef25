//! Drive status state machine
//!
//! [`TapeDrivesCatalogueState`] is the only place which decides what a drive
//! record looks like after a status report. It reads the stored record,
//! computes the next one with [`compute_drive_state`] and writes it back
//! through the catalogue, which persists the columns the transition touches.

use std::sync::Arc;

use anyhow::Error;

use tds_api_types::{
    DesiredDriveState, DriveInfo, DriveStatus, EntryLog, MountType, TapeDrive,
    TapeDriveStatistics,
};

use crate::catalogue::columns::{non_empty, resolved_status};
use crate::catalogue::{CatalogueError, DriveStateCatalogue};

/// User name recorded for changes made by the tape server itself
pub const NO_USER: &str = "NO_USER";

/// A status report of a tape server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDriveStatusInputs {
    pub status: DriveStatus,
    pub mount_type: MountType,
    pub report_time: i64,
    pub mount_session_id: u64,
    pub bytes_transferred: u64,
    pub files_transferred: u64,
    pub vid: String,
    pub tape_pool: String,
    pub vo: String,
    pub activity: Option<String>,
    /// Priority of the mount, taken over when a session starts
    pub priority: Option<u64>,
    pub reason: Option<String>,
}

impl ReportDriveStatusInputs {
    /// A report without mount, session or transfer details.
    pub fn new(status: DriveStatus, report_time: i64) -> Self {
        Self {
            status,
            mount_type: MountType::NoMount,
            report_time,
            mount_session_id: 0,
            bytes_transferred: 0,
            files_transferred: 0,
            vid: String::new(),
            tape_pool: String::new(),
            vo: String::new(),
            activity: None,
            priority: None,
            reason: None,
        }
    }
}

/// Transfer counters reported while transferring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportDriveStatsInputs {
    pub report_time: i64,
    pub bytes_transferred: u64,
    pub files_transferred: u64,
}

/// Drive details from the tape server configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveConfigLine {
    pub dev_file_name: String,
    pub raw_library_slot: String,
}

/// Who asked for a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityIdentity {
    pub username: String,
    pub host: String,
}

fn text(value: &str) -> Option<String> {
    non_empty(&Some(value.to_string()))
}

fn clear_session(drive: &mut TapeDrive) {
    drive.session_id = None;
    drive.bytes_transfered_in_session = None;
    drive.files_transfered_in_session = None;
    drive.session_elapsed_time = None;
    drive.current_vid = None;
    drive.current_tape_pool = None;
    drive.current_vo = None;
    drive.current_activity = None;
    drive.current_priority = None;
}

fn assign_mount(drive: &mut TapeDrive, inputs: &ReportDriveStatusInputs) {
    drive.session_id = Some(inputs.mount_session_id);
    drive.current_vid = text(&inputs.vid);
    drive.current_tape_pool = text(&inputs.tape_pool);
    drive.current_vo = text(&inputs.vo);
}

fn clear_reservation(drive: &mut TapeDrive) {
    if drive.has_disk_space_reservation() {
        log::warn!(
            "drive '{}' - discarding disk space reservation of {} bytes on '{}' (mount {}), \
             drive is {}",
            drive.drive_name,
            drive.reserved_bytes.unwrap_or(0),
            drive.disk_system_name.as_deref().unwrap_or(""),
            drive.reservation_session_id.unwrap_or(0),
            drive.drive_status,
        );
    }
    drive.clear_disk_space_reservation();
}

/// Compute the record of a drive after a status report.
///
/// `current` is the stored record, if any. Reporting the status the drive
/// is already in keeps the timestamp of that status and only refreshes the
/// audit log, the reason and, while transferring, the transfer counters.
///
/// An `Up` report stays `Up` in the returned record. The catalogue resolves
/// it against the operator intent it holds when writing, so a concurrent
/// change of the desired state is never overwritten. Operator fields only
/// carry what the report itself sets: the reason of an up or down report
/// and, for an explicit `Down`, the cleared intent.
pub fn compute_drive_state(
    current: Option<&TapeDrive>,
    drive_info: &DriveInfo,
    inputs: &ReportDriveStatusInputs,
) -> Result<TapeDrive, Error> {
    if inputs.status == DriveStatus::Unknown {
        return Err(CatalogueError::UnexpectedStatus(format!(
            "drive '{}' reported status {}",
            drive_info.drive_name, inputs.status
        ))
        .into());
    }

    let mut drive = match current {
        Some(current) => current.clone(),
        None => TapeDrive::new(
            &drive_info.drive_name,
            &drive_info.host,
            &drive_info.logical_library,
        ),
    };
    drive.host = drive_info.host.clone();
    drive.logical_library = drive_info.logical_library.clone();
    drive.last_modification_log = Some(EntryLog::new(
        NO_USER,
        &drive_info.host,
        inputs.report_time,
    ));
    drive.reason_up_down = None;
    drive.user_comment = None;

    let status = inputs.status;
    let resolved = resolved_status(status, drive.desired_up);

    if current.map(|c| c.drive_status) == Some(status) && resolved == status {
        if status == DriveStatus::Transferring {
            drive.bytes_transfered_in_session = Some(inputs.bytes_transferred);
            drive.files_transfered_in_session = Some(inputs.files_transferred);
            drive.session_elapsed_time = Some(
                drive
                    .session_start_time
                    .map(|start| inputs.report_time - start)
                    .unwrap_or(0),
            );
        }
        if let Some(reason) = non_empty(&inputs.reason) {
            drive.reason_up_down = Some(reason);
        }
        if status.is_idle() {
            clear_reservation(&mut drive);
        }
        return Ok(drive);
    }

    drive.drive_status = status;
    drive.clear_status_times();
    if let Some(time) = drive.status_time_mut(status) {
        *time = Some(inputs.report_time);
    }
    if !status.keeps_session_start() {
        drive.session_start_time = None;
    }
    drive.mount_type = inputs.mount_type;

    match status {
        DriveStatus::Down | DriveStatus::Up | DriveStatus::Probing => {
            clear_session(&mut drive);
            drive.mount_type = MountType::NoMount;
            if status == DriveStatus::Down {
                drive.desired_up = false;
                drive.desired_force_down = false;
            }
            if status != DriveStatus::Probing {
                if let Some(reason) = non_empty(&inputs.reason) {
                    drive.reason_up_down = Some(reason);
                }
            }
        }
        DriveStatus::Starting => {
            clear_session(&mut drive);
            assign_mount(&mut drive, inputs);
            drive.current_activity = non_empty(&inputs.activity);
            drive.current_priority = inputs.priority;
            drive.session_start_time = Some(inputs.report_time);
        }
        DriveStatus::Mounting => {
            drive.bytes_transfered_in_session = None;
            drive.files_transfered_in_session = None;
            drive.session_elapsed_time = None;
            assign_mount(&mut drive, inputs);
        }
        DriveStatus::Transferring => {
            assign_mount(&mut drive, inputs);
            drive.bytes_transfered_in_session = Some(inputs.bytes_transferred);
            drive.files_transfered_in_session = Some(inputs.files_transferred);
            drive.session_elapsed_time = Some(0);
        }
        DriveStatus::Unloading | DriveStatus::Unmounting | DriveStatus::DrainingToDisk => {
            assign_mount(&mut drive, inputs);
        }
        DriveStatus::CleaningUp => {
            assign_mount(&mut drive, inputs);
            drive.current_activity = None;
        }
        DriveStatus::Shutdown => {
            clear_session(&mut drive);
        }
        // rejected above
        DriveStatus::Unknown => {}
    }

    if status.is_idle() {
        clear_reservation(&mut drive);
    }

    Ok(drive)
}

/// Drive state bookkeeping on top of a catalogue
pub struct TapeDrivesCatalogueState {
    catalogue: Arc<dyn DriveStateCatalogue>,
}

impl TapeDrivesCatalogueState {
    pub fn new(catalogue: Arc<dyn DriveStateCatalogue>) -> Self {
        Self { catalogue }
    }

    pub fn catalogue(&self) -> &Arc<dyn DriveStateCatalogue> {
        &self.catalogue
    }

    /// Create the record of a drive, replacing any previous one.
    pub fn create_tape_drive_status(
        &self,
        drive_info: &DriveInfo,
        desired: &DesiredDriveState,
        mount_type: MountType,
        status: DriveStatus,
        config_line: &DriveConfigLine,
        identity: Option<&SecurityIdentity>,
    ) -> Result<(), Error> {
        let now = proxmox_time::epoch_i64();

        let mut drive = TapeDrive::new(
            &drive_info.drive_name,
            &drive_info.host,
            &drive_info.logical_library,
        );
        drive.down_or_up_start_time = Some(now);
        drive.mount_type = mount_type;
        drive.drive_status = status;
        drive.desired_up = desired.up;
        drive.desired_force_down = desired.force_down;
        drive.reason_up_down = non_empty(&desired.reason);
        drive.user_comment = non_empty(&desired.comment);
        drive.dev_file_name = text(&config_line.dev_file_name);
        drive.raw_library_slot = text(&config_line.raw_library_slot);

        let log = match identity {
            Some(identity) if !identity.username.is_empty() => {
                EntryLog::new(&identity.username, &identity.host, now)
            }
            _ => EntryLog::new(NO_USER, &drive_info.host, now),
        };
        drive.creation_log = Some(log.clone());
        drive.last_modification_log = Some(log);
        drive.cta_version = Some(env!("CARGO_PKG_VERSION").to_string());

        let names = self.catalogue.get_tape_drive_names()?;
        if names.iter().any(|name| *name == drive.drive_name) {
            self.catalogue.delete_tape_drive(&drive.drive_name)?;
        }
        self.catalogue.create_tape_drive(&drive)?;

        log::debug!("drive '{}' - created drive status", drive_info.drive_name);
        Ok(())
    }

    /// Fail if a drive of that name exists on another host or library.
    pub fn check_drive_can_be_created(&self, drive_info: &DriveInfo) -> Result<(), Error> {
        let drive = match self.catalogue.get_tape_drive(&drive_info.drive_name) {
            Ok(Some(drive)) => drive,
            Ok(None) => return Ok(()),
            Err(err) => {
                log::debug!(
                    "drive '{}' - unable to read existing record - {}",
                    drive_info.drive_name,
                    err
                );
                return Ok(());
            }
        };

        let existing = drive.drive_info();
        if existing != *drive_info {
            return Err(CatalogueError::DriveAlreadyExists(format!(
                "The drive name={} logicalLibrary={} host={} cannot be created because a drive \
                 with a same name with logicalLibrary={} host={} already exists.",
                drive_info.drive_name,
                drive_info.logical_library,
                drive_info.host,
                existing.logical_library,
                existing.host,
            ))
            .into());
        }
        Ok(())
    }

    /// Records of all drives, ordered by name.
    pub fn get_drive_states(&self) -> Result<Vec<TapeDrive>, Error> {
        let mut drives = Vec::new();
        for name in self.catalogue.get_tape_drive_names()? {
            if let Some(drive) = self.catalogue.get_tape_drive(&name)? {
                drives.push(drive);
            }
        }
        Ok(drives)
    }

    /// Remove a drive record. Failures are logged, not returned.
    pub fn remove_drive(&self, drive_name: &str) {
        match self.catalogue.delete_tape_drive(drive_name) {
            Ok(()) => log::info!("drive '{}' - removed tape drive from catalogue", drive_name),
            Err(err) => log::warn!(
                "drive '{}' - problem removing tape drive from catalogue - {}",
                drive_name,
                err
            ),
        }
    }

    /// Apply an operator request.
    ///
    /// A request which only carries a comment, or whose up and force down
    /// flags match the stored ones, changes the user comment only.
    pub fn set_desired_drive_state(
        &self,
        drive_name: &str,
        desired: &DesiredDriveState,
    ) -> Result<(), Error> {
        let current = self.catalogue.get_tape_drive(drive_name)?;

        if let Some(comment) = &desired.comment {
            let unchanged = match &current {
                Some(current) => {
                    desired.up == current.desired_up
                        && desired.force_down == current.desired_force_down
                }
                None => false,
            };
            let flags_unset = !desired.up && !desired.force_down;
            if desired.reason.is_none() && (flags_unset || unchanged) {
                return self
                    .catalogue
                    .set_desired_tape_drive_state_comment(drive_name, comment);
            }
        }

        self.catalogue
            .set_desired_tape_drive_state(drive_name, desired)?;
        if let Some(comment) = &desired.comment {
            self.catalogue
                .set_desired_tape_drive_state_comment(drive_name, comment)?;
        }
        Ok(())
    }

    /// Store a status report.
    pub fn update_drive_status(
        &self,
        drive_info: &DriveInfo,
        inputs: &ReportDriveStatusInputs,
    ) -> Result<(), Error> {
        let current = self.catalogue.get_tape_drive(&drive_info.drive_name)?;
        let drive = compute_drive_state(current.as_ref(), drive_info, inputs)?;

        log::debug!(
            "drive '{}' - status {} (reported {}) at {}",
            drive.drive_name,
            drive.drive_status,
            inputs.status,
            inputs.report_time
        );
        self.catalogue.update_tape_drive_status(&drive)
    }

    /// Store a status report given as separate values.
    #[allow(clippy::too_many_arguments)]
    pub fn report_drive_status(
        &self,
        drive_info: &DriveInfo,
        mount_type: MountType,
        status: DriveStatus,
        report_time: i64,
        mount_session_id: u64,
        bytes_transferred: u64,
        files_transferred: u64,
        vid: &str,
        tape_pool: &str,
        vo: &str,
    ) -> Result<(), Error> {
        let inputs = ReportDriveStatusInputs {
            status,
            mount_type,
            report_time,
            mount_session_id,
            bytes_transferred,
            files_transferred,
            vid: vid.to_string(),
            tape_pool: tape_pool.to_string(),
            vo: vo.to_string(),
            activity: None,
            priority: None,
            reason: None,
        };
        self.update_drive_status(drive_info, &inputs)
    }

    /// Store the transfer counters of a running session.
    pub fn update_drive_statistics(
        &self,
        drive_info: &DriveInfo,
        inputs: &ReportDriveStatsInputs,
    ) -> Result<(), Error> {
        let statistics = TapeDriveStatistics {
            bytes_transfered_in_session: inputs.bytes_transferred,
            files_transfered_in_session: inputs.files_transferred,
            report_time: inputs.report_time,
            last_modification_log: EntryLog::new(NO_USER, &drive_info.host, inputs.report_time),
        };
        self.catalogue.update_tape_drive_statistics(
            &drive_info.drive_name,
            &drive_info.host,
            &drive_info.logical_library,
            &statistics,
        )
    }
}

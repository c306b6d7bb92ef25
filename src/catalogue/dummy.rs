use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{format_err, Error};

use tds_api_types::{
    DesiredDriveState, DiskSpaceReservationRequest, DriveConfigEntry, DriveStatus, TapeDrive,
    TapeDriveStatistics,
};

use super::columns::{
    apply_column_updates, non_empty, resolved_status, status_change_columns,
    unchanged_status_columns,
};
use super::{
    check_comment_or_reason_length, check_record_counts, check_reservation_bytes,
    count_out_of_range, CatalogueError, DriveConfigCatalogue, DriveStateCatalogue,
    MAX_STORED_BYTES,
};

/// In-memory catalogue holding a single drive record
///
/// Used by tape servers which run without a database, and in tests. Creating
/// a drive replaces whatever record was held before.
#[derive(Default)]
pub struct DummyDriveStateCatalogue {
    drive: Mutex<Option<TapeDrive>>,
}

impl DummyDriveStateCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<TapeDrive>>, Error> {
        self.drive
            .lock()
            .map_err(|_| format_err!("dummy catalogue lock poisoned"))
    }

    /// Run `func` on the record of `drive_name`, user error if it is not held.
    fn modify<F>(&self, drive_name: &str, func: F) -> Result<(), Error>
    where
        F: FnOnce(&mut TapeDrive),
    {
        let mut guard = self.lock()?;
        match guard.as_mut() {
            Some(drive) if drive.drive_name == drive_name => {
                func(drive);
                Ok(())
            }
            _ => Err(CatalogueError::UserError(format!(
                "Cannot modify Tape Drive: {} because it doesn't exist",
                drive_name
            ))
            .into()),
        }
    }
}

impl DriveStateCatalogue for DummyDriveStateCatalogue {
    fn create_tape_drive(&self, drive: &TapeDrive) -> Result<(), Error> {
        check_record_counts(drive)?;

        let mut record = drive.clone();
        record.reason_up_down = non_empty(&record.reason_up_down)
            .map(|reason| check_comment_or_reason_length(&reason));
        record.user_comment = non_empty(&record.user_comment)
            .map(|comment| check_comment_or_reason_length(&comment));
        *self.lock()? = Some(record);
        Ok(())
    }

    fn get_tape_drive(&self, drive_name: &str) -> Result<Option<TapeDrive>, Error> {
        Ok(self
            .lock()?
            .as_ref()
            .filter(|drive| drive.drive_name == drive_name)
            .cloned())
    }

    fn get_tape_drives(&self) -> Result<Vec<TapeDrive>, Error> {
        Ok(self.lock()?.iter().cloned().collect())
    }

    fn get_tape_drive_names(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .lock()?
            .iter()
            .map(|drive| drive.drive_name.clone())
            .collect())
    }

    fn delete_tape_drive(&self, drive_name: &str) -> Result<(), Error> {
        let mut guard = self.lock()?;
        if matches!(guard.as_ref(), Some(drive) if drive.drive_name == drive_name) {
            *guard = None;
        }
        Ok(())
    }

    fn set_desired_tape_drive_state(
        &self,
        drive_name: &str,
        desired: &DesiredDriveState,
    ) -> Result<(), Error> {
        let reason =
            non_empty(&desired.reason).map(|reason| check_comment_or_reason_length(&reason));
        self.modify(drive_name, |drive| {
            drive.desired_up = desired.up;
            drive.desired_force_down = desired.force_down;
            drive.reason_up_down = reason;
        })
    }

    fn set_desired_tape_drive_state_comment(
        &self,
        drive_name: &str,
        comment: &str,
    ) -> Result<(), Error> {
        let comment = non_empty(&Some(comment.to_string()))
            .map(|comment| check_comment_or_reason_length(&comment));
        self.modify(drive_name, |drive| drive.user_comment = comment)
    }

    fn update_tape_drive_statistics(
        &self,
        drive_name: &str,
        host: &str,
        logical_library: &str,
        statistics: &TapeDriveStatistics,
    ) -> Result<(), Error> {
        let counts = [
            ("BYTES_TRANSFERED_IN_SESSION", statistics.bytes_transfered_in_session),
            ("FILES_TRANSFERED_IN_SESSION", statistics.files_transfered_in_session),
        ];
        for (column, value) in counts {
            if value > MAX_STORED_BYTES {
                return Err(count_out_of_range(column, value));
            }
        }

        let mut guard = self.lock()?;
        let drive = match guard.as_mut() {
            Some(drive)
                if drive.drive_name == drive_name
                    && drive.drive_status == DriveStatus::Transferring =>
            {
                drive
            }
            _ => {
                log::debug!(
                    "catalogue - statistics of tape drive '{}' not updated, \
                     drive is not transferring",
                    drive_name
                );
                return Ok(());
            }
        };
        drive.host = host.to_string();
        drive.logical_library = logical_library.to_string();
        drive.bytes_transfered_in_session = Some(statistics.bytes_transfered_in_session);
        drive.files_transfered_in_session = Some(statistics.files_transfered_in_session);
        drive.session_elapsed_time = Some(
            drive
                .session_start_time
                .map(|start| statistics.report_time - start)
                .unwrap_or(0),
        );
        drive.last_modification_log = Some(statistics.last_modification_log.clone());
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

        check_record_counts(drive)?;

        let mut record = drive.clone();
        record.reason_up_down = non_empty(&record.reason_up_down)
            .map(|reason| check_comment_or_reason_length(&reason));
        record.user_comment = non_empty(&record.user_comment)
            .map(|comment| check_comment_or_reason_length(&comment));

        let report_time = record
            .last_modification_log
            .as_ref()
            .map(|log| log.time)
            .unwrap_or_else(proxmox_time::epoch_i64);

        let mut guard = self.lock()?;
        let stored = match guard.as_mut() {
            Some(stored) if stored.drive_name == drive.drive_name => stored,
            _ => {
                return Err(CatalogueError::UserError(format!(
                    "Cannot update status for drive {}. Drive not found.",
                    drive.drive_name
                ))
                .into())
            }
        };

        let resolved = resolved_status(record.drive_status, stored.desired_up);
        let updates = if stored.drive_status == resolved {
            unchanged_status_columns(&record)
        } else {
            status_change_columns(&record)
        };
        apply_column_updates(&updates, &record, report_time, stored);
        Ok(())
    }

    fn get_disk_space_reservations(&self) -> Result<BTreeMap<String, u64>, Error> {
        let mut reservations = BTreeMap::new();
        if let Some(drive) = self.lock()?.as_ref() {
            if let Some(disk_system) = &drive.disk_system_name {
                reservations.insert(disk_system.clone(), drive.reserved_bytes.unwrap_or(0));
            }
        }
        Ok(reservations)
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
        let bytes = check_reservation_bytes(bytes)?;

        let mut guard = self.lock()?;
        let drive = match guard.as_mut() {
            Some(drive) if drive.drive_name == drive_name => drive,
            _ => {
                log::error!(
                    "drive '{}' mount {} - failed to create disk space reservation on '{}', \
                     no such drive",
                    drive_name,
                    mount_id,
                    disk_system
                );
                return Ok(());
            }
        };

        if drive.disk_system_name.as_deref() == Some(disk_system)
            && drive.reservation_session_id == Some(mount_id)
        {
            let reserved = drive.reserved_bytes.unwrap_or(0);
            drive.reserved_bytes = Some(reserved.saturating_add(bytes).min(MAX_STORED_BYTES));
        } else {
            log::info!(
                "drive '{}' mount {} - created reservation of {} bytes on disk system '{}'",
                drive_name,
                mount_id,
                bytes,
                disk_system
            );
            drive.disk_system_name = Some(disk_system.to_string());
            drive.reserved_bytes = Some(bytes);
            drive.reservation_session_id = Some(mount_id);
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

        let mut guard = self.lock()?;
        match guard.as_mut() {
            Some(drive)
                if drive.drive_name == drive_name
                    && drive.disk_system_name.as_deref() == Some(disk_system)
                    && drive.reservation_session_id == Some(mount_id) =>
            {
                let reserved = drive.reserved_bytes.unwrap_or(0);
                drive.reserved_bytes = Some(reserved.saturating_sub(bytes));
            }
            _ => log::warn!(
                "drive '{}' mount {} - release of {} bytes on disk system '{}' ignored, \
                 reservation belongs to another mount or disk system",
                drive_name,
                mount_id,
                bytes,
                disk_system
            ),
        }
        Ok(())
    }
}

impl DriveConfigCatalogue for DummyDriveStateCatalogue {
    fn create_tape_drive_config(&self, _entry: &DriveConfigEntry) -> Result<(), Error> {
        Err(CatalogueError::NotImplemented("create_tape_drive_config").into())
    }

    fn get_tape_drive_configs(&self) -> Result<Vec<DriveConfigEntry>, Error> {
        Err(CatalogueError::NotImplemented("get_tape_drive_configs").into())
    }

    fn get_tape_drive_config_names_and_keys(&self) -> Result<Vec<(String, String)>, Error> {
        Err(CatalogueError::NotImplemented("get_tape_drive_config_names_and_keys").into())
    }

    fn modify_tape_drive_config(&self, _entry: &DriveConfigEntry) -> Result<(), Error> {
        Err(CatalogueError::NotImplemented("modify_tape_drive_config").into())
    }

    fn get_tape_drive_config(
        &self,
        _drive_name: &str,
        _key_name: &str,
    ) -> Result<Option<DriveConfigEntry>, Error> {
        Err(CatalogueError::NotImplemented("get_tape_drive_config").into())
    }

    fn delete_tape_drive_config(&self, _drive_name: &str, _key_name: &str) -> Result<(), Error> {
        Err(CatalogueError::NotImplemented("delete_tape_drive_config").into())
    }
}

#[cfg(test)]
mod test {
    use tds_api_types::EntryLog;

    use super::*;
    use crate::catalogue::is_user_error;

    #[test]
    fn holds_a_single_drive() -> Result<(), Error> {
        let catalogue = DummyDriveStateCatalogue::new();
        assert!(catalogue.get_tape_drives()?.is_empty());

        catalogue.create_tape_drive(&TapeDrive::new("VDSTK11", "tpsrv01", "VLSTK10"))?;
        catalogue.create_tape_drive(&TapeDrive::new("VDSTK12", "tpsrv01", "VLSTK10"))?;
        assert_eq!(catalogue.get_tape_drive_names()?, ["VDSTK12"]);
        assert!(catalogue.get_tape_drive("VDSTK11")?.is_none());

        catalogue.delete_tape_drive("VDSTK11")?;
        assert_eq!(catalogue.get_tape_drives()?.len(), 1);
        catalogue.delete_tape_drive("VDSTK12")?;
        assert!(catalogue.get_tape_drives()?.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_drive_updates_fail() -> Result<(), Error> {
        let catalogue = DummyDriveStateCatalogue::new();
        catalogue.create_tape_drive(&TapeDrive::new("VDSTK11", "tpsrv01", "VLSTK10"))?;

        let mut other = TapeDrive::new("VDSTK12", "tpsrv01", "VLSTK10");
        other.drive_status = DriveStatus::Up;
        other.last_modification_log = Some(EntryLog::new("NO_USER", "tpsrv01", 10));
        assert!(is_user_error(&catalogue.update_tape_drive_status(&other).unwrap_err()));
        assert!(is_user_error(
            &catalogue
                .set_desired_tape_drive_state_comment("VDSTK12", "spare")
                .unwrap_err()
        ));
        Ok(())
    }

    #[test]
    fn clamps_releases_at_zero() -> Result<(), Error> {
        let catalogue = DummyDriveStateCatalogue::new();
        catalogue.create_tape_drive(&TapeDrive::new("VDSTK11", "tpsrv01", "VLSTK10"))?;

        let request: DiskSpaceReservationRequest = [("diskSystem1", 50)].into_iter().collect();
        catalogue.reserve_disk_space("VDSTK11", 3, &request)?;

        let large: DiskSpaceReservationRequest = [("diskSystem1", 80)].into_iter().collect();
        catalogue.release_disk_space("VDSTK11", 3, &large)?;
        assert_eq!(catalogue.get_disk_space_reservations()?["diskSystem1"], 0);
        Ok(())
    }

    #[test]
    fn drive_config_is_not_implemented() {
        let catalogue = DummyDriveStateCatalogue::new();
        let err = catalogue.get_tape_drive_configs().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogueError>(),
            Some(CatalogueError::NotImplemented(_))
        ));
    }
}

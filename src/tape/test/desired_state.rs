// Drive records, operator intent and unknown drives
//
// # cargo test --release tape::test::desired_state

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Error;

use tds_api_types::{
    DesiredDriveState, DiskSpaceReservationRequest, DriveInfo, DriveStatus, EntryLog, MountType,
    TapeDrive, TapeDriveStatistics,
};

use super::{catalogues, create_drive, drive_info};
use crate::catalogue::{is_user_error, CatalogueError, DriveStateCatalogue};
use crate::tape::drive_state::{ReportDriveStatusInputs, TapeDrivesCatalogueState};

/// Sets the drive up right after the next read, as an operator would
/// between a tape server's read and write.
struct OperatorSetsUp {
    inner: Arc<dyn DriveStateCatalogue>,
    armed: AtomicBool,
}

impl DriveStateCatalogue for OperatorSetsUp {
    fn create_tape_drive(&self, drive: &TapeDrive) -> Result<(), Error> {
        self.inner.create_tape_drive(drive)
    }

    fn get_tape_drive(&self, drive_name: &str) -> Result<Option<TapeDrive>, Error> {
        let drive = self.inner.get_tape_drive(drive_name)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            let desired = DesiredDriveState {
                up: true,
                reason: Some("repaired".to_string()),
                ..Default::default()
            };
            self.inner.set_desired_tape_drive_state(drive_name, &desired)?;
        }
        Ok(drive)
    }

    fn get_tape_drives(&self) -> Result<Vec<TapeDrive>, Error> {
        self.inner.get_tape_drives()
    }

    fn get_tape_drive_names(&self) -> Result<Vec<String>, Error> {
        self.inner.get_tape_drive_names()
    }

    fn delete_tape_drive(&self, drive_name: &str) -> Result<(), Error> {
        self.inner.delete_tape_drive(drive_name)
    }

    fn set_desired_tape_drive_state(
        &self,
        drive_name: &str,
        desired: &DesiredDriveState,
    ) -> Result<(), Error> {
        self.inner.set_desired_tape_drive_state(drive_name, desired)
    }

    fn set_desired_tape_drive_state_comment(
        &self,
        drive_name: &str,
        comment: &str,
    ) -> Result<(), Error> {
        self.inner
            .set_desired_tape_drive_state_comment(drive_name, comment)
    }

    fn update_tape_drive_statistics(
        &self,
        drive_name: &str,
        host: &str,
        logical_library: &str,
        statistics: &TapeDriveStatistics,
    ) -> Result<(), Error> {
        self.inner
            .update_tape_drive_statistics(drive_name, host, logical_library, statistics)
    }

    fn update_tape_drive_status(&self, drive: &TapeDrive) -> Result<(), Error> {
        self.inner.update_tape_drive_status(drive)
    }

    fn get_disk_space_reservations(&self) -> Result<BTreeMap<String, u64>, Error> {
        self.inner.get_disk_space_reservations()
    }

    fn reserve_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error> {
        self.inner.reserve_disk_space(drive_name, mount_id, request)
    }

    fn release_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error> {
        self.inner.release_disk_space(drive_name, mount_id, request)
    }
}

fn full_record() -> TapeDrive {
    let mut drive = TapeDrive::new("VDSTK11", "tpsrv01", "VLSTK10");
    drive.physical_library_name = Some("PLSTK1".to_string());
    drive.session_id = Some(5);
    drive.bytes_transfered_in_session = Some(1 << 40);
    drive.files_transfered_in_session = Some(1000);
    drive.session_start_time = Some(1000);
    drive.session_elapsed_time = Some(50);
    drive.transfer_start_time = Some(1020);
    drive.mount_type = MountType::ArchiveForRepack;
    drive.drive_status = DriveStatus::Transferring;
    drive.desired_up = true;
    drive.desired_force_down = false;
    drive.reason_up_down = Some("back from repair".to_string());
    drive.current_vid = Some("V01007".to_string());
    drive.cta_version = Some("0.1.0".to_string());
    drive.current_priority = Some(3);
    drive.current_activity = Some("repack".to_string());
    drive.current_tape_pool = Some("repack_pool".to_string());
    drive.next_mount_type = MountType::Retrieve;
    drive.next_vid = Some("V01008".to_string());
    drive.next_tape_pool = Some("tapepool".to_string());
    drive.next_priority = Some(4);
    drive.next_activity = Some("recall".to_string());
    drive.dev_file_name = Some("/dev/nst0".to_string());
    drive.raw_library_slot = Some("smc0".to_string());
    drive.current_vo = Some("vo".to_string());
    drive.next_vo = Some("vo2".to_string());
    drive.user_comment = Some("spare drive".to_string());
    drive.creation_log = Some(EntryLog::new("admin", "adminhost", 900));
    drive.last_modification_log = Some(EntryLog::new("NO_USER", "tpsrv01", 1070));
    drive.disk_system_name = Some("diskSystem1".to_string());
    drive.reserved_bytes = Some(4096);
    drive.reservation_session_id = Some(5);
    drive
}

#[test]
fn test_create_and_read_back() -> Result<(), Error> {
    for (name, catalogue) in catalogues("test_create_and_read_back")? {
        let record = full_record();
        catalogue.create_tape_drive(&record)?;
        assert_eq!(catalogue.get_tape_drive("VDSTK11")?, Some(record.clone()), "{}", name);

        let minimal = TapeDrive::new("VDSTK12", "tpsrv02", "VLSTK20");
        catalogue.create_tape_drive(&minimal)?;
        assert_eq!(catalogue.get_tape_drive("VDSTK12")?, Some(minimal), "{}", name);
    }
    Ok(())
}

#[test]
fn test_comment_only_update() -> Result<(), Error> {
    for (name, catalogue) in catalogues("test_comment_only_update")? {
        let state = create_drive(&catalogue, false)?;

        state.set_desired_drive_state(
            "VDSTK11",
            &DesiredDriveState {
                up: false,
                force_down: true,
                reason: None,
                comment: Some("x".to_string()),
            },
        )?;
        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert!(drive.desired_force_down, "{}", name);
        assert_eq!(drive.user_comment.as_deref(), Some("x"), "{}", name);

        state.set_desired_drive_state(
            "VDSTK11",
            &DesiredDriveState {
                comment: Some("y".to_string()),
                ..Default::default()
            },
        )?;
        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert!(!drive.desired_up, "{}", name);
        assert!(drive.desired_force_down, "{}", name);
        assert_eq!(drive.user_comment.as_deref(), Some("y"), "{}", name);

        // repeating the current flags with a comment changes the comment only
        state.set_desired_drive_state(
            "VDSTK11",
            &DesiredDriveState {
                up: false,
                force_down: true,
                reason: None,
                comment: Some("z".to_string()),
            },
        )?;
        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert!(drive.desired_force_down, "{}", name);
        assert_eq!(drive.user_comment.as_deref(), Some("z"), "{}", name);

        // without a comment the intent is overwritten
        state.set_desired_drive_state(
            "VDSTK11",
            &DesiredDriveState {
                up: true,
                force_down: false,
                reason: Some("repaired".to_string()),
                comment: None,
            },
        )?;
        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert!(drive.desired_up, "{}", name);
        assert!(!drive.desired_force_down, "{}", name);
        assert_eq!(drive.reason_up_down.as_deref(), Some("repaired"), "{}", name);
        assert_eq!(drive.user_comment.as_deref(), Some("z"), "{}", name);

        // and the drive may come up now
        let report = ReportDriveStatusInputs::new(DriveStatus::Up, 1000);
        state.update_drive_status(&drive_info(), &report)?;
        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert_eq!(drive.drive_status, DriveStatus::Up, "{}", name);
    }
    Ok(())
}

#[test]
fn test_unknown_drive() -> Result<(), Error> {
    for (name, catalogue) in catalogues("test_unknown_drive")? {
        let state = create_drive(&catalogue, true)?;

        assert_eq!(catalogue.get_tape_drive("nonexistent")?, None, "{}", name);
        catalogue.delete_tape_drive("nonexistent")?;

        let mut record = TapeDrive::new("nonexistent", "tpsrv01", "VLSTK10");
        record.drive_status = DriveStatus::Probing;
        record.last_modification_log = Some(EntryLog::new("NO_USER", "tpsrv01", 1000));
        let err = catalogue.update_tape_drive_status(&record).unwrap_err();
        assert!(is_user_error(&err), "{}: {}", name, err);

        let other = DriveInfo::new("nonexistent", "tpsrv01", "VLSTK10");
        let err = state
            .update_drive_status(&other, &ReportDriveStatusInputs::new(DriveStatus::Probing, 1000))
            .unwrap_err();
        assert!(is_user_error(&err), "{}: {}", name, err);

        let err = state
            .set_desired_drive_state("nonexistent", &DesiredDriveState::default())
            .unwrap_err();
        assert!(is_user_error(&err), "{}: {}", name, err);

        // the known drive is untouched
        assert!(catalogue.get_tape_drive("VDSTK11")?.is_some(), "{}", name);
    }
    Ok(())
}

#[test]
fn test_drive_creation() -> Result<(), Error> {
    for (name, catalogue) in catalogues("test_drive_creation")? {
        let state = create_drive(&catalogue, false)?;

        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert_eq!(drive.cta_version.as_deref(), Some(env!("CARGO_PKG_VERSION")), "{}", name);
        assert_eq!(drive.raw_library_slot.as_deref(), Some("smc0"), "{}", name);
        assert_eq!(
            drive.creation_log.as_ref().map(|log| log.username.as_str()),
            Some("NO_USER"),
            "{}",
            name
        );
        assert_eq!(drive.status_times_set(), 1, "{}", name);

        state.check_drive_can_be_created(&drive_info())?;
        state.check_drive_can_be_created(&DriveInfo::new("VDSTK12", "tpsrv02", "VLSTK20"))?;

        let err = state
            .check_drive_can_be_created(&DriveInfo::new("VDSTK11", "tpsrv02", "VLSTK10"))
            .unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<CatalogueError>(),
                Some(CatalogueError::DriveAlreadyExists(_))
            ),
            "{}",
            name
        );

        // creating again replaces the record
        let report = ReportDriveStatusInputs::new(DriveStatus::Probing, 1000);
        state.update_drive_status(&drive_info(), &report)?;
        create_drive(&catalogue, true)?;
        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert_eq!(drive.drive_status, DriveStatus::Up, "{}", name);
        assert_eq!(drive.probe_start_time, None, "{}", name);

        let states = state.get_drive_states()?;
        assert_eq!(states.len(), 1, "{}", name);
        assert_eq!(states[0].drive_name, "VDSTK11", "{}", name);

        state.remove_drive("VDSTK11");
        state.remove_drive("VDSTK11");
        assert!(state.get_drive_states()?.is_empty(), "{}", name);
    }
    Ok(())
}

#[test]
fn test_up_report_keeps_concurrent_operator_up() -> Result<(), Error> {
    for (name, catalogue) in catalogues("test_up_report_keeps_concurrent_operator_up")? {
        // drive is up, the operator asked for it to go down
        create_drive(&catalogue, true)?;
        catalogue.set_desired_tape_drive_state("VDSTK11", &DesiredDriveState::default())?;

        let racing = Arc::new(OperatorSetsUp {
            inner: Arc::clone(&catalogue),
            armed: AtomicBool::new(true),
        });
        let state = TapeDrivesCatalogueState::new(racing.clone());
        let report = ReportDriveStatusInputs::new(DriveStatus::Up, 1000);
        state.update_drive_status(&drive_info(), &report)?;

        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert_eq!(drive.drive_status, DriveStatus::Up, "{}", name);
        assert!(drive.desired_up, "{}", name);
        assert_eq!(drive.reason_up_down.as_deref(), Some("repaired"), "{}", name);

        // drive is down, the operator sets it up while the report is written
        let report = ReportDriveStatusInputs::new(DriveStatus::Down, 1010);
        state.update_drive_status(&drive_info(), &report)?;
        racing.armed.store(true, Ordering::SeqCst);
        let report = ReportDriveStatusInputs::new(DriveStatus::Up, 1020);
        state.update_drive_status(&drive_info(), &report)?;

        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert_eq!(drive.drive_status, DriveStatus::Up, "{}", name);
        assert!(drive.desired_up, "{}", name);
        assert_eq!(drive.down_or_up_start_time, Some(1020), "{}", name);
    }
    Ok(())
}

#[test]
fn test_up_report_without_intent_stays_down() -> Result<(), Error> {
    for (name, catalogue) in catalogues("test_up_report_without_intent_stays_down")? {
        let state = create_drive(&catalogue, false)?;
        catalogue.set_desired_tape_drive_state(
            "VDSTK11",
            &DesiredDriveState {
                reason: Some("tape stuck".to_string()),
                ..Default::default()
            },
        )?;
        let before = catalogue.get_tape_drive("VDSTK11")?.unwrap();

        let report = ReportDriveStatusInputs::new(DriveStatus::Up, 1000);
        state.update_drive_status(&drive_info(), &report)?;

        let drive = catalogue.get_tape_drive("VDSTK11")?.unwrap();
        assert_eq!(drive.drive_status, DriveStatus::Down, "{}", name);
        assert_eq!(drive.down_or_up_start_time, before.down_or_up_start_time, "{}", name);
        assert_eq!(drive.reason_up_down.as_deref(), Some("tape stuck"), "{}", name);
    }
    Ok(())
}

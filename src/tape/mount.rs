//! Mount decisions
//!
//! Before a tape server turns a queued job into a mount it takes the mount
//! lock of its logical library, so two drives of that library never pick
//! the same work. Creating the mount reports the drive as starting and
//! releases the lock again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, format_err, Error};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use proxmox_sys::fs::{atomic_open_or_create_file, lock_file, CreateOptions};

use tds_api_types::{DiskSpaceReservationRequest, DriveInfo, DriveStatus, MountType};

use super::drive_state::{
    ReportDriveStatsInputs, ReportDriveStatusInputs, TapeDrivesCatalogueState,
};

/// Directory holding the per library mount lock files
pub const MOUNT_LOCK_DIR: &str = "/run/tape-drive-state/mount-lock";

/// How long [`TapeMountDecisionInfo::lock`] waits by default
pub const MOUNT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum MountLockError {
    #[error("timeout while trying to lock")]
    TimeOut,
    #[error("{0}")]
    Other(#[from] Error),
}

impl From<std::io::Error> for MountLockError {
    fn from(error: std::io::Error) -> Self {
        Self::Other(error.into())
    }
}

/// Holds the mount lock of a logical library until dropped
pub struct MountLockGuard(std::fs::File);

fn open_mount_lock(lock_dir: &Path, logical_library: &str) -> Result<std::fs::File, Error> {
    let mut path = lock_dir.to_owned();
    path.push(format!("{}.lck", logical_library));

    let options = CreateOptions::new().perm(Mode::from_bits_truncate(0o660));

    atomic_open_or_create_file(
        path,
        OFlag::O_RDWR | OFlag::O_CLOEXEC | OFlag::O_APPEND,
        &[],
        options,
        false,
    )
}

/// Acquire the mount lock of `logical_library`.
///
/// A zero timeout tries once without waiting.
pub fn lock_logical_library(
    lock_dir: &Path,
    logical_library: &str,
    timeout: Duration,
) -> Result<MountLockGuard, MountLockError> {
    let mut file = open_mount_lock(lock_dir, logical_library).map_err(|err| {
        format_err!(
            "unable to open mount lock of library '{}' - {}",
            logical_library,
            err
        )
    })?;
    if let Err(err) = lock_file(&mut file, true, Some(timeout)) {
        return match err.kind() {
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock => {
                Err(MountLockError::TimeOut)
            }
            _ => Err(err.into()),
        };
    }
    Ok(MountLockGuard(file))
}

/// The next mount a drive may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotentialMount {
    pub mount_type: MountType,
    pub vid: String,
    pub tape_pool: String,
    pub vo: String,
    pub activity: Option<String>,
    pub priority: u64,
}

/// Mount decision for one logical library
pub struct TapeMountDecisionInfo {
    state: Arc<TapeDrivesCatalogueState>,
    lock_dir: PathBuf,
    logical_library: String,
    lock: Option<MountLockGuard>,
}

impl TapeMountDecisionInfo {
    pub fn new<P: AsRef<Path>>(
        state: Arc<TapeDrivesCatalogueState>,
        lock_dir: P,
        logical_library: &str,
    ) -> Self {
        Self {
            state,
            lock_dir: lock_dir.as_ref().to_owned(),
            logical_library: logical_library.to_string(),
            lock: None,
        }
    }

    pub fn logical_library(&self) -> &str {
        &self.logical_library
    }

    /// Take the mount lock of the library.
    pub fn lock(&mut self, timeout: Duration) -> Result<(), MountLockError> {
        if self.lock.is_none() {
            self.lock = Some(lock_logical_library(
                &self.lock_dir,
                &self.logical_library,
                timeout,
            )?);
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Give up the decision and release the lock.
    pub fn abort(&mut self) {
        if self.lock.take().is_some() {
            log::debug!("library '{}' - mount decision aborted", self.logical_library);
        }
    }

    fn start_session(
        &mut self,
        drive_info: &DriveInfo,
        mount_id: u64,
        mount: &PotentialMount,
    ) -> Result<MountSession, Error> {
        if self.lock.is_none() {
            bail!(
                "cannot create mount on drive '{}' - library '{}' is not locked",
                drive_info.drive_name,
                self.logical_library
            );
        }
        if drive_info.logical_library != self.logical_library {
            bail!(
                "drive '{}' belongs to library '{}', not '{}'",
                drive_info.drive_name,
                drive_info.logical_library,
                self.logical_library
            );
        }

        let session = MountSession {
            state: Arc::clone(&self.state),
            drive_info: drive_info.clone(),
            mount_id,
            mount_type: mount.mount_type,
            vid: mount.vid.clone(),
            tape_pool: mount.tape_pool.clone(),
            vo: mount.vo.clone(),
            activity: mount.activity.clone(),
            priority: mount.priority,
        };
        session.set_drive_status(DriveStatus::Starting, proxmox_time::epoch_i64(), None)?;

        // the drive record now shows the mount, others may decide again
        self.lock = None;
        log::info!(
            "drive '{}' - created {} mount {} for {}",
            drive_info.drive_name,
            mount.mount_type,
            mount_id,
            mount.vid
        );
        Ok(session)
    }

    /// Turn the potential mount into an archive mount on `drive_info`.
    pub fn create_archive_mount(
        &mut self,
        drive_info: &DriveInfo,
        mount_id: u64,
        mount: &PotentialMount,
    ) -> Result<ArchiveMount, Error> {
        match mount.mount_type {
            MountType::ArchiveForUser | MountType::ArchiveForRepack => {}
            other => bail!("cannot create archive mount of type {}", other),
        }
        Ok(ArchiveMount {
            session: self.start_session(drive_info, mount_id, mount)?,
        })
    }

    /// Turn the potential mount into a retrieve mount on `drive_info`.
    pub fn create_retrieve_mount(
        &mut self,
        drive_info: &DriveInfo,
        mount_id: u64,
        mount: &PotentialMount,
    ) -> Result<RetrieveMount, Error> {
        if mount.mount_type != MountType::Retrieve {
            bail!("cannot create retrieve mount of type {}", mount.mount_type);
        }
        Ok(RetrieveMount {
            session: self.start_session(drive_info, mount_id, mount)?,
        })
    }
}

struct MountSession {
    state: Arc<TapeDrivesCatalogueState>,
    drive_info: DriveInfo,
    mount_id: u64,
    mount_type: MountType,
    vid: String,
    tape_pool: String,
    vo: String,
    activity: Option<String>,
    priority: u64,
}

impl MountSession {
    fn set_drive_status(
        &self,
        status: DriveStatus,
        report_time: i64,
        reason: Option<String>,
    ) -> Result<(), Error> {
        let inputs = ReportDriveStatusInputs {
            status,
            mount_type: self.mount_type,
            report_time,
            mount_session_id: self.mount_id,
            bytes_transferred: 0,
            files_transferred: 0,
            vid: self.vid.clone(),
            tape_pool: self.tape_pool.clone(),
            vo: self.vo.clone(),
            activity: self.activity.clone(),
            priority: Some(self.priority),
            reason,
        };
        self.state.update_drive_status(&self.drive_info, &inputs)
    }

    fn set_tape_session_stats(&self, stats: &ReportDriveStatsInputs) -> Result<(), Error> {
        self.state.update_drive_statistics(&self.drive_info, stats)
    }
}

/// A running archive session
pub struct ArchiveMount {
    session: MountSession,
}

impl ArchiveMount {
    pub fn mount_id(&self) -> u64 {
        self.session.mount_id
    }

    pub fn vid(&self) -> &str {
        &self.session.vid
    }

    pub fn mount_type(&self) -> MountType {
        self.session.mount_type
    }

    /// Report a status of the drive running this mount.
    pub fn set_drive_status(
        &self,
        status: DriveStatus,
        report_time: i64,
        reason: Option<String>,
    ) -> Result<(), Error> {
        self.session.set_drive_status(status, report_time, reason)
    }

    pub fn set_tape_session_stats(&self, stats: &ReportDriveStatsInputs) -> Result<(), Error> {
        self.session.set_tape_session_stats(stats)
    }
}

/// A running retrieve session
pub struct RetrieveMount {
    session: MountSession,
}

impl RetrieveMount {
    pub fn mount_id(&self) -> u64 {
        self.session.mount_id
    }

    pub fn vid(&self) -> &str {
        &self.session.vid
    }

    pub fn activity(&self) -> Option<&str> {
        self.session.activity.as_deref()
    }

    /// Report a status of the drive running this mount.
    pub fn set_drive_status(
        &self,
        status: DriveStatus,
        report_time: i64,
        reason: Option<String>,
    ) -> Result<(), Error> {
        self.session.set_drive_status(status, report_time, reason)
    }

    pub fn set_tape_session_stats(&self, stats: &ReportDriveStatsInputs) -> Result<(), Error> {
        self.session.set_tape_session_stats(stats)
    }

    /// Reserve disk space for the files this mount recalls.
    pub fn reserve_disk_space(&self, request: &DiskSpaceReservationRequest) -> Result<(), Error> {
        self.session.state.catalogue().reserve_disk_space(
            &self.session.drive_info.drive_name,
            self.session.mount_id,
            request,
        )
    }

    /// Give back disk space reserved by this mount.
    pub fn release_disk_space(&self, request: &DiskSpaceReservationRequest) -> Result<(), Error> {
        self.session.state.catalogue().release_disk_space(
            &self.session.drive_info.drive_name,
            self.session.mount_id,
            request,
        )
    }
}

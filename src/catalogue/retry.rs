use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Error;
use backon::{BlockingRetryable, ConstantBuilder};

use tds_api_types::{
    DesiredDriveState, DiskSpaceReservationRequest, DriveConfigEntry, TapeDrive,
    TapeDriveStatistics,
};

use super::{
    is_connection_lost, DriveConfigCatalogue, DriveStateCatalogue, RdbmsDriveStateCatalogue,
};

/// Delay between two attempts
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retries catalogue operations which failed with a lost connection
///
/// `max_tries` is the total number of attempts, so a value of one disables
/// retries. Every other error is returned at once.
pub struct CatalogueRetryWrapper<C> {
    inner: C,
    max_tries: u64,
    delay: Duration,
}

impl<C> CatalogueRetryWrapper<C> {
    pub fn new(inner: C, max_tries: u64) -> Self {
        Self {
            inner,
            max_tries: max_tries.max(1),
            delay: RETRY_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn retry<T, F>(&self, what: &str, func: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
    {
        let retries = usize::try_from(self.max_tries - 1).unwrap_or(usize::MAX);
        func.retry(
            ConstantBuilder::default()
                .with_delay(self.delay)
                .with_max_times(retries),
        )
        .when(is_connection_lost)
        .notify(|err, delay| {
            log::warn!("catalogue - {} failed, retrying in {:?} - {}", what, delay, err);
        })
        .call()
    }
}

impl CatalogueRetryWrapper<RdbmsDriveStateCatalogue> {
    pub fn create_schema(&self) -> Result<(), Error> {
        self.retry("create_schema", || self.inner.create_schema())
    }
}

impl<C: DriveStateCatalogue> DriveStateCatalogue for CatalogueRetryWrapper<C> {
    fn create_tape_drive(&self, drive: &TapeDrive) -> Result<(), Error> {
        self.retry("create_tape_drive", || self.inner.create_tape_drive(drive))
    }

    fn get_tape_drive(&self, drive_name: &str) -> Result<Option<TapeDrive>, Error> {
        self.retry("get_tape_drive", || self.inner.get_tape_drive(drive_name))
    }

    fn get_tape_drives(&self) -> Result<Vec<TapeDrive>, Error> {
        self.retry("get_tape_drives", || self.inner.get_tape_drives())
    }

    fn get_tape_drive_names(&self) -> Result<Vec<String>, Error> {
        self.retry("get_tape_drive_names", || self.inner.get_tape_drive_names())
    }

    fn delete_tape_drive(&self, drive_name: &str) -> Result<(), Error> {
        self.retry("delete_tape_drive", || self.inner.delete_tape_drive(drive_name))
    }

    fn set_desired_tape_drive_state(
        &self,
        drive_name: &str,
        desired: &DesiredDriveState,
    ) -> Result<(), Error> {
        self.retry("set_desired_tape_drive_state", || {
            self.inner.set_desired_tape_drive_state(drive_name, desired)
        })
    }

    fn set_desired_tape_drive_state_comment(
        &self,
        drive_name: &str,
        comment: &str,
    ) -> Result<(), Error> {
        self.retry("set_desired_tape_drive_state_comment", || {
            self.inner.set_desired_tape_drive_state_comment(drive_name, comment)
        })
    }

    fn update_tape_drive_statistics(
        &self,
        drive_name: &str,
        host: &str,
        logical_library: &str,
        statistics: &TapeDriveStatistics,
    ) -> Result<(), Error> {
        self.retry("update_tape_drive_statistics", || {
            self.inner
                .update_tape_drive_statistics(drive_name, host, logical_library, statistics)
        })
    }

    fn update_tape_drive_status(&self, drive: &TapeDrive) -> Result<(), Error> {
        self.retry("update_tape_drive_status", || {
            self.inner.update_tape_drive_status(drive)
        })
    }

    fn get_disk_space_reservations(&self) -> Result<BTreeMap<String, u64>, Error> {
        self.retry("get_disk_space_reservations", || {
            self.inner.get_disk_space_reservations()
        })
    }

    fn reserve_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error> {
        self.retry("reserve_disk_space", || {
            self.inner.reserve_disk_space(drive_name, mount_id, request)
        })
    }

    fn release_disk_space(
        &self,
        drive_name: &str,
        mount_id: u64,
        request: &DiskSpaceReservationRequest,
    ) -> Result<(), Error> {
        self.retry("release_disk_space", || {
            self.inner.release_disk_space(drive_name, mount_id, request)
        })
    }
}

impl<C: DriveConfigCatalogue> DriveConfigCatalogue for CatalogueRetryWrapper<C> {
    fn create_tape_drive_config(&self, entry: &DriveConfigEntry) -> Result<(), Error> {
        self.retry("create_tape_drive_config", || {
            self.inner.create_tape_drive_config(entry)
        })
    }

    fn get_tape_drive_configs(&self) -> Result<Vec<DriveConfigEntry>, Error> {
        self.retry("get_tape_drive_configs", || self.inner.get_tape_drive_configs())
    }

    fn get_tape_drive_config_names_and_keys(&self) -> Result<Vec<(String, String)>, Error> {
        self.retry("get_tape_drive_config_names_and_keys", || {
            self.inner.get_tape_drive_config_names_and_keys()
        })
    }

    fn modify_tape_drive_config(&self, entry: &DriveConfigEntry) -> Result<(), Error> {
        self.retry("modify_tape_drive_config", || {
            self.inner.modify_tape_drive_config(entry)
        })
    }

    fn get_tape_drive_config(
        &self,
        drive_name: &str,
        key_name: &str,
    ) -> Result<Option<DriveConfigEntry>, Error> {
        self.retry("get_tape_drive_config", || {
            self.inner.get_tape_drive_config(drive_name, key_name)
        })
    }

    fn delete_tape_drive_config(&self, drive_name: &str, key_name: &str) -> Result<(), Error> {
        self.retry("delete_tape_drive_config", || {
            self.inner.delete_tape_drive_config(drive_name, key_name)
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::catalogue::{CatalogueError, DummyDriveStateCatalogue};

    /// Loses the connection for the first `failures` calls of `get_tape_drive_names`.
    struct FlakyCatalogue {
        inner: DummyDriveStateCatalogue,
        failures: u64,
        calls: AtomicU64,
        user_error: bool,
    }

    impl FlakyCatalogue {
        fn new(failures: u64) -> Self {
            Self {
                inner: DummyDriveStateCatalogue::new(),
                failures,
                calls: AtomicU64::new(0),
                user_error: false,
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DriveStateCatalogue for FlakyCatalogue {
        fn create_tape_drive(&self, drive: &TapeDrive) -> Result<(), Error> {
            self.inner.create_tape_drive(drive)
        }

        fn get_tape_drive(&self, drive_name: &str) -> Result<Option<TapeDrive>, Error> {
            self.inner.get_tape_drive(drive_name)
        }

        fn get_tape_drives(&self) -> Result<Vec<TapeDrive>, Error> {
            self.inner.get_tape_drives()
        }

        fn get_tape_drive_names(&self) -> Result<Vec<String>, Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.user_error {
                return Err(CatalogueError::UserError("no such drive".to_string()).into());
            }
            if call < self.failures {
                return Err(Error::from(CatalogueError::ConnectionLost(format!(
                    "attempt {}",
                    call + 1
                )))
                .context("reading drive names"));
            }
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

    fn wrap(flaky: FlakyCatalogue, max_tries: u64) -> CatalogueRetryWrapper<FlakyCatalogue> {
        CatalogueRetryWrapper::new(flaky, max_tries).with_delay(Duration::from_millis(1))
    }

    #[test]
    fn retries_lost_connections() -> Result<(), Error> {
        let catalogue = wrap(FlakyCatalogue::new(2), 3);
        catalogue.create_tape_drive(&TapeDrive::new("VDSTK11", "tpsrv01", "VLSTK10"))?;

        assert_eq!(catalogue.get_tape_drive_names()?, ["VDSTK11"]);
        assert_eq!(catalogue.inner().calls(), 3);
        Ok(())
    }

    #[test]
    fn gives_up_after_max_tries() {
        let catalogue = wrap(FlakyCatalogue::new(5), 3);
        let err = catalogue.get_tape_drive_names().unwrap_err();
        assert!(is_connection_lost(&err));
        assert_eq!(catalogue.inner().calls(), 3);
    }

    #[test]
    fn single_try_does_not_retry() {
        let catalogue = wrap(FlakyCatalogue::new(1), 1);
        assert!(catalogue.get_tape_drive_names().is_err());
        assert_eq!(catalogue.inner().calls(), 1);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut flaky = FlakyCatalogue::new(0);
        flaky.user_error = true;
        let catalogue = wrap(flaky, 3);
        let err = catalogue.get_tape_drive_names().unwrap_err();
        assert!(crate::catalogue::is_user_error(&err));
        assert_eq!(catalogue.inner().calls(), 1);
    }
}

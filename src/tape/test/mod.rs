//! Drive state scenarios, run against every catalogue implementation
//!
//! # cargo test --release tape::test

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Error;

use tds_api_types::{DesiredDriveState, DriveInfo, DriveStatus, MountType};

use crate::catalogue::{DriveStateCatalogue, DummyDriveStateCatalogue, RdbmsDriveStateCatalogue};
use crate::rdbms::ConnPool;
use crate::tape::drive_state::{DriveConfigLine, TapeDrivesCatalogueState};

mod desired_state;

fn create_testdir(name: &str) -> Result<PathBuf, Error> {
    let mut testdir: PathBuf = String::from("./target/testout").into();
    testdir.push(std::module_path!());
    testdir.push(name);

    let _ = std::fs::remove_dir_all(&testdir);
    let _ = std::fs::create_dir_all(&testdir);

    Ok(testdir)
}

fn drive_info() -> DriveInfo {
    DriveInfo::new("VDSTK11", "tpsrv01", "VLSTK10")
}

/// The catalogues every scenario runs on.
fn catalogues(name: &str) -> Result<Vec<(&'static str, Arc<dyn DriveStateCatalogue>)>, Error> {
    let testdir = create_testdir(name)?;
    let pool = ConnPool::new(testdir.join("catalogue.db"), 2);
    let rdbms = RdbmsDriveStateCatalogue::new(Arc::new(pool));
    rdbms.create_schema()?;

    Ok(vec![
        ("rdbms", Arc::new(rdbms)),
        ("dummy", Arc::new(DummyDriveStateCatalogue::new())),
    ])
}

/// Create the test drive, up if `up` is set.
fn create_drive(
    catalogue: &Arc<dyn DriveStateCatalogue>,
    up: bool,
) -> Result<TapeDrivesCatalogueState, Error> {
    let state = TapeDrivesCatalogueState::new(Arc::clone(catalogue));
    let status = if up { DriveStatus::Up } else { DriveStatus::Down };
    state.create_tape_drive_status(
        &drive_info(),
        &DesiredDriveState {
            up,
            ..Default::default()
        },
        MountType::NoMount,
        status,
        &DriveConfigLine {
            dev_file_name: "/dev/nst0".to_string(),
            raw_library_slot: "smc0".to_string(),
        },
        None,
    )?;
    Ok(state)
}

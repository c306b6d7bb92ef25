//! Tape drive state catalogue
//!
//! Tape servers report the status of their drive through
//! [`tape::TapeDrivesCatalogueState`], which keeps one record per drive in a
//! [`catalogue::DriveStateCatalogue`]. Retrieve mounts reserve disk space
//! through the same catalogue.

pub mod catalogue;
pub mod rdbms;
pub mod tape;

//! Tape drive state tracking

pub mod drive_state;
pub use drive_state::TapeDrivesCatalogueState;

pub mod mount;

#[cfg(test)]
mod test;

use anyhow::Error;
use rusqlite::{named_params, OptionalExtension, Row};

use tds_api_types::DriveConfigEntry;

use super::RdbmsDriveStateCatalogue;
use crate::catalogue::{CatalogueError, DriveConfigCatalogue};

fn row_to_config_entry(row: &Row) -> rusqlite::Result<DriveConfigEntry> {
    Ok(DriveConfigEntry {
        drive_name: row.get("DRIVE_NAME")?,
        category: row.get("CATEGORY")?,
        key_name: row.get("KEY_NAME")?,
        value: row.get("VALUE")?,
        source: row.get("SOURCE")?,
    })
}

impl DriveConfigCatalogue for RdbmsDriveStateCatalogue {
    fn create_tape_drive_config(&self, entry: &DriveConfigEntry) -> Result<(), Error> {
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            c.execute(
                "INSERT INTO DRIVE_CONFIG(DRIVE_NAME, CATEGORY, KEY_NAME, VALUE, SOURCE) \
                 VALUES(:DRIVE_NAME, :CATEGORY, :KEY_NAME, :VALUE, :SOURCE)",
                named_params! {
                    ":DRIVE_NAME": entry.drive_name,
                    ":CATEGORY": entry.category,
                    ":KEY_NAME": entry.key_name,
                    ":VALUE": entry.value,
                    ":SOURCE": entry.source,
                },
            )
        })?;
        Ok(())
    }

    fn get_tape_drive_configs(&self) -> Result<Vec<DriveConfigEntry>, Error> {
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            let mut stmt = c.prepare(
                "SELECT DRIVE_NAME, CATEGORY, KEY_NAME, VALUE, SOURCE FROM DRIVE_CONFIG \
                 ORDER BY DRIVE_NAME, KEY_NAME",
            )?;
            let entries = stmt.query_map([], row_to_config_entry)?;
            entries.collect()
        })
    }

    fn get_tape_drive_config_names_and_keys(&self) -> Result<Vec<(String, String)>, Error> {
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            let mut stmt = c.prepare(
                "SELECT DRIVE_NAME, KEY_NAME FROM DRIVE_CONFIG ORDER BY DRIVE_NAME, KEY_NAME",
            )?;
            let keys = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            keys.collect()
        })
    }

    fn modify_tape_drive_config(&self, entry: &DriveConfigEntry) -> Result<(), Error> {
        let mut conn = self.pool.get_conn()?;
        let count = conn.run(|c| {
            c.execute(
                "UPDATE DRIVE_CONFIG SET CATEGORY = :CATEGORY, VALUE = :VALUE, SOURCE = :SOURCE \
                 WHERE DRIVE_NAME = :DRIVE_NAME AND KEY_NAME = :KEY_NAME",
                named_params! {
                    ":CATEGORY": entry.category,
                    ":VALUE": entry.value,
                    ":SOURCE": entry.source,
                    ":DRIVE_NAME": entry.drive_name,
                    ":KEY_NAME": entry.key_name,
                },
            )
        })?;
        if count == 0 {
            return Err(CatalogueError::UserError(format!(
                "Cannot modify config {} of tape drive {} because it doesn't exist",
                entry.key_name, entry.drive_name
            ))
            .into());
        }
        Ok(())
    }

    fn get_tape_drive_config(
        &self,
        drive_name: &str,
        key_name: &str,
    ) -> Result<Option<DriveConfigEntry>, Error> {
        let mut conn = self.pool.get_conn()?;
        conn.run(|c| {
            c.query_row(
                "SELECT DRIVE_NAME, CATEGORY, KEY_NAME, VALUE, SOURCE FROM DRIVE_CONFIG \
                 WHERE DRIVE_NAME = :DRIVE_NAME AND KEY_NAME = :KEY_NAME",
                named_params! {
                    ":DRIVE_NAME": drive_name,
                    ":KEY_NAME": key_name,
                },
                row_to_config_entry,
            )
            .optional()
        })
    }

    fn delete_tape_drive_config(&self, drive_name: &str, key_name: &str) -> Result<(), Error> {
        let mut conn = self.pool.get_conn()?;
        let count = conn.run(|c| {
            c.execute(
                "DELETE FROM DRIVE_CONFIG WHERE DRIVE_NAME = :DRIVE_NAME AND KEY_NAME = :KEY_NAME",
                named_params! {
                    ":DRIVE_NAME": drive_name,
                    ":KEY_NAME": key_name,
                },
            )
        })?;
        if count == 0 {
            log::debug!(
                "catalogue - config {} of tape drive '{}' not deleted, no such key",
                key_name,
                drive_name
            );
        }
        Ok(())
    }
}

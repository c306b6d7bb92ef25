//! Catalogue database configuration
//!
//! This configuration module is based on [`SectionConfig`], and
//! provides a type safe interface to store [`SqliteCatalogueConfig`]
//! entries, one per catalogue database.
//!
//! [SqliteCatalogueConfig]: tds_api_types::SqliteCatalogueConfig
//! [SectionConfig]: proxmox_section_config::SectionConfig

use std::path::Path;

use anyhow::{bail, format_err, Error};
use lazy_static::lazy_static;

use proxmox_schema::*;
use proxmox_section_config::{SectionConfig, SectionConfigData, SectionConfigPlugin};

use tds_api_types::{SqliteCatalogueConfig, CATALOGUE_ID_SCHEMA};

use crate::{open_config_lockfile, replace_config, ConfigLockGuard};

lazy_static! {
    /// Static [`SectionConfig`] to access parser/writer functions.
    pub static ref CONFIG: SectionConfig = init();
}

fn init() -> SectionConfig {
    let mut config = SectionConfig::new(&CATALOGUE_ID_SCHEMA);

    let obj_schema = match SqliteCatalogueConfig::API_SCHEMA {
        Schema::Object(ref obj_schema) => obj_schema,
        _ => unreachable!(),
    };
    let plugin =
        SectionConfigPlugin::new("sqlite".to_string(), Some("name".to_string()), obj_schema);
    config.register_plugin(plugin);

    config
}

/// Configuration file name
pub const CATALOGUE_CFG_FILENAME: &str = "/etc/tape-drive-state/catalogue.cfg";
/// Lock file name (used to prevent concurrent access)
pub const CATALOGUE_CFG_LOCKFILE: &str = "/etc/tape-drive-state/.catalogue.lck";

/// Get exclusive lock
pub fn lock() -> Result<ConfigLockGuard, Error> {
    open_config_lockfile(CATALOGUE_CFG_LOCKFILE, None, true)
}

/// Read and parse the configuration file
pub fn config() -> Result<(SectionConfigData, [u8; 32]), Error> {
    config_from_file(CATALOGUE_CFG_FILENAME)
}

/// Read and parse a configuration file at a custom location
pub fn config_from_file<P: AsRef<Path>>(path: P) -> Result<(SectionConfigData, [u8; 32]), Error> {
    let path = path.as_ref();
    let content = proxmox_sys::fs::file_read_optional_string(path)?.unwrap_or_default();

    let digest = openssl::sha::sha256(content.as_bytes());
    let data = CONFIG.parse(&path.to_string_lossy(), &content)?;
    Ok((data, digest))
}

/// Save the configuration file
pub fn save_config(config: &SectionConfigData) -> Result<(), Error> {
    save_config_to_file(CATALOGUE_CFG_FILENAME, config)
}

/// Save the configuration to a custom location
pub fn save_config_to_file<P: AsRef<Path>>(
    path: P,
    config: &SectionConfigData,
) -> Result<(), Error> {
    let path = path.as_ref();
    let raw = CONFIG.write(&path.to_string_lossy(), config)?;
    replace_config(path, raw.as_bytes())
}

/// Lookup a SQLite catalogue entry by name.
pub fn lookup_sqlite(
    config: &SectionConfigData,
    name: &str,
) -> Result<SqliteCatalogueConfig, Error> {
    match config.sections.get(name) {
        Some((section_type, _)) if section_type != "sqlite" => {
            bail!("Entry '{}' exists, but is not a sqlite catalogue", name);
        }
        Some(_) => config
            .lookup("sqlite", name)
            .map_err(|err| format_err!("unable to parse catalogue '{}' - {}", name, err)),
        None => bail!("Catalogue '{}' does not exist", name),
    }
}

/// The catalogue to use when none is named: the only configured one.
pub fn default_sqlite(config: &SectionConfigData) -> Result<SqliteCatalogueConfig, Error> {
    let mut list: Vec<SqliteCatalogueConfig> = config.convert_to_typed_array("sqlite")?;
    match list.len() {
        0 => bail!("no catalogue configured"),
        1 => Ok(list.remove(0)),
        n => bail!("{} catalogues configured, please select one by name", n),
    }
}

/// Add or replace a SQLite catalogue entry.
pub fn set_sqlite(
    config: &mut SectionConfigData,
    entry: &SqliteCatalogueConfig,
) -> Result<(), Error> {
    config.set_data(&entry.name, "sqlite", entry)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "\
sqlite: main
\tpath /var/lib/tape-drive-state/catalogue.db
\tmax-tries-to-connect 5

sqlite: spare
\tpath /srv/catalogue.db
\tpool-size 4
\tcomment standby copy
";

    #[test]
    fn parse_and_lookup() -> Result<(), Error> {
        let data = CONFIG.parse("catalogue.cfg", SAMPLE)?;

        let main = lookup_sqlite(&data, "main")?;
        assert_eq!(main.path, "/var/lib/tape-drive-state/catalogue.db");
        assert_eq!(main.max_tries_to_connect(), 5);
        assert_eq!(main.pool_size(), 2);

        let spare = lookup_sqlite(&data, "spare")?;
        assert_eq!(spare.max_tries_to_connect(), 3);
        assert_eq!(spare.pool_size(), 4);
        assert_eq!(spare.comment.as_deref(), Some("standby copy"));

        assert!(lookup_sqlite(&data, "missing").is_err());
        assert!(default_sqlite(&data).is_err());
        Ok(())
    }

    #[test]
    fn reject_bad_values() {
        let text = "sqlite: main\n\tpath /tmp/x.db\n\tmax-tries-to-connect 0\n";
        assert!(CONFIG.parse("catalogue.cfg", text).is_err());

        let text = "sqlite: m\n\tpath /tmp/x.db\n";
        assert!(CONFIG.parse("catalogue.cfg", text).is_err());
    }

    #[test]
    fn write_and_reparse() -> Result<(), Error> {
        let mut data = CONFIG.parse("catalogue.cfg", "")?;
        let entry = SqliteCatalogueConfig {
            name: "main".to_string(),
            path: "/tmp/catalogue.db".to_string(),
            max_tries_to_connect: None,
            pool_size: Some(3),
            comment: None,
        };
        set_sqlite(&mut data, &entry)?;

        let raw = CONFIG.write("catalogue.cfg", &data)?;
        let data = CONFIG.parse("catalogue.cfg", &raw)?;
        assert_eq!(default_sqlite(&data)?, entry);
        Ok(())
    }
}

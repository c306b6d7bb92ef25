//! Types for the catalogue backend configuration
use serde::{Deserialize, Serialize};

use proxmox_schema::api;

use crate::{
    CATALOGUE_ID_SCHEMA, MAX_TRIES_TO_CONNECT_SCHEMA, POOL_SIZE_SCHEMA,
    SINGLE_LINE_COMMENT_SCHEMA,
};

/// Attempts made before a lost connection is reported to the caller.
pub const DEFAULT_MAX_TRIES_TO_CONNECT: u64 = 3;
/// Connections kept by the pool.
pub const DEFAULT_POOL_SIZE: u64 = 2;

#[api(
    properties: {
        name: {
            schema: CATALOGUE_ID_SCHEMA,
        },
        "max-tries-to-connect": {
            schema: MAX_TRIES_TO_CONNECT_SCHEMA,
            optional: true,
        },
        "pool-size": {
            schema: POOL_SIZE_SCHEMA,
            optional: true,
        },
        comment: {
            schema: SINGLE_LINE_COMMENT_SCHEMA,
            optional: true,
        },
    }
)]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// SQLite catalogue database
pub struct SqliteCatalogueConfig {
    pub name: String,
    /// Path to the database file
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tries_to_connect: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl SqliteCatalogueConfig {
    pub fn max_tries_to_connect(&self) -> u64 {
        self.max_tries_to_connect
            .unwrap_or(DEFAULT_MAX_TRIES_TO_CONNECT)
            .max(1)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or(DEFAULT_POOL_SIZE).max(1) as usize
    }
}

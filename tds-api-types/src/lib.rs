//! Basic API types used by the tape drive state catalogue.

use proxmox_schema::{const_regex, ApiStringFormat, IntegerSchema, Schema, StringSchema};

#[rustfmt::skip]
#[macro_export]
macro_rules! PROXMOX_SAFE_ID_REGEX_STR { () => { r"(?:[A-Za-z0-9_][A-Za-z0-9._\-]*)" }; }

#[rustfmt::skip]
#[macro_export]
macro_rules! HOST_NAME_REGEX_STR { () => { r"(?:[a-zA-Z0-9](?:[a-zA-Z0-9\-\.]*[a-zA-Z0-9])?)" }; }

mod drive_state;
pub use drive_state::*;

mod catalogue_config;
pub use catalogue_config::*;

const_regex! {
    pub PROXMOX_SAFE_ID_REGEX = concat!(r"^", PROXMOX_SAFE_ID_REGEX_STR!(), r"$");
    pub HOST_NAME_REGEX = concat!(r"^", HOST_NAME_REGEX_STR!(), r"$");
    /// Drive configuration keys, e.g. `DevFileName` or `RawLibrarySlot`
    pub DRIVE_CONFIG_KEY_REGEX = r"^[A-Za-z][A-Za-z0-9_]*$";
    pub SINGLE_LINE_COMMENT_REGEX = r"^[[:^cntrl:]]*$";
}

pub const PROXMOX_SAFE_ID_FORMAT: ApiStringFormat =
    ApiStringFormat::Pattern(&PROXMOX_SAFE_ID_REGEX);

pub const HOST_NAME_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&HOST_NAME_REGEX);

pub const DRIVE_CONFIG_KEY_FORMAT: ApiStringFormat =
    ApiStringFormat::Pattern(&DRIVE_CONFIG_KEY_REGEX);

pub const DRIVE_NAME_SCHEMA: Schema = StringSchema::new("Drive Identifier.")
    .format(&PROXMOX_SAFE_ID_FORMAT)
    .min_length(3)
    .max_length(100)
    .schema();

pub const HOST_NAME_SCHEMA: Schema = StringSchema::new("Tape server host name.")
    .format(&HOST_NAME_FORMAT)
    .min_length(1)
    .max_length(100)
    .schema();

pub const LOGICAL_LIBRARY_NAME_SCHEMA: Schema = StringSchema::new("Logical library name.")
    .format(&PROXMOX_SAFE_ID_FORMAT)
    .min_length(1)
    .max_length(100)
    .schema();

pub const CATALOGUE_ID_SCHEMA: Schema = StringSchema::new("Catalogue backend identifier.")
    .format(&PROXMOX_SAFE_ID_FORMAT)
    .min_length(2)
    .max_length(32)
    .schema();

pub const DRIVE_CONFIG_KEY_SCHEMA: Schema = StringSchema::new("Drive configuration key.")
    .format(&DRIVE_CONFIG_KEY_FORMAT)
    .min_length(1)
    .max_length(100)
    .schema();

pub const SINGLE_LINE_COMMENT_FORMAT: ApiStringFormat =
    ApiStringFormat::Pattern(&SINGLE_LINE_COMMENT_REGEX);

pub const SINGLE_LINE_COMMENT_SCHEMA: Schema = StringSchema::new("Comment (single line).")
    .format(&SINGLE_LINE_COMMENT_FORMAT)
    .schema();

/// Maximum length of an up/down reason or a user comment.
pub const MAX_COMMENT_OR_REASON_LENGTH: usize = 1000;

pub const MAX_TRIES_TO_CONNECT_SCHEMA: Schema =
    IntegerSchema::new("Number of attempts before a lost database connection is reported.")
        .minimum(1)
        .maximum(100)
        .default(3)
        .schema();

pub const POOL_SIZE_SCHEMA: Schema = IntegerSchema::new("Number of pooled database connections.")
    .minimum(1)
    .maximum(64)
    .default(2)
    .schema();

//! Catalogue tables

pub(crate) const CREATE_DRIVE_STATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS DRIVE_STATE(
    DRIVE_NAME                  VARCHAR(100)    NOT NULL,
    HOST                        VARCHAR(100)    NOT NULL,
    LOGICAL_LIBRARY             VARCHAR(100)    NOT NULL,
    SESSION_ID                  INTEGER,

    BYTES_TRANSFERED_IN_SESSION INTEGER,
    FILES_TRANSFERED_IN_SESSION INTEGER,

    SESSION_START_TIME          INTEGER,
    SESSION_ELAPSED_TIME        INTEGER,
    MOUNT_START_TIME            INTEGER,
    TRANSFER_START_TIME         INTEGER,
    UNLOAD_START_TIME           INTEGER,
    UNMOUNT_START_TIME          INTEGER,
    DRAINING_START_TIME         INTEGER,
    DOWN_OR_UP_START_TIME       INTEGER,
    PROBE_START_TIME            INTEGER,
    CLEANUP_START_TIME          INTEGER,
    START_START_TIME            INTEGER,
    SHUTDOWN_TIME               INTEGER,

    MOUNT_TYPE                  VARCHAR(100)    DEFAULT 'NO_MOUNT' NOT NULL,
    DRIVE_STATUS                VARCHAR(100)    DEFAULT 'UNKNOWN' NOT NULL,
    DESIRED_UP                  INTEGER         DEFAULT 0 NOT NULL,
    DESIRED_FORCE_DOWN          INTEGER         DEFAULT 0 NOT NULL,
    REASON_UP_DOWN              VARCHAR(1000),

    CURRENT_VID                 VARCHAR(100),
    CTA_VERSION                 VARCHAR(100),
    CURRENT_PRIORITY            INTEGER,
    CURRENT_ACTIVITY            VARCHAR(100),
    CURRENT_TAPE_POOL           VARCHAR(100),
    NEXT_MOUNT_TYPE             VARCHAR(100)    DEFAULT 'NO_MOUNT' NOT NULL,
    NEXT_VID                    VARCHAR(100),
    NEXT_TAPE_POOL              VARCHAR(100),
    NEXT_PRIORITY               INTEGER,
    NEXT_ACTIVITY               VARCHAR(100),

    DEV_FILE_NAME               VARCHAR(100),
    RAW_LIBRARY_SLOT            VARCHAR(255),

    CURRENT_VO                  VARCHAR(100),
    NEXT_VO                     VARCHAR(100),
    USER_COMMENT                VARCHAR(1000),

    CREATION_LOG_USER_NAME      VARCHAR(100),
    CREATION_LOG_HOST_NAME      VARCHAR(100),
    CREATION_LOG_TIME           INTEGER,
    LAST_UPDATE_USER_NAME       VARCHAR(100),
    LAST_UPDATE_HOST_NAME       VARCHAR(100),
    LAST_UPDATE_TIME            INTEGER,

    DISK_SYSTEM_NAME            VARCHAR(100),
    RESERVED_BYTES              INTEGER,
    RESERVATION_SESSION_ID      INTEGER,

    PHYSICAL_LIBRARY_NAME       VARCHAR(100),

    CONSTRAINT DRIVE_STATE_PK PRIMARY KEY(DRIVE_NAME),
    CONSTRAINT DRIVE_STATE_DESIRED_UP_BOOL_CK CHECK(DESIRED_UP IN (0, 1)),
    CONSTRAINT DRIVE_STATE_DESIRED_FORCE_DOWN_BOOL_CK CHECK(DESIRED_FORCE_DOWN IN (0, 1)),
    CONSTRAINT DRIVE_STATE_RESERVATION_CK CHECK(
        (DISK_SYSTEM_NAME IS NULL AND RESERVED_BYTES IS NULL
            AND RESERVATION_SESSION_ID IS NULL) OR
        (DISK_SYSTEM_NAME IS NOT NULL AND RESERVED_BYTES IS NOT NULL
            AND RESERVATION_SESSION_ID IS NOT NULL))
)
"#;

pub(crate) const CREATE_DRIVE_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS DRIVE_CONFIG(
    DRIVE_NAME                  VARCHAR(100)    NOT NULL,
    CATEGORY                    VARCHAR(100)    NOT NULL,
    KEY_NAME                    VARCHAR(100)    NOT NULL,
    VALUE                       VARCHAR(1000)   NOT NULL,
    SOURCE                      VARCHAR(100)    NOT NULL,
    CONSTRAINT DRIVE_CONFIG_PK PRIMARY KEY(KEY_NAME, DRIVE_NAME)
)
"#;

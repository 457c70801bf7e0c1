//! Property keys and fixed key sets understood by the lifecycle core.
//!
//! The core never interprets the values behind these keys beyond what its own
//! transitions need; everything else is passed through to the collaborators.

/// Weaving selection: `true` (default), `false`, or `static`.
pub const WEAVING: &str = "weaving";

/// When `true`, activation validates without opening a connection.
pub const VALIDATION_ONLY: &str = "validation-only";

pub const TRANSACTION_TYPE: &str = "transaction-type";

pub const TARGET_SERVER: &str = "target-server";

/// Keys a composite always imposes on its members while flattening.
/// A key missing from the composite is removed from the member.
pub const INHERITED_MEMBER_PROPERTIES: [&str; 3] =
    [TRANSACTION_TYPE, TARGET_SERVER, VALIDATION_ONLY];

/// Overrides that may still be applied once a unit is connected.
pub const POST_CONNECT_OVERRIDES: [&str; 3] =
    ["log.level", "query.timeout-ms", "cache.size-hint"];

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "UNIT_BOOTSTRAP";

pub mod system {
    /// Default environment name when none is set.
    pub const DEFAULT_ENVIRONMENT: &str = "development";

    /// Environment variables consulted, in order, for the environment name.
    pub const ENVIRONMENT_VARIABLES: [&str; 2] = ["UNIT_BOOTSTRAP_ENV", "APP_ENV"];
}

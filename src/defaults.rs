//! Default values for the engine configuration and protocol.

/// Canonical executable name of the managed tool.
#[cfg(not(windows))]
pub const TOOL_EXECUTABLE: &str = "tofu";
#[cfg(windows)]
pub const TOOL_EXECUTABLE: &str = "tofu.exe";

/// Prefix of versioned install directories (`tofu_<version>`).
pub const TOOL_DIR_PREFIX: &str = "tofu";

/// Name used in log lines sent to the orchestrator.
pub const TOOL_DISPLAY_NAME: &str = "Tofu";

pub const RELEASES_API_URL: &str = "https://get.opentofu.org/tofu/api.json";
pub const DOWNLOAD_BASE_URL: &str = "https://github.com/opentofu/opentofu/releases/download";

/// Directory under the user cache root holding managed installs.
pub const CACHE_DIR_NAME: &str = "tofu-engine";

pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Bytes read from a child pipe per output chunk.
pub const OUTPUT_CHUNK_SIZE: usize = 32 * 1024;

/// Messages buffered per response stream before senders wait.
pub const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Time a cancelled child gets per signal before escalation.
pub const TERMINATION_GRACE_MILLIS: u64 = 3_000;

/// Exit code reported when the child never ran or its status is unknown.
pub const ABNORMAL_EXIT_CODE: i32 = 1;

/// Offset added to a terminating signal number (shell convention).
pub const SIGNAL_EXIT_BASE: i32 = 128;

pub const META_TOOL_VERSION: &str = "tool_version";
pub const META_TOOL_INSTALL_DIR: &str = "tool_install_dir";
pub const META_LEGACY_VERSION: &str = "tofu_version";
pub const META_LEGACY_INSTALL_DIR: &str = "tofu_install_dir";

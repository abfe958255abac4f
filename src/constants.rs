//! Protocol and runtime constants.

// Rust guideline compliant 2026-02

/// Path prefix of the terminal WebSocket endpoint on the KOS server.
pub const TERMINAL_PATH_PREFIX: &str = "/ws/terminal";

/// Base path of the KOS REST API.
pub const API_PREFIX: &str = "/api/v1";

/// Header carrying the KOS API key (REST calls and the WebSocket upgrade).
pub const API_KEY_HEADER: &str = "X-KOS-API-Key";

/// Default KOS server URL for local development.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Default API key accepted by a local development server.
pub const DEFAULT_API_KEY: &str = "dev-local-key";

/// Line written to the render sink when the session ends.
pub const SESSION_ENDED_BANNER: &str = "[session ended]";

/// Timeout for REST calls to the agent API.
pub const API_TIMEOUT_SECS: u64 = 10;

/// Default first reconnect delay.
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1_000;

/// Default cap on reconnect delay.
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Default number of consecutive reconnect attempts before giving up.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

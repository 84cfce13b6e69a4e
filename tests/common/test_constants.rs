//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Region used by CLI tests.
pub const TEST_REGION: &str = "eu-west-1";

/// Description prefix shipped as the default.
pub const MANAGED_PREFIX: &str = "Backup ";

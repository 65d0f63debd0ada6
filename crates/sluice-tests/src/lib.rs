//! Test infrastructure for Sluice.
//!
//! In-memory adapters and an in-process [`Engine`] drive the orchestration
//! services for scenario tests. Testcontainers-based contexts run the
//! PostgreSQL and NATS adapters under the `integration` feature.
//!
//! # Usage
//!
//! ```ignore
//! use sluice_tests::{Engine, fixtures::DocumentFixture, manifest};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let engine = Engine::start();
//!     let execution = engine
//!         .trigger(&manifest(vec![DocumentFixture::named("build")]))
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;
pub mod memory;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;
pub use memory::MemoryAdapters;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,sluice_scheduler=debug,sluice_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}

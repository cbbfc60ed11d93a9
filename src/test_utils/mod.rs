//! Test utilities for ctlpkg
//!
//! Fakes for the engine's ports and builders for package streams, shared by
//! the unit tests and the scenario tests under `tests/`.
//!
//! # Example
//!
//! ```rust,no_run
//! use ctlpkg::test_utils::{StaticFetcher, provider_stream};
//!
//! let stream = provider_stream("prov-a", &[("reg.io/org/prov-b", ">=1.0.0")]);
//! let fetcher = StaticFetcher::new()
//!     .with_digest("reg.io/org/prov-a:v1.0.0", "ab".repeat(32))
//!     .with_stream("reg.io/org/prov-a:v1.0.0", stream);
//! ```

pub mod fakes;

pub use fakes::{RecordingHooks, RecordingRecorder, StaticBackend, StaticFetcher};

use std::fmt::Write;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. With `level` set that level is used,
/// otherwise `RUST_LOG` decides, and without either nothing is logged.
///
/// ```bash
/// RUST_LOG=ctlpkg=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// A Provider package stream: the meta document plus one CRD named after
/// the package.
pub fn provider_stream(name: &str, depends_on: &[(&str, &str)]) -> String {
    package_stream("Provider", name, depends_on)
}

/// An Intent package stream, shaped like [`provider_stream`].
pub fn intent_stream(name: &str, depends_on: &[(&str, &str)]) -> String {
    package_stream("Intent", name, depends_on)
}

fn package_stream(kind: &str, name: &str, depends_on: &[(&str, &str)]) -> String {
    let mut stream = format!(
        "apiVersion: meta.pkg.ctlpkg.io/v1\nkind: {kind}\nmetadata:\n  name: {name}\nspec:\n"
    );
    if depends_on.is_empty() {
        stream.push_str("  dependsOn: []\n");
    } else {
        stream.push_str("  dependsOn:\n");
        for (package, constraints) in depends_on {
            let _ = write!(
                stream,
                "    - package: {package}\n      type: Provider\n      constraints: \"{constraints}\"\n"
            );
        }
    }
    let _ = write!(
        stream,
        "---\napiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: {name}s.example.io\nspec:\n  group: example.io\n  names:\n    singular: {name}\n    plural: {name}s\n  versions:\n    - name: v1\n"
    );
    stream
}

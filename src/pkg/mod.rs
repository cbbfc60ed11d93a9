//! Package content: image references, naming, parsing, linting and the
//! registry and cache capabilities that produce package streams.
//!
//! # Module Structure
//!
//! - [`reference`] - Parsing `[registry/]repository[:tag|@digest]` references
//! - [`name`] - DNS-label record names and friendly revision identifiers
//! - [`parser`] - Multi-document YAML package streams into bundles
//! - [`lint`] - Structural checks on parsed bundles
//! - [`fetcher`] - Registry HEAD, tag listing and package download
//! - [`cache`] - Unpacked package streams keyed by revision name

pub mod cache;
pub mod fetcher;
pub mod lint;
pub mod name;
pub mod parser;
pub mod reference;

pub use cache::{FsCache, NopCache, PackageCache};
pub use fetcher::{Fetcher, NopFetcher, RegistryFetcher};
pub use lint::{Linter, PackageLinter, intent_linter, provider_linter};
pub use name::{friendly_id, stable_hash, to_dns_label};
pub use parser::{PackageBundle, PackageParser, Parser};
pub use reference::{Identifier, ImageReference};

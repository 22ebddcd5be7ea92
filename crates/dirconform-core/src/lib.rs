//! # dirconform-core
//!
//! Conformance engine for role-based access policies enforced by a
//! hierarchical directory store.
//!
//! A run takes a roster of principals (identities with different privilege
//! levels), a catalog of scenarios (one directory operation each) and an
//! expectation matrix per scenario, and verifies that every principal sees
//! exactly the outcome the policy prescribes. Failures name the scenario,
//! the principal and the observed diagnostic.
//!
//! ## Example
//!
//! ```rust
//! use dirconform_core::config::ConformConfig;
//! use dirconform_core::directory::memory::MemoryDirectory;
//! use dirconform_core::principal::PrincipalRegistry;
//! use dirconform_core::runner::CaseRunner;
//! use dirconform_core::suite::{self, CatalogOptions};
//!
//! let config = ConformConfig::default();
//! let layout = config.validate().unwrap();
//! let directory = MemoryDirectory::reference(&config).unwrap();
//! let registry = PrincipalRegistry::from_config(&config, &layout).unwrap();
//!
//! let scenarios = suite::select(
//!     suite::catalog(CatalogOptions::default()),
//!     &["search".to_string()],
//! );
//! let report = CaseRunner::new(&directory, &registry)
//!     .with_probe(&directory)
//!     .run(&scenarios)
//!     .unwrap();
//! assert!(report.is_success(), "{report}");
//! ```
//!
//! ## Layout
//!
//! - [`directory`]: the transport seam, the `ldap3` client and the
//!   in-process reference directory
//! - [`session`], [`principal`], [`fixture`]: bound channels, the roster
//!   and generated entries
//! - [`matrix`], [`runner`], [`report`]: expectations, execution and results
//! - [`integrity`]: forward/reverse membership checks
//! - [`suite`]: the scenario catalog

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod directory;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod fixture;
pub mod integrity;
pub mod log;
pub mod matrix;
pub mod principal;
pub mod probe;
pub mod report;
pub mod runner;
pub mod session;
pub mod suite;

pub use config::{ConfigError, ConformConfig, DirectoryLayout};
pub use directory::{Connection, Connector, Diagnostic, OpOutcome, ResultKind, SearchOutcome};
pub use dn::{Dn, Rdn};
pub use error::{CaseError, CaseResult, ConformError, MatrixError};
pub use matrix::{Expectation, ExpectationCase, ExpectationMatrix};
pub use principal::{Credential, Principal, PrincipalRegistry};
pub use report::{CaseStatus, RunReport, ScenarioReport};
pub use runner::{CaseContext, CaseRunner, Operation, OperationKind, Scenario};
pub use session::DirectorySession;

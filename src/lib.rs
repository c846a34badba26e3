//! # OctoFHIR Conformance
//!
//! Capability-driven conformance testing for FHIR servers. A reference
//! CapabilityStatement is turned into an ordered list of tests, which are
//! then executed against a live server with a small state machine per test.
//!
//! ## Features
//!
//! - **Derivation**: interactions and search claims (including combinations
//!   declared through the search-parameter-combination extension) become
//!   ordered test definitions
//! - **Execution**: every test yields exactly one verdict (pass, fail, skip
//!   or omit) plus warnings
//! - **Chaining**: resources returned by earlier searches feed the values of
//!   later searches and the read test
//! - **Pluggable transport**: the runner talks through the [`Transport`]
//!   trait; [`HttpTransport`] is the reqwest-backed default
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_conformance::*;
//! use std::sync::Arc;
//!
//! # async fn example(statement: serde_json::Value) -> Result<()> {
//! let config = ConformanceConfig::new("https://fhir.example.org/r4")
//!     .with_bearer_token("secret")
//!     .with_patient_ids(["85"]);
//! let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
//!
//! let definitions = CapabilityMetadataExtractor::extract_from_statement(&statement, "Encounter")?;
//! let server = CapabilityModel::from_capability_statement(&statement, "Encounter")?;
//! let runner = SequenceRunner::from_config(&config, transport, server)?;
//!
//! let mut index = ExampleIndex::new();
//! for result in runner.run_sequence(&definitions, &mut index).await {
//!     println!("{}: {}", result.id, result.outcome.verdict);
//! }
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod core;
pub mod error;
pub mod sequence;
pub mod transport;
pub mod validation;

pub use capability::{CapabilityClaim, CapabilityModel, Expectation, Interaction, SearchClaim};
pub use core::{ConformanceConfig, FallbackStatuses, TOKEN_ENV};
pub use error::Result; // Our Result type takes precedence
pub use error::ConformanceError;
pub use sequence::*;
pub use transport::{FhirRequest, FhirResponse, Transport};
pub use validation::{BasicResourceValidator, StructuralValidator};

#[cfg(feature = "http-transport")]
pub use transport::HttpTransport;

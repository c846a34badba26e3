//! Test derivation and execution for one resource type at a time.

pub mod context;
pub mod extractor;
pub mod index;
pub mod outcome;
pub mod resolver;
pub mod runner;

pub use context::ExecutionContext;
pub use extractor::{CapabilityMetadataExtractor, TestDefinition, TestKind};
pub use index::{ExampleEntry, ExampleIndex};
pub use outcome::{Outcome, TestResult, Verdict, messages};
pub use resolver::{
    PATIENT_PARAM, SearchParamDefinition, SearchParamType, SearchParameterRegistry,
    SearchValueResolver,
};
pub use runner::{SequenceRunner, run_sequences};

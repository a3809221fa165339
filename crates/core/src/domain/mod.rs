// Domain Layer - Pure argument building and outcome classification

pub mod action;
pub mod argv;
pub mod error;
pub mod expectation;
pub mod options;
pub mod outcome;
pub mod output;

// Re-exports
pub use action::Action;
pub use argv::build_args;
pub use error::DomainError;
pub use expectation::{ExpectationTable, EXPECTATIONS};
pub use options::{OptionValue, Options};
pub use outcome::{classify, Outcome};
pub use output::{ChunkBuffer, ProcessOutput};

pub mod config;
pub mod error;
pub mod payload;
mod reporter;

pub use config::ReporterConfig;
pub use error::ReporterError;
pub use payload::SampleStatus;
pub use reporter::{Readiness, RegistrationOutcome, ReporterState, StatusReporter};

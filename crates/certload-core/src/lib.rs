//! Certificate issuance scenario and the load harness that drives it

pub mod harness;
pub mod issuer;
pub mod scenario;

pub use issuer::{issue_certificate, issue_url, IterationFailure};
pub use scenario::{IssueScenario, Payload, SetupData};

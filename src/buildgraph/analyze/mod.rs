//! Analyzer pipeline run by [`crate::buildgraph::frontend::GraphBuilder::build`]
//! (§4.9, §4.10): dependency resolution, structural validation, then
//! advisory semantic review, always in that order.

pub mod dependency;
pub mod semantic;
pub mod validator;

pub use dependency::DependencyAnalyzer;
pub use semantic::SemanticAnalyzer;
pub use validator::Validator;

//! mcqforge-core: Generation-and-recovery pipeline for LLM-written MCQs.
//!
//! This crate turns free-form text from a locally hosted model into a bounded
//! list of validated multiple-choice questions: prompt construction, response
//! sanitizing, validation, memoized and serialized model access, and the
//! bounded retry loop tying them together.

pub mod cache;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod model;
pub mod prompt;
pub mod report;
pub mod sanitizer;
pub mod traits;
pub mod validator;

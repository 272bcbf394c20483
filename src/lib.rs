//! Ragloop - agentic retrieval-augmented answering
//!
//! Each turn decides whether to search at all, then runs a bounded loop of
//! query rewriting, hybrid keyword and vector search, and cross-encoder
//! reranking until the evidence is good enough, and finally streams a grounded
//! answer along with a trace of every round.

pub mod backend;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod llm;
pub mod planner;
pub mod retrieval;
pub mod stream;

pub use engine::{Collaborators, Engine};
pub use error::{RagloopError, Result};

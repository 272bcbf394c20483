//! Interfaces to the collaborators the retrieval loop orchestrates.
//!
//! The document index, the relevance model and the text generator are owned
//! elsewhere; the core only sees them through these narrow traits. Handles are
//! built once at start-up and passed explicitly as `Arc<dyn ...>` so tests can
//! substitute deterministic fakes per component.

mod generator;
mod index;
mod scorer;

pub use generator::{CompletionRequest, GenerationError, Generator, Purpose, TokenStream};
pub use index::{Index, IndexError, IndexHit};
pub use scorer::{RelevanceScorer, ScoringError};

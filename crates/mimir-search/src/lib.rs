pub mod hybrid;
pub mod lexical;
pub mod vector;

pub use hybrid::{HybridSearch, RrfProfile, ScoredNode, SearchOptions, SnippetLine};
pub use lexical::{LexicalHit, LexicalIndex, MatchLine};
pub use vector::{cosine_similarity, VectorEntry, VectorHit, VectorIndex};

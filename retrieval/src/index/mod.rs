//! Lexical indexing: tokenizer, BM25 scorer, and the shared searcher handle.

pub mod lexical;
pub mod searcher;
pub mod tokenizer;

pub use lexical::Aggregation;
pub use lexical::LexicalIndex;
pub use searcher::IndexStats;
pub use searcher::LexicalSearcher;
pub use tokenizer::tokenize;

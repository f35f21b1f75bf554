pub mod normalize;
pub mod resolver;

pub use normalize::{compact, fold_text, levenshtein, normalize, typo_bound};
pub use resolver::{CatalogResolver, Resolution, ScoredCandidate, SynonymTable};

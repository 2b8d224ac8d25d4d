//! Reanchoring engine
//!
//! Locates the live element a stored record refers to, using a layered
//! strategy list:
//!
//! - Exact: literal containment of the record text
//! - Fuzzy: edit-distance similarity against whole candidate text
//! - Context: captured before/after text plus similarity on the joined quote

mod resolver;
mod similarity;

pub use resolver::{
    Anchor, AnchorResolver, Candidate, CandidateSet, MatchStrategy, MatchTarget, MatchTier,
    CANDIDATE_TAGS,
};
pub use similarity::{edit_distance, passes_length_ratio, similarity};

pub mod bm25;

use anyhow::Result;

use crate::models::VerseHit;

/// Top-K verse retrieval. The synthesis core treats the output as input data
/// and does not depend on how it was ranked.
pub trait VerseRetriever: Send + Sync {
    fn search(&self, query: &str, k: usize) -> Result<Vec<VerseHit>>;
}

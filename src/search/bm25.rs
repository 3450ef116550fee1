use anyhow::{Context, Result};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};

use crate::corpus::Corpus;
use crate::models::VerseHit;
use crate::search::VerseRetriever;

/// BM25 verse index built on tantivy, held in RAM and rebuilt from the corpus
/// at startup.
pub struct VerseIndex {
    corpus: Arc<Corpus>,
    index: Index,
    reader: IndexReader,
    f_verse_id: Field,
    f_translation: Field,
    f_commentary: Field,
}

impl VerseIndex {
    pub fn build(corpus: Arc<Corpus>) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_verse_id = schema_builder.add_text_field("verse_id", STRING | STORED);
        let f_translation = schema_builder.add_text_field("translation", TEXT);
        let f_commentary = schema_builder.add_text_field("commentary", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer(50_000_000)
            .context("Failed to create index writer")?;

        for verse in corpus.verses() {
            // Translations and word meanings describe the verse itself
            let mut translation: Vec<&str> = verse.translations.values().map(String::as_str).collect();
            for (term, meaning) in &verse.word_meaning {
                translation.push(term);
                translation.push(meaning);
            }
            let commentary: Vec<&str> = corpus
                .commentaries(&verse.id)
                .iter()
                .map(|c| c.text.as_str())
                .collect();

            writer.add_document(doc!(
                f_verse_id => verse.id.clone(),
                f_translation => translation.join("\n"),
                f_commentary => commentary.join("\n"),
            ))?;
        }

        writer.commit().context("Failed to commit verse index")?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        tracing::info!("Indexed {} verses", corpus.verses().len());

        Ok(Self {
            corpus,
            index,
            reader,
            f_verse_id,
            f_translation,
            f_commentary,
        })
    }

    /// Scored verse ids, best first.
    pub fn search_ids(&self, query_str: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();

        let mut query_parser =
            QueryParser::for_index(&self.index, vec![self.f_translation, self.f_commentary]);
        // A verse's own translation outweighs what commentators say about it
        query_parser.set_field_boost(self.f_translation, 2.0);

        // Natural-language questions are not query syntax; keep what parses
        let (query, errors) = query_parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} query syntax errors in {query_str:?}", errors.len());
        }

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .context("Search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;

            if let Some(verse_id) = doc.get_first(self.f_verse_id).and_then(|v| v.as_str()) {
                hits.push((verse_id.to_string(), score));
            }
        }

        Ok(hits)
    }
}

impl VerseRetriever for VerseIndex {
    fn search(&self, query: &str, k: usize) -> Result<Vec<VerseHit>> {
        let hits = self
            .search_ids(query, k)?
            .into_iter()
            .filter_map(|(verse_id, score)| {
                let verse = self.corpus.verse(&verse_id)?.clone();
                Some(VerseHit {
                    commentaries: self.corpus.commentaries(&verse_id).to_vec(),
                    verse,
                    score,
                })
            })
            .collect();
        Ok(hits)
    }
}

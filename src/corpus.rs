use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::models::{Commentary, Verse};

/// The loaded verse corpus with commentaries grouped per verse.
pub struct Corpus {
    verses: Vec<Verse>,
    by_id: HashMap<String, usize>,
    commentaries: HashMap<String, Vec<Commentary>>,
}

#[derive(Deserialize)]
struct RawCorpus {
    bhagavad_gita: Option<Vec<RawChapter>>,
}

#[derive(Deserialize)]
struct RawChapter {
    chapter: Option<u32>,
    #[serde(default)]
    verses: Vec<RawVerse>,
}

#[derive(Deserialize)]
struct RawVerse {
    verse: Option<u32>,
    #[serde(default)]
    shloka: String,
    #[serde(default)]
    transliteration: String,
    #[serde(default)]
    translations: BTreeMap<String, String>,
    #[serde(default)]
    word_meaning: BTreeMap<String, String>,
    #[serde(default)]
    commentaries: BTreeMap<String, RawCommentary>,
}

#[derive(Deserialize)]
struct RawCommentary {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    original_author: Option<String>,
    #[serde(default)]
    substitute_author: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl RawCommentary {
    fn is_usable(&self) -> bool {
        self.status.as_deref() != Some("missing")
            && self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    fn into_commentary(self, id: String, school: String) -> Commentary {
        Commentary::new(id, school, self.text.unwrap_or_default()).with_attribution(
            self.status,
            self.original_author,
            self.substitute_author,
        )
    }
}

impl Corpus {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus file {}", path.display()))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let raw: RawCorpus = serde_json::from_str(data).context("Failed to parse corpus JSON")?;
        let chapters = raw
            .bhagavad_gita
            .context("Invalid corpus format: 'bhagavad_gita' key not found")?;

        let mut verses = Vec::new();
        let mut by_id = HashMap::new();
        let mut commentaries = HashMap::new();

        for chapter in chapters {
            // Chapter and verse numbers start at 1; 0 or missing means malformed.
            let Some(chapter_num) = chapter.chapter.filter(|c| *c > 0) else {
                continue;
            };
            for raw_verse in chapter.verses {
                let Some(verse_num) = raw_verse.verse.filter(|v| *v > 0) else {
                    continue;
                };
                let verse_id = format!("{chapter_num}:{verse_num}");

                let verse_commentaries: Vec<Commentary> = raw_verse
                    .commentaries
                    .into_iter()
                    .filter(|(_, c)| c.is_usable())
                    .enumerate()
                    .map(|(i, (school, c))| c.into_commentary(format!("C{}", i + 1), school))
                    .collect();

                by_id.insert(verse_id.clone(), verses.len());
                commentaries.insert(verse_id.clone(), verse_commentaries);
                verses.push(Verse {
                    id: verse_id,
                    chapter: chapter_num,
                    verse: verse_num,
                    shloka: raw_verse.shloka,
                    transliteration: raw_verse.transliteration,
                    translations: raw_verse.translations,
                    word_meaning: raw_verse.word_meaning,
                });
            }
        }

        tracing::info!(
            "Loaded corpus: {} verses, {} commentaries",
            verses.len(),
            commentaries.values().map(Vec::len).sum::<usize>()
        );

        Ok(Self {
            verses,
            by_id,
            commentaries,
        })
    }

    pub fn verses(&self) -> &[Verse] {
        &self.verses
    }

    pub fn verse(&self, verse_id: &str) -> Option<&Verse> {
        self.by_id.get(verse_id).map(|&i| &self.verses[i])
    }

    /// Commentaries attached to a verse (empty for unknown verses).
    pub fn commentaries(&self, verse_id: &str) -> &[Commentary] {
        self.commentaries
            .get(verse_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn commentary_count(&self) -> usize {
        self.commentaries.values().map(Vec::len).sum()
    }

    pub fn schools(&self) -> BTreeSet<&str> {
        self.commentaries
            .values()
            .flatten()
            .map(|c| c.school.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "bhagavad_gita": [
            {
                "chapter": 2,
                "verses": [
                    {
                        "verse": 47,
                        "shloka": "karmaṇy evādhikāras te",
                        "translations": {"english": "You have a right to action alone."},
                        "word_meaning": {"karmaṇi": "in action"},
                        "commentaries": {
                            "Advaita Vedanta": {"status": "original", "original_author": "Adi Shankaracharya", "text": "Action without attachment purifies the mind."},
                            "Dvaita": {"status": "missing", "text": "placeholder"},
                            "Sri Vaisnava Sampradaya": {"status": "substitute", "original_author": " ", "substitute_author": "Ramanujacharya", "text": "Duty offered to the Lord."},
                            "Empty School": {"status": "original", "text": ""}
                        }
                    },
                    {"shloka": "no verse number"}
                ]
            },
            {"verses": [{"verse": 1}]}
        ]
    }"#;

    #[test]
    fn test_loads_verses_with_ids() {
        let corpus = Corpus::from_json(SAMPLE).unwrap();
        assert_eq!(corpus.verses().len(), 1);
        let verse = corpus.verse("2:47").unwrap();
        assert_eq!(verse.chapter, 2);
        assert_eq!(verse.translations["english"], "You have a right to action alone.");
    }

    #[test]
    fn test_skips_missing_and_empty_commentaries() {
        let corpus = Corpus::from_json(SAMPLE).unwrap();
        let comms = corpus.commentaries("2:47");
        assert_eq!(comms.len(), 2);
        assert!(comms.iter().all(|c| c.school != "Dvaita" && c.school != "Empty School"));
    }

    #[test]
    fn test_commentary_ids_are_sequential_per_verse() {
        let corpus = Corpus::from_json(SAMPLE).unwrap();
        let ids: Vec<&str> = corpus.commentaries("2:47").iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "C2"]);
    }

    #[test]
    fn test_commentary_attribution_is_kept() {
        let corpus = Corpus::from_json(SAMPLE).unwrap();
        let comms = corpus.commentaries("2:47");

        assert_eq!(comms[0].status, "original");
        assert_eq!(comms[0].original_author.as_deref(), Some("Adi Shankaracharya"));
        assert_eq!(comms[0].author(), Some("Adi Shankaracharya"));

        assert_eq!(comms[1].status, "substitute");
        assert_eq!(comms[1].original_author, None);
        assert_eq!(comms[1].author(), Some("Ramanujacharya"));
    }

    #[test]
    fn test_commentary_without_status_defaults_to_original() {
        let corpus = Corpus::from_json(
            r#"{"bhagavad_gita": [{"chapter": 1, "verses": [{"verse": 1, "commentaries": {"Dvaita": {"text": "Dharma-kshetra is the field of duty."}}}]}]}"#,
        )
        .unwrap();
        let c = &corpus.commentaries("1:1")[0];
        assert_eq!(c.status, "original");
        assert_eq!(c.author(), None);
        let json = serde_json::to_value(c).unwrap();
        assert!(json.get("original_author").is_none());
    }

    #[test]
    fn test_unknown_verse_has_no_commentaries() {
        let corpus = Corpus::from_json(SAMPLE).unwrap();
        assert!(corpus.verse("18:99").is_none());
        assert!(corpus.commentaries("18:99").is_empty());
    }

    #[test]
    fn test_missing_root_key_is_an_error() {
        assert!(Corpus::from_json(r#"{"mahabharata": []}"#).is_err());
    }

    #[test]
    fn test_schools_are_collected() {
        let corpus = Corpus::from_json(SAMPLE).unwrap();
        let schools = corpus.schools();
        assert!(schools.contains("Advaita Vedanta"));
        assert_eq!(schools.len(), 2);
    }
}

use std::fmt::Write;

use crate::llm::generate::{Credential, Prompt, RequestError, TextGenerator};
use crate::models::Excerpt;
use crate::synthesis::select::truncate_chars;

/// Rough prompt size ceiling, leaving room for the response.
const PROMPT_TOKEN_BUDGET: f32 = 2800.0;
const SNIPPET_CHARS: usize = 200;
const TIGHT_SNIPPET_CHARS: usize = 150;
const TIGHT_EXCERPT_LIMIT: usize = 6;

const SYSTEM_PROMPT: &str = "You are a scholar of Hindu exegesis. Use only provided excerpts. \
     Do not add facts or invent attributions. You must respond with ONLY valid JSON - \
     no explanations, no markdown, no extra text. Just pure JSON.";

const FEW_SHOT_EXAMPLE: &str = r#"Example:
User question: "What is dharma?"
EXCERPTS:
C1 | Sri Vaisnava Sampradaya | "Dharma means righteous duty according to one's station in life..."
C2 | Advaita Vedanta | "Dharma is the eternal law that upholds cosmic order..."

Expected JSON:
{
  "summary": "Dharma represents righteous duty and eternal law that maintains cosmic order according to one's life circumstances.",
  "direction": "practical_action",
  "supporting_ids": ["C1", "C2"],
  "supporting_schools": ["Sri Vaisnava Sampradaya", "Advaita Vedanta"],
  "confidence_score": 0.8,
  "note": "Strong consensus across schools on dharma as duty and cosmic law."
}"#;

const INSTRUCTION: &str = r#"Instruction: You must respond with ONLY valid JSON. No other text. Produce JSON with these exact keys: summary (2-3 sentence synthesis to answer the user question), direction (practical_action|renunciation|devotional|jnana|mixed), supporting_ids (array of excerpt IDs used), supporting_schools (array of schools), confidence_score (0.0-1.0), note (short justification). Example format:
{"summary": "Your synthesis here", "direction": "mixed", "supporting_ids": ["C1"], "supporting_schools": ["School Name"], "confidence_score": 0.8, "note": "Justification"}"#;

/// One grounded synthesis call for a verse.
///
/// Construction applies the prompt budget: an oversized bundle is cut down to
/// the first few excerpts with shorter snippets. [`SynthesisRequest::excerpts`]
/// is what the model actually saw, and is what its citations are checked
/// against.
#[derive(Debug)]
pub struct SynthesisRequest<'a> {
    query: &'a str,
    excerpts: &'a [Excerpt],
    snippet_chars: usize,
}

impl<'a> SynthesisRequest<'a> {
    pub fn new(query: &'a str, excerpts: &'a [Excerpt]) -> Self {
        let full = Self {
            query,
            excerpts,
            snippet_chars: SNIPPET_CHARS,
        };
        if estimate_tokens(&full.user_prompt()) <= PROMPT_TOKEN_BUDGET {
            return full;
        }

        tracing::debug!(
            "Prompt over budget with {} excerpts, trimming to {}",
            excerpts.len(),
            TIGHT_EXCERPT_LIMIT
        );
        Self {
            query,
            excerpts: &excerpts[..excerpts.len().min(TIGHT_EXCERPT_LIMIT)],
            snippet_chars: TIGHT_SNIPPET_CHARS,
        }
    }

    pub fn excerpts(&self) -> &'a [Excerpt] {
        self.excerpts
    }

    pub fn prompt(&self) -> Prompt {
        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user: self.user_prompt(),
        }
    }

    /// Invoke the generator. Does not touch usage metering.
    pub async fn send(
        &self,
        generator: &dyn TextGenerator,
        credential: &Credential,
    ) -> Result<String, RequestError> {
        generator.generate(&self.prompt(), credential).await
    }

    fn user_prompt(&self) -> String {
        format!(
            "{FEW_SHOT_EXAMPLE}\n\n{}\n{INSTRUCTION}",
            excerpt_bundle(self.query, self.excerpts, self.snippet_chars)
        )
    }
}

fn excerpt_bundle(query: &str, excerpts: &[Excerpt], snippet_chars: usize) -> String {
    let mut bundle = format!("User question: \"{}\"\nEXCERPTS:\n", sanitize_for_prompt(query));
    for excerpt in excerpts {
        let snippet = truncate_chars(&sanitize_for_prompt(&excerpt.text), snippet_chars);
        // Writing to a String cannot fail
        let _ = writeln!(
            bundle,
            "{} | {} | \"{}...\"",
            excerpt.id,
            sanitize_for_prompt(&excerpt.school),
            snippet.trim()
        );
    }
    bundle
}

/// Word count × 1.3, a cheap stand-in for a tokenizer.
fn estimate_tokens(text: &str) -> f32 {
    text.split_whitespace().count() as f32 * 1.3
}

/// Strip chat-template control tokens so corpus text or queries cannot open a
/// new turn.
pub fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|im_start|>", "")
        .replace("<|im_end|>", "")
        .replace("<|endoftext|>", "")
}

// Text tokenizer shared by BM25 indexing and querying
//
// Scripts with whitespace word boundaries go through Unicode word
// segmentation. Runs of Han/Kana characters go through jieba's dictionary
// segmenter instead of being split per character.
use jieba_rs::Jieba;
use std::sync::OnceLock;
use unicode_segmentation::UnicodeSegmentation;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// Locale-aware word tokenizer
///
/// Kana runs are segmented with jieba's Chinese dictionary, so Japanese words
/// split less accurately than Chinese ones. Thai, Lao, Khmer and Burmese have
/// no segmenter here and fall back to Unicode word boundaries, which break
/// those scripts per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextTokenizer {
    segment_cjk: bool,
}

impl TextTokenizer {
    /// Tokenizer with dictionary segmentation for CJK runs
    pub fn new() -> Self {
        Self { segment_cjk: true }
    }

    /// Enable or disable dictionary segmentation (per-character when off)
    pub fn with_cjk_segmentation(segment_cjk: bool) -> Self {
        Self { segment_cjk }
    }

    /// Lowercased word tokens in text order
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();

        for (run, cjk) in script_runs(text) {
            if cjk {
                self.push_cjk(run, &mut tokens);
            } else {
                tokens.extend(run.unicode_words().map(str::to_lowercase));
            }
        }

        tokens
    }

    fn push_cjk(&self, run: &str, tokens: &mut Vec<String>) {
        if self.segment_cjk {
            tokens.extend(
                jieba()
                    .cut(run, true)
                    .into_iter()
                    .filter(|word| word.chars().any(char::is_alphanumeric))
                    .map(str::to_lowercase),
            );
        } else {
            tokens.extend(run.chars().map(|c| c.to_string()));
        }
    }
}

impl Default for TextTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Han ideographs and Japanese kana
fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF
    )
}

/// Split text into maximal runs of CJK / non-CJK characters
fn script_runs(text: &str) -> Vec<(&str, bool)> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;

    for (idx, c) in text.char_indices() {
        let cjk = is_cjk(c);
        match current {
            Some(kind) if kind != cjk => {
                runs.push((&text[start..idx], kind));
                start = idx;
                current = Some(cjk);
            }
            None => current = Some(cjk),
            _ => {}
        }
    }

    if let Some(kind) = current {
        runs.push((&text[start..], kind));
    }

    runs
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

/// Text to token mapping used for context-window accounting.
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    /// Byte ranges of each token in `text`, in order.
    fn token_spans(&self, text: &str) -> Vec<(usize, usize)>;

    fn encode(&self, text: &str) -> Vec<u32>;

    fn count(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }
}

static PRETOKENIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+")
        .expect("pre-tokenizer pattern is valid")
});

/// Longest piece, in chars, a single reference token may cover.
const MAX_PIECE_CHARS: usize = 6;

/// Approximates a BPE vocabulary: GPT-style pre-tokenization, with long
/// pieces split into fixed-width chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceTokenizer;

impl Tokenizer for ReferenceTokenizer {
    fn name(&self) -> &str {
        "reference"
    }

    fn token_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        for piece in PRETOKENIZE.find_iter(text) {
            let mut start = piece.start();
            let mut chars = 0;
            for (offset, _) in piece.as_str().char_indices() {
                if chars == MAX_PIECE_CHARS {
                    let split = piece.start() + offset;
                    spans.push((start, split));
                    start = split;
                    chars = 0;
                }
                chars += 1;
            }
            spans.push((start, piece.end()));
        }
        spans
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        self.token_spans(text)
            .into_iter()
            .map(|(start, end)| fnv1a(&text.as_bytes()[start..end]))
            .collect()
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// A HuggingFace `tokenizer.json` vocabulary.
pub struct HfTokenizer {
    name: String,
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(name: &str, path: &Path) -> Result<Self, String> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| e.to_string())?;
        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }
}

impl Tokenizer for HfTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn token_spans(&self, text: &str) -> Vec<(usize, usize)> {
        match self.inner.encode(text, false) {
            Ok(encoding) => encoding.get_offsets().to_vec(),
            Err(err) => {
                tracing::debug!(tokenizer = %self.name, "Encoding failed, using reference: {}", err);
                ReferenceTokenizer.token_spans(text)
            }
        }
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        match self.inner.encode(text, false) {
            Ok(encoding) => encoding.get_ids().to_vec(),
            Err(_) => ReferenceTokenizer.encode(text),
        }
    }
}

/// Resolves a tokenizer per model name from configured `tokenizer.json` files.
pub struct TokenizerRegistry {
    files: BTreeMap<String, PathBuf>,
}

impl TokenizerRegistry {
    pub fn new(files: BTreeMap<String, PathBuf>) -> Self {
        Self { files }
    }

    /// Never fails: unknown models and unreadable files fall back to the
    /// reference tokenizer.
    pub fn resolve(&self, model: &str) -> Arc<dyn Tokenizer> {
        let Some(path) = self.files.get(model) else {
            return Arc::new(ReferenceTokenizer);
        };
        match HfTokenizer::from_file(model, path) {
            Ok(tokenizer) => Arc::new(tokenizer),
            Err(err) => {
                tracing::warn!(
                    model = %model,
                    path = %path.display(),
                    "Failed to load tokenizer, using reference: {}",
                    err
                );
                Arc::new(ReferenceTokenizer)
            }
        }
    }
}

use std::collections::{HashMap, HashSet};

use tokenizers::{
    models::bpe::{BpeTrainerBuilder, BPE},
    pre_tokenizers::whitespace::WhitespaceSplit,
    AddedToken, DecoderWrapper, NormalizerWrapper, PostProcessorWrapper, TokenizerBuilder,
    TokenizerImpl,
};
use tracing::{debug, warn};

use crate::errors::{Result, RnnLmError};
use crate::params::WHITESPACE_NUM_TYPES;

/// Prefix marking a piece that continues a word
pub const CONTINUATION_PREFIX: &str = "##";

type BpeModel = TokenizerImpl<BPE, NormalizerWrapper, WhitespaceSplit, PostProcessorWrapper, DecoderWrapper>;

/// Anything that turns a transcript into a sequence of string tokens
pub trait Tokenize {
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;
}

/// Tokenizer chosen for a run
#[derive(Debug, Clone)]
pub enum Tokenizer {
    /// Split on whitespace and nothing else
    Whitespace,
    Bpe(BpeTokenizer),
}

impl Tokenize for Tokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        match self {
            Tokenizer::Whitespace => Ok(text.split_whitespace().map(str::to_string).collect()),
            Tokenizer::Bpe(bpe) => bpe.tokenize(text),
        }
    }
}

/// Train the tokenizer a run asks for.
///
/// `num_types == WHITESPACE_NUM_TYPES` selects whitespace tokenization; any other
/// value trains byte-pair merges until the vocabulary reaches `num_types`.
pub fn train_tokenizer<S: AsRef<str> + Sync>(
    transcripts: &[S],
    num_types: usize,
    special_tokens: &[String],
) -> Result<Tokenizer> {
    if num_types == WHITESPACE_NUM_TYPES {
        return Ok(Tokenizer::Whitespace);
    }
    Ok(Tokenizer::Bpe(BpeTokenizer::train(transcripts, num_types, special_tokens)?))
}

/// Byte-pair-encoding tokenizer with atomic special tokens
///
/// Transcripts are split on whitespace before merging, so pieces never cross
/// word boundaries. Special tokens only match whole words.
#[derive(Debug, Clone)]
pub struct BpeTokenizer {
    inner: BpeModel,
}

impl BpeTokenizer {
    pub fn train<S: AsRef<str> + Sync>(
        transcripts: &[S],
        num_types: usize,
        special_tokens: &[String],
    ) -> Result<Self> {
        let special_tokens: Vec<AddedToken> = special_tokens
            .iter()
            .map(|token| AddedToken::from(token.clone(), true).single_word(true))
            .collect();

        let mut trainer = BpeTrainerBuilder::new()
            .show_progress(false)
            .vocab_size(num_types)
            .continuing_subword_prefix(CONTINUATION_PREFIX.to_string())
            .special_tokens(special_tokens)
            .build();

        let mut inner: BpeModel = TokenizerBuilder::new()
            .with_model(BPE::default())
            .with_pre_tokenizer(Some(WhitespaceSplit))
            .build()
            .map_err(|e| RnnLmError::Tokenizer(e.to_string()))?;
        inner
            .train(&mut trainer, transcripts.iter().map(|t| t.as_ref()))
            .map_err(|e| RnnLmError::Tokenizer(e.to_string()))?;

        debug!(
            vocab_size = inner.get_vocab_size(true),
            requested = num_types,
            "trained byte-pair tokenizer"
        );
        Ok(Self { inner })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl Tokenize for BpeTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| RnnLmError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_tokens().to_vec())
    }
}

/// Fail when a special token that occurs in the raw tokens is missing after tokenization.
///
/// Every violation is logged before a single error reports their count.
pub fn check_probes_preserved(
    special_tokens: &[String],
    tokens_original: &[String],
    tokens: &[String],
) -> Result<()> {
    let tokenized: HashSet<&str> = tokens.iter().map(String::as_str).collect();
    let mut original_counts: HashMap<&str, usize> = HashMap::new();
    for token in tokens_original {
        *original_counts.entry(token.as_str()).or_insert(0) += 1;
    }

    let mut num_errors = 0;
    for special in special_tokens {
        let occurrences = original_counts.get(special.as_str()).copied().unwrap_or(0);
        if occurrences > 0 && !tokenized.contains(special.as_str()) {
            warn!(
                probe = %special,
                occurrences,
                "probe occurs in original text but not in tokenized text"
            );
            num_errors += 1;
        }
    }

    if num_errors > 0 {
        return Err(RnnLmError::ProbesSplit { count: num_errors });
    }
    Ok(())
}

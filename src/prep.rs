use burn::config::Config;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::errors::{self, RnnLmError};
use crate::vocab::Vocab;

/// Configuration of the windowing generator
#[derive(Config, Debug)]
pub struct PrepConfig {
    /// Windows per minibatch
    batch_size: usize,
    /// Tokens preceding the target in every window
    context_size: usize,
    /// Ordered parts the training tokens are split into
    #[config(default = 1)]
    num_parts: usize,
    /// Iterations over the first and the last presented part
    #[config(default = "(1, 1)")]
    num_iterations: (usize, usize),
    /// Present parts last-to-first
    #[config(default = false)]
    reverse: bool,
    /// Overlapping windows with stride one instead of back-to-back windows
    #[config(default = false)]
    sliding: bool,
    /// Reorder windows of a part before every pass over it
    #[config(default = false)]
    shuffle_within_part: bool,
    /// Smallest acceptable held-out partition
    #[config(default = 0)]
    min_num_test_tokens: usize,
    #[config(default = 42)]
    seed: u64,
}

impl PrepConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    /// Partition `tokens` and index them with `vocab`, or with a vocabulary built from `tokens`.
    ///
    /// The held-out partition is the tail of the stream. The training partition is
    /// the longest prefix that splits into `num_parts` equal parts of whole minibatches
    /// while leaving at least `min_num_test_tokens` tokens behind.
    pub fn init<S: AsRef<str>>(&self, tokens: &[S], vocab: Option<Vocab>) -> errors::Result<Prep> {
        if self.batch_size == 0 || self.context_size == 0 || self.num_parts == 0 {
            return Err(RnnLmError::InvalidParameter(format!(
                "batch_size={}, context_size={} and num_parts={} must all be positive",
                self.batch_size, self.context_size, self.num_parts
            )));
        }

        let num_tokens = tokens.len();
        if num_tokens < self.min_num_test_tokens {
            return Err(RnnLmError::InsufficientTestTokens {
                available: num_tokens,
                required: self.min_num_test_tokens,
            });
        }

        let window_size = self.context_size + 1;
        let available = num_tokens - self.min_num_test_tokens;
        let budget = available / self.num_parts;
        let (num_tokens_in_part, num_mbs_in_part) = if self.sliding {
            let num_mbs = budget.saturating_sub(self.context_size) / self.batch_size;
            (num_mbs * self.batch_size + self.context_size, num_mbs)
        } else {
            let tokens_per_mb = self.batch_size * window_size;
            let num_mbs = budget / tokens_per_mb;
            (num_mbs * tokens_per_mb, num_mbs)
        };
        if num_mbs_in_part == 0 {
            return Err(RnnLmError::InsufficientTrainTokens {
                available,
                num_parts: self.num_parts,
                batch_size: self.batch_size,
                window_size,
            });
        }

        let vocab = vocab.unwrap_or_else(|| Vocab::from_tokens(tokens));
        let mut ids_train = vocab.encode(tokens)?;
        let mut tokens_train: Vec<String> = tokens.iter().map(|t| t.as_ref().to_string()).collect();

        let num_tokens_train = num_tokens_in_part * self.num_parts;
        let ids_test = ids_train.split_off(num_tokens_train);
        let tokens_test = tokens_train.split_off(num_tokens_train);

        Ok(Prep {
            batch_size: self.batch_size,
            context_size: self.context_size,
            num_parts: self.num_parts,
            reverse: self.reverse,
            sliding: self.sliding,
            shuffle_within_part: self.shuffle_within_part,
            seed: self.seed,
            num_iterations_list: interpolate_iterations(self.num_iterations, self.num_parts),
            num_tokens_in_part,
            num_mbs_in_part,
            vocab,
            tokens_train,
            tokens_test,
            ids_train,
            ids_test,
        })
    }
}

/// Iterations per presented part, linearly interpolated and truncated towards zero
fn interpolate_iterations((first, last): (usize, usize), num_parts: usize) -> Vec<usize> {
    if num_parts == 1 {
        return vec![first];
    }

    (0..num_parts)
        .map(|i| {
            let fraction = i as f64 / (num_parts - 1) as f64;
            (first as f64 + (last as f64 - first as f64) * fraction) as usize
        })
        .collect()
}

/// Row-major matrix of token ids, one window per row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Windows {
    ids: Vec<usize>,
    width: usize,
}

impl Windows {
    pub fn new(ids: Vec<usize>, width: usize) -> Self {
        debug_assert!(width > 0 && ids.len() % width == 0);
        Self { ids, width }
    }

    pub fn num_windows(&self) -> usize {
        if self.width == 0 { 0 } else { self.ids.len() / self.width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[usize]> {
        self.ids.chunks_exact(self.width.max(1))
    }
}

/// Token stream split into ordered parts plus a held-out tail
#[derive(Debug, Clone)]
pub struct Prep {
    batch_size: usize,
    context_size: usize,
    num_parts: usize,
    reverse: bool,
    sliding: bool,
    shuffle_within_part: bool,
    seed: u64,
    num_iterations_list: Vec<usize>,
    num_tokens_in_part: usize,
    num_mbs_in_part: usize,
    vocab: Vocab,
    tokens_train: Vec<String>,
    tokens_test: Vec<String>,
    ids_train: Vec<usize>,
    ids_test: Vec<usize>,
}

impl Prep {
    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn num_types(&self) -> usize {
        self.vocab.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn window_size(&self) -> usize {
        self.context_size + 1
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    pub fn num_tokens_in_part(&self) -> usize {
        self.num_tokens_in_part
    }

    pub fn num_mbs_in_part(&self) -> usize {
        self.num_mbs_in_part
    }

    /// Iterations per part, in presentation order
    pub fn num_iterations_list(&self) -> &[usize] {
        &self.num_iterations_list
    }

    /// Total number of minibatches `generate_batches` yields
    pub fn num_mbs(&self) -> usize {
        self.num_mbs_in_part * self.num_iterations_list.iter().sum::<usize>()
    }

    pub fn tokens_train(&self) -> &[String] {
        &self.tokens_train
    }

    pub fn tokens_test(&self) -> &[String] {
        &self.tokens_test
    }

    pub fn ids_train(&self) -> &[usize] {
        &self.ids_train
    }

    pub fn ids_test(&self) -> &[usize] {
        &self.ids_test
    }

    /// Part indices in the order they are presented
    pub fn part_order(&self) -> Vec<usize> {
        if self.reverse {
            (0..self.num_parts).rev().collect()
        } else {
            (0..self.num_parts).collect()
        }
    }

    /// Lazily yield every training minibatch.
    pub fn generate_batches(&self) -> Batches<'_> {
        Batches {
            prep: self,
            part_order: self.part_order(),
            position: 0,
            iteration: 0,
            mb: 0,
            row_order: Vec::new(),
            remaining: self.num_mbs(),
            rng: StdRng::seed_from_u64(self.seed),
        }
    }

    /// Back-to-back windows over the held-out tokens; the last batch may be short.
    pub fn test_batches(&self, max_windows: usize) -> Vec<Windows> {
        batch_windows(&self.ids_test, self.window_size(), self.batch_size, max_windows)
    }

    /// Back-to-back windows over the training tokens, for scoring without an update.
    pub fn train_eval_batches(&self, max_windows: usize) -> Vec<Windows> {
        batch_windows(&self.ids_train, self.window_size(), self.batch_size, max_windows)
    }

    /// Training contexts whose last token is `id`, without targets.
    pub fn contexts_ending_in(&self, id: usize, max_windows: usize) -> Windows {
        let ids: Vec<usize> = self
            .ids_train
            .iter()
            .enumerate()
            .filter(|&(i, &token)| token == id && i + 1 >= self.context_size)
            .take(max_windows)
            .flat_map(|(i, _)| self.ids_train[i + 1 - self.context_size..=i].iter().copied())
            .collect();

        Windows::new(ids, self.context_size)
    }

    fn part_batch(&self, part: usize, rows: &[usize]) -> Windows {
        let window_size = self.window_size();
        let part_start = part * self.num_tokens_in_part;
        let mut ids = Vec::with_capacity(rows.len() * window_size);
        for &row in rows {
            let offset = part_start + if self.sliding { row } else { row * window_size };
            ids.extend_from_slice(&self.ids_train[offset..offset + window_size]);
        }

        Windows::new(ids, window_size)
    }
}

fn batch_windows(ids: &[usize], width: usize, batch_size: usize, max_windows: usize) -> Vec<Windows> {
    let rows: Vec<&[usize]> = ids.chunks_exact(width).take(max_windows).collect();
    rows.chunks(batch_size.max(1))
        .map(|batch| Windows::new(batch.concat(), width))
        .collect()
}

/// Finite, ordered sequence of training minibatches
///
/// Each part is exhausted, for its configured number of passes, before the next part starts.
pub struct Batches<'a> {
    prep: &'a Prep,
    part_order: Vec<usize>,
    position: usize,
    iteration: usize,
    mb: usize,
    row_order: Vec<usize>,
    remaining: usize,
    rng: StdRng,
}

impl Batches<'_> {
    fn start_pass(&mut self) {
        let num_windows = self.prep.num_mbs_in_part * self.prep.batch_size;
        self.row_order = (0..num_windows).collect();
        if self.prep.shuffle_within_part {
            self.row_order.shuffle(&mut self.rng);
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Windows;

    fn next(&mut self) -> Option<Windows> {
        let batch_size = self.prep.batch_size;
        loop {
            let part = *self.part_order.get(self.position)?;
            if self.iteration == self.prep.num_iterations_list[self.position] {
                self.position += 1;
                self.iteration = 0;
                continue;
            }
            if self.mb == self.prep.num_mbs_in_part {
                self.iteration += 1;
                self.mb = 0;
                continue;
            }
            if self.mb == 0 {
                self.start_pass();
            }

            let rows = &self.row_order[self.mb * batch_size..(self.mb + 1) * batch_size];
            let batch = self.prep.part_batch(part, rows);
            self.mb += 1;
            self.remaining = self.remaining.saturating_sub(1);
            return Some(batch);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn stream(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{}", i % 7)).collect()
    }

    #[test]
    fn test_two_back_to_back_windows() {
        let tokens = words("a b c a b c");
        let prep = PrepConfig::new(2, 2).init(&tokens, None).unwrap();

        let batches: Vec<Windows> = prep.generate_batches().collect();
        assert_eq!(prep.num_mbs(), 1);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_windows(), 2);
        assert_eq!(batches[0].width(), 3);

        let rows: Vec<Vec<&str>> = batches[0]
            .rows()
            .map(|row| row.iter().map(|&id| prep.vocab().token(id).unwrap()).collect())
            .collect();
        assert_eq!(rows, vec![vec!["a", "b", "c"], vec!["a", "b", "c"]]);
        assert!(prep.tokens_test().is_empty());
    }

    #[test]
    fn test_yielded_count_matches_num_mbs() {
        let tokens = stream(211);
        for sliding in [false, true] {
            for num_parts in [1, 2, 3] {
                for num_iterations in [(1, 1), (2, 1), (1, 3)] {
                    for batch_size in [1, 2, 3] {
                        for context_size in [1, 2] {
                            for min_num_test_tokens in [0, 17] {
                                let prep = PrepConfig::new(batch_size, context_size)
                                    .with_num_parts(num_parts)
                                    .with_num_iterations(num_iterations)
                                    .with_sliding(sliding)
                                    .with_min_num_test_tokens(min_num_test_tokens)
                                    .init(&tokens, None)
                                    .unwrap();
                                let batches = prep.generate_batches();
                                assert_eq!(batches.len(), prep.num_mbs());

                                let mut count = 0;
                                for batch in batches {
                                    assert_eq!(batch.num_windows(), batch_size);
                                    assert_eq!(batch.width(), context_size + 1);
                                    count += 1;
                                }
                                assert_eq!(count, prep.num_mbs());
                                assert!(prep.tokens_test().len() >= min_num_test_tokens);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_train_and_test_partition_the_stream() {
        let tokens = stream(500);
        let prep = PrepConfig::new(4, 3)
            .with_num_parts(4)
            .with_min_num_test_tokens(50)
            .init(&tokens, None)
            .unwrap();

        let rejoined: Vec<String> = prep
            .tokens_train()
            .iter()
            .chain(prep.tokens_test())
            .cloned()
            .collect();
        assert_eq!(rejoined, tokens);
        assert_eq!(prep.tokens_train().len(), 4 * prep.num_tokens_in_part());
        assert!(prep.tokens_test().len() >= 50);
    }

    #[test]
    fn test_insufficient_test_tokens() {
        let tokens = stream(20);
        let err = PrepConfig::new(2, 2)
            .with_min_num_test_tokens(21)
            .init(&tokens, None)
            .unwrap_err();
        assert!(matches!(
            err,
            RnnLmError::InsufficientTestTokens { available: 20, required: 21 }
        ));
        assert!(err.is_data_consistency());
    }

    #[test]
    fn test_insufficient_train_tokens() {
        let tokens = stream(20);
        let err = PrepConfig::new(8, 2).with_num_parts(2).init(&tokens, None).unwrap_err();
        assert!(matches!(err, RnnLmError::InsufficientTrainTokens { .. }));
    }

    #[test]
    fn test_shared_vocab_is_identical() {
        let tokens = stream(100);
        let prep = PrepConfig::new(2, 2).init(&tokens, None).unwrap();
        let start_tokens: Vec<String> = tokens.iter().take(30).rev().cloned().collect();
        let prep_start = PrepConfig::new(2, 2)
            .init(&start_tokens, Some(prep.vocab().clone()))
            .unwrap();
        assert_eq!(prep_start.vocab(), prep.vocab());
        assert_eq!(prep_start.vocab().token2id(), prep.vocab().token2id());
    }

    #[test]
    fn test_shared_vocab_rejects_foreign_tokens() {
        let prep = PrepConfig::new(1, 1).init(&words("a b a b"), None).unwrap();
        let err = PrepConfig::new(1, 1)
            .init(&words("a b z"), Some(prep.vocab().clone()))
            .unwrap_err();
        assert!(matches!(err, RnnLmError::UnknownToken(t) if t == "z"));
    }

    #[test]
    fn test_reverse_presents_last_part_first() {
        let tokens = words("a a a a b b b b");
        let prep = PrepConfig::new(2, 1)
            .with_num_parts(2)
            .with_reverse(true)
            .init(&tokens, None)
            .unwrap();
        let b = prep.vocab().id("b").unwrap();

        let first = prep.generate_batches().next().unwrap();
        assert!(first.ids().iter().all(|&id| id == b));
        assert_eq!(prep.part_order(), vec![1, 0]);
    }

    #[test]
    fn test_each_part_repeated_before_advancing() {
        let tokens = words("a a a a b b b b");
        let prep = PrepConfig::new(2, 1)
            .with_num_parts(2)
            .with_num_iterations((2, 1))
            .init(&tokens, None)
            .unwrap();
        let a = prep.vocab().id("a").unwrap();

        let batches: Vec<Windows> = prep.generate_batches().collect();
        assert_eq!(prep.num_iterations_list(), &[2, 1]);
        assert_eq!(batches.len(), 3);
        assert!(batches[0].ids().iter().all(|&id| id == a));
        assert!(batches[1].ids().iter().all(|&id| id == a));
        assert!(batches[2].ids().iter().all(|&id| id != a));
    }

    #[test]
    fn test_iteration_interpolation() {
        assert_eq!(interpolate_iterations((1, 3), 3), vec![1, 2, 3]);
        assert_eq!(interpolate_iterations((12, 12), 4), vec![12, 12, 12, 12]);
        assert_eq!(interpolate_iterations((5, 1), 1), vec![5]);
    }

    #[test]
    fn test_sliding_windows_overlap() {
        let tokens = words("a b c d e");
        let prep = PrepConfig::new(2, 1).with_sliding(true).init(&tokens, None).unwrap();
        let batches: Vec<Windows> = prep.generate_batches().collect();

        assert_eq!(prep.num_mbs(), 2);
        let first: Vec<&[usize]> = batches[0].rows().collect();
        assert_eq!(first[0][1], first[1][0]);
    }

    #[test]
    fn test_shuffle_within_part_keeps_windows() {
        let tokens = stream(120);
        let config = PrepConfig::new(3, 2).with_num_parts(2);
        let plain = config.init(&tokens, None).unwrap();
        let shuffled = config
            .clone()
            .with_shuffle_within_part(true)
            .with_seed(7)
            .init(&tokens, None)
            .unwrap();

        let collect_rows = |prep: &Prep| {
            let mut rows: Vec<Vec<usize>> = prep
                .generate_batches()
                .flat_map(|batch| batch.rows().map(<[usize]>::to_vec).collect::<Vec<_>>())
                .collect();
            rows.sort();
            rows
        };
        assert_eq!(collect_rows(&plain), collect_rows(&shuffled));
    }

    #[test]
    fn test_test_batches_keep_short_tail() {
        let tokens = stream(60);
        let prep = PrepConfig::new(2, 1)
            .with_min_num_test_tokens(10)
            .init(&tokens, None)
            .unwrap();
        // 50 training tokens leave 10 held-out tokens, five windows of two
        let batches = prep.test_batches(usize::MAX);
        assert_eq!(prep.tokens_test().len(), 10);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].num_windows(), 1);
        assert_eq!(prep.test_batches(3).iter().map(Windows::num_windows).sum::<usize>(), 3);
    }

    #[test]
    fn test_contexts_ending_in() {
        let tokens = words("a b c a b c");
        let prep = PrepConfig::new(2, 2).init(&tokens, None).unwrap();
        let c = prep.vocab().id("c").unwrap();
        let contexts = prep.contexts_ending_in(c, 10);
        assert_eq!(contexts.num_windows(), 2);
        assert!(contexts.rows().all(|row| row[1] == c));
        assert_eq!(prep.contexts_ending_in(c, 1).num_windows(), 1);
    }
}

use std::collections::BTreeSet;

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::params::{StartConfig, StartStrategy};

/// Builds a synthetic token stream, presented before the corpus, in which every
/// probe appears in short fragments
pub struct StartEditor<'a> {
    tokens: &'a [String],
    probes: Vec<String>,
    first_part_len: usize,
    rng: StdRng,
}

impl<'a> StartEditor<'a> {
    pub fn new(tokens: &'a [String], probes: &[String], num_parts: usize, seed: u64) -> Self {
        let probes: BTreeSet<String> = probes.iter().cloned().collect();
        Self {
            tokens,
            probes: probes.into_iter().collect(),
            first_part_len: tokens.len() / num_parts.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn first_part(&self) -> &'a [String] {
        &self.tokens[..self.first_part_len]
    }

    pub fn make_start_tokens(&mut self, strategy: StartStrategy, config: &StartConfig) -> Vec<String> {
        let mut fragments = match strategy {
            StartStrategy::None => Vec::new(),
            StartStrategy::Entropic => self.entropic(config),
            StartStrategy::Fragmented => self.in_context(config, config.num_fragments_per_probe),
            StartStrategy::Singleton => self.in_context(config, 1),
        };
        fragments.shuffle(&mut self.rng);
        fragments.concat()
    }

    /// Probes flanked by types drawn uniformly from the first part
    fn entropic(&mut self, config: &StartConfig) -> Vec<Vec<String>> {
        let types: Vec<&String> = self
            .first_part()
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if types.is_empty() {
            return Vec::new();
        }

        let mut fragments = Vec::new();
        for probe in &self.probes {
            for _ in 0..config.num_fragments_per_probe {
                let mut fragment = Vec::with_capacity(config.num_left_words + 1 + config.num_right_words);
                for _ in 0..config.num_left_words {
                    fragment.push(types[self.rng.gen_range(0..types.len())].clone());
                }
                fragment.push(probe.clone());
                for _ in 0..config.num_right_words {
                    fragment.push(types[self.rng.gen_range(0..types.len())].clone());
                }
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Probes with their real neighbours, taken around random occurrences
    ///
    /// Occurrences in the first part are preferred; a probe absent from it is
    /// looked up in the whole stream and skipped if it never occurs.
    fn in_context(&mut self, config: &StartConfig, num_fragments: usize) -> Vec<Vec<String>> {
        let tokens = self.tokens;
        let first_part = self.first_part();

        let mut fragments = Vec::new();
        for probe in &self.probes {
            let mut positions = occurrences(first_part, probe);
            if positions.is_empty() {
                positions = occurrences(tokens, probe);
            }
            if positions.is_empty() {
                continue;
            }

            for _ in 0..num_fragments {
                let pos = positions[self.rng.gen_range(0..positions.len())];
                let start = pos.saturating_sub(config.num_left_words);
                let end = (pos + config.num_right_words + 1).min(tokens.len());
                fragments.push(tokens[start..end].to_vec());
            }
        }
        fragments
    }
}

fn occurrences(tokens: &[String], probe: &str) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| t.as_str() == probe)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Vec<String> {
        "the dog ran to the cat and the cat saw a dog near the house"
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    fn probes() -> Vec<String> {
        vec!["dog".to_string(), "cat".to_string()]
    }

    #[test]
    fn test_entropic_fragment_layout() {
        let tokens = stream();
        let config = StartConfig::new().with_num_fragments_per_probe(3);
        let mut editor = StartEditor::new(&tokens, &probes(), 2, 0);
        let start = editor.make_start_tokens(StartStrategy::Entropic, &config);

        assert_eq!(start.len(), 2 * 3 * 3);
        let centers: Vec<&String> = start.chunks(3).map(|f| &f[1]).collect();
        assert_eq!(centers.iter().filter(|c| c.as_str() == "dog").count(), 3);
        assert_eq!(centers.iter().filter(|c| c.as_str() == "cat").count(), 3);
        assert!(start.iter().all(|t| tokens.contains(t)));
    }

    #[test]
    fn test_singleton_uses_real_neighbours() {
        let tokens = stream();
        let mut editor = StartEditor::new(&tokens, &probes(), 1, 0);
        let start = editor.make_start_tokens(StartStrategy::Singleton, &StartConfig::new());

        assert_eq!(start.len(), 6);
        let text = tokens.join(" ");
        for fragment in start.chunks(3) {
            assert!(text.contains(&fragment.join(" ")));
        }
    }

    #[test]
    fn test_fragmented_is_seeded() {
        let tokens = stream();
        let config = StartConfig::new();
        let a = StartEditor::new(&tokens, &probes(), 2, 9)
            .make_start_tokens(StartStrategy::Fragmented, &config);
        let b = StartEditor::new(&tokens, &probes(), 2, 9)
            .make_start_tokens(StartStrategy::Fragmented, &config);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2 * config.num_fragments_per_probe * 3);
    }

    #[test]
    fn test_absent_probe_is_skipped() {
        let tokens = stream();
        let probes = vec!["zebra".to_string()];
        let mut editor = StartEditor::new(&tokens, &probes, 1, 0);
        assert!(editor
            .make_start_tokens(StartStrategy::Singleton, &StartConfig::new())
            .is_empty());
        assert!(editor
            .make_start_tokens(StartStrategy::None, &StartConfig::new())
            .is_empty());
    }
}

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{Result, RnnLmError};
use crate::params::CorpusId;

/// Source of raw transcripts
pub trait Corpus {
    /// Transcripts in corpus order, one string per transcript.
    fn load_transcripts(&self, corpus: CorpusId) -> Result<Vec<String>>;

    /// Raw whitespace tokens of the whole corpus.
    fn load_tokens(&self, corpus: CorpusId) -> Result<Vec<String>> {
        Ok(whitespace_tokens(&self.load_transcripts(corpus)?))
    }
}

/// Words of every transcript, in order.
pub fn whitespace_tokens<S: AsRef<str>>(transcripts: &[S]) -> Vec<String> {
    transcripts
        .iter()
        .flat_map(|t| t.as_ref().split_whitespace().map(str::to_string))
        .collect()
}

/// Source of probe labels for a category structure
pub trait ProbeLabels {
    fn load_probe2cat(&self, structure: &str, corpus: CorpusId) -> Result<HashMap<String, String>>;
}

/// Corpora stored as `{root}/{corpus}.txt`, one transcript per line
#[derive(Debug, Clone)]
pub struct TextCorpus {
    root: PathBuf,
}

impl TextCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, corpus: CorpusId) -> PathBuf {
        self.root.join(format!("{}.txt", corpus.as_str()))
    }
}

impl Corpus for TextCorpus {
    fn load_transcripts(&self, corpus: CorpusId) -> Result<Vec<String>> {
        let path = self.path(corpus);
        let text = fs::read_to_string(&path).map_err(|e| RnnLmError::CorpusLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let transcripts: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!(path = %path.display(), transcripts = transcripts.len(), "loaded corpus");
        Ok(transcripts)
    }
}

/// Probe labels stored as `{project_path}/data/structures/{structure}/{corpus}.txt`
///
/// Every non-empty line holds a probe and its category separated by whitespace.
#[derive(Debug, Clone)]
pub struct StructureFiles {
    project_path: PathBuf,
}

impl StructureFiles {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self { project_path: project_path.into() }
    }

    pub fn path(&self, structure: &str, corpus: CorpusId) -> PathBuf {
        self.project_path
            .join("data")
            .join("structures")
            .join(structure)
            .join(format!("{}.txt", corpus.as_str()))
    }
}

impl ProbeLabels for StructureFiles {
    fn load_probe2cat(&self, structure: &str, corpus: CorpusId) -> Result<HashMap<String, String>> {
        let path = self.path(structure, corpus);
        let text = fs::read_to_string(&path).map_err(|e| RnnLmError::ProbeLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        parse_probe2cat(&text, &path)
    }
}

fn parse_probe2cat(text: &str, path: &Path) -> Result<HashMap<String, String>> {
    let mut probe2cat = HashMap::new();
    for (line_number, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let (probe, cat) = match (fields.next(), fields.next(), fields.next()) {
            (None, _, _) => continue,
            (Some(probe), Some(cat), None) => (probe, cat),
            _ => {
                return Err(RnnLmError::ProbeLoad {
                    path: path.to_path_buf(),
                    reason: format!("line {} is not \"probe category\": {line:?}", line_number + 1),
                });
            }
        };
        probe2cat.insert(probe.to_string(), cat.to_string());
    }
    Ok(probe2cat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_corpus_reads_lines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("aochildes.txt"), "look at the dog\n\nthe dog ran\n").unwrap();

        let corpus = TextCorpus::new(dir.path());
        let transcripts = corpus.load_transcripts(CorpusId::AoChildes).unwrap();
        assert_eq!(transcripts, vec!["look at the dog", "the dog ran"]);
        assert_eq!(corpus.load_tokens(CorpusId::AoChildes).unwrap().len(), 7);

        let err = corpus.load_transcripts(CorpusId::AoNewsela).unwrap_err();
        assert!(matches!(err, RnnLmError::CorpusLoad { .. }));
    }

    #[test]
    fn test_structure_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = StructureFiles::new(dir.path());
        let path = files.path("sem-4096", CorpusId::AoChildes);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "dog ANIMAL\ncat ANIMAL\n\nspoon UTENSIL\n").unwrap();

        let probe2cat = files.load_probe2cat("sem-4096", CorpusId::AoChildes).unwrap();
        assert_eq!(probe2cat.len(), 3);
        assert_eq!(probe2cat["spoon"], "UTENSIL");
    }

    #[test]
    fn test_whitespace_tokens_keep_order() {
        let tokens = whitespace_tokens(&[" look  at\tthe dog ", "", "ran"]);
        assert_eq!(tokens, vec!["look", "at", "the", "dog", "ran"]);
    }

    #[test]
    fn test_malformed_probe_line() {
        let err = parse_probe2cat("dog ANIMAL\ncat\n", Path::new("x.txt")).unwrap_err();
        assert!(matches!(err, RnnLmError::ProbeLoad { reason, .. } if reason.starts_with("line 2")));
    }
}

use std::collections::{BTreeSet, HashMap};

use crate::errors::{Result, RnnLmError};

/// Bijective mapping between token strings and integer ids
///
/// Ids follow the sorted order of the distinct tokens, so two vocabularies
/// built from the same set of types are identical.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vocab {
    id_to_token: Vec<String>,
    token_to_id: HashMap<String, usize>,
}

impl Vocab {
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let types: BTreeSet<&str> = tokens.iter().map(AsRef::as_ref).collect();
        let id_to_token: Vec<String> = types.into_iter().map(str::to_string).collect();
        let token_to_id = id_to_token
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id))
            .collect();

        Self { id_to_token, token_to_id }
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.id_to_token.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    pub fn token2id(&self) -> &HashMap<String, usize> {
        &self.token_to_id
    }

    /// Map tokens to ids; a token outside the vocabulary is an error.
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<usize>> {
        tokens
            .iter()
            .map(|token| {
                let token = token.as_ref();
                self.id(token)
                    .ok_or_else(|| RnnLmError::UnknownToken(token.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_sorted_types() {
        let vocab = Vocab::from_tokens(&["the", "dog", "the", "cat"]);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.id("cat"), Some(0));
        assert_eq!(vocab.id("dog"), Some(1));
        assert_eq!(vocab.id("the"), Some(2));
        assert_eq!(vocab.token(1), Some("dog"));
    }

    #[test]
    fn test_same_types_same_vocab() {
        let a = Vocab::from_tokens(&["b", "a", "c"]);
        let b = Vocab::from_tokens(&["c", "c", "a", "b"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_unknown_token() {
        let vocab = Vocab::from_tokens(&["a", "b"]);
        assert_eq!(vocab.encode(&["b", "a"]).unwrap(), vec![1, 0]);
        assert!(matches!(vocab.encode(&["z"]), Err(RnnLmError::UnknownToken(t)) if t == "z"));
    }
}

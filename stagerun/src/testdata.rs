//! Random lorem-ipsum content for article fields.

use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "ad", "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi",
    "aliquip", "ex", "ea", "commodo", "consequat", "duis", "aute", "irure", "in", "reprehenderit",
    "voluptate", "velit", "esse", "cillum", "fugiat", "nulla", "pariatur", "excepteur", "sint",
    "occaecat", "cupidatat", "non", "proident", "sunt", "culpa", "qui", "officia", "deserunt",
    "mollit", "anim", "id", "est", "laborum",
];

/// The kind of text field to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestDataKind {
    /// A three-word sentence.
    Title,
    /// A five-word sentence.
    Description,
    /// A paragraph of ten sentences.
    Body,
}

/// Requested a kind of test data that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown test data type: {0}")]
pub struct UnknownTestDataKind(pub String);

impl FromStr for TestDataKind {
    type Err = UnknownTestDataKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "title" => Ok(Self::Title),
            "description" => Ok(Self::Description),
            "body" => Ok(Self::Body),
            _ => Err(UnknownTestDataKind(s.to_string())),
        }
    }
}

impl fmt::Display for TestDataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Body => "body",
        })
    }
}

impl TestDataKind {
    /// Generates text of this kind from `rng`.
    pub fn generate<R: Rng + ?Sized>(self, rng: &mut R) -> String {
        match self {
            Self::Title => sentence(rng, 3),
            Self::Description => sentence(rng, 5),
            Self::Body => (0..10)
                .map(|_| {
                    let words = rng.gen_range(4..=12);
                    sentence(rng, words)
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Generates a title, description or body with the thread-local RNG.
///
/// The kind is matched case-insensitively.
pub fn generate_test_data(kind: &str) -> Result<String, UnknownTestDataKind> {
    let kind: TestDataKind = kind.parse()?;
    Ok(kind.generate(&mut rand::thread_rng()))
}

fn sentence<R: Rng + ?Sized>(rng: &mut R, words: usize) -> String {
    let text = (0..words)
        .filter_map(|_| WORDS.choose(rng).copied())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}.", capitalize(&text))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_kinds_have_expected_shape() {
        let mut rng = StdRng::seed_from_u64(7);

        let title = TestDataKind::Title.generate(&mut rng);
        assert_eq!(title.split_whitespace().count(), 3);
        assert!(title.ends_with('.'));
        assert!(title.chars().next().unwrap().is_uppercase());

        let description = TestDataKind::Description.generate(&mut rng);
        assert_eq!(description.split_whitespace().count(), 5);

        let body = TestDataKind::Body.generate(&mut rng);
        assert_eq!(body.matches('.').count(), 10);
    }

    #[test]
    fn test_kind_is_case_insensitive() {
        assert!(generate_test_data("TITLE").is_ok());
        assert!(generate_test_data("Body").is_ok());
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let err = generate_test_data("tags").unwrap_err();
        assert_eq!(err.to_string(), "Unknown test data type: tags");
    }

    #[test]
    fn test_seeded_generation_is_repeatable() {
        let a = TestDataKind::Title.generate(&mut StdRng::seed_from_u64(42));
        let b = TestDataKind::Title.generate(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}

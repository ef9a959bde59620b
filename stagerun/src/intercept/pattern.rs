//! URL matchers for interception rules.

use crate::errors::InterceptError;
use regex::Regex;
use std::fmt;

/// Matches request URLs.
///
/// Glob syntax follows browser-harness routing: `*` matches any run of
/// characters except `/`, `**` matches anything including `/`, `**/` may
/// match nothing, `{a,b}` is an alternation. `?` is literal so query strings
/// can be written verbatim.
#[derive(Clone)]
pub enum UrlPattern {
    /// A compiled glob.
    Glob {
        /// The original glob.
        source: String,
        /// The equivalent anchored regex.
        regex: Regex,
    },
    /// An unanchored regular expression.
    Regex(Regex),
    /// An exact URL.
    Exact(String),
}

impl UrlPattern {
    /// Compiles a glob pattern.
    pub fn glob(pattern: &str) -> Result<Self, InterceptError> {
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|err| {
            InterceptError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self::Glob {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Compiles a regular expression pattern.
    pub fn regex(pattern: &str) -> Result<Self, InterceptError> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|err| InterceptError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })
    }

    /// Matches exactly one URL.
    #[must_use]
    pub fn exact(url: impl Into<String>) -> Self {
        Self::Exact(url.into())
    }

    /// Returns true if `url` matches.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Glob { regex, .. } | Self::Regex(regex) => regex.is_match(url),
            Self::Exact(expected) => expected == url,
        }
    }

    /// Returns the pattern source for diagnostics.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Glob { source, .. } => source,
            Self::Regex(regex) => regex.as_str(),
            Self::Exact(url) => url,
        }
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob { source, .. } => write!(f, "Glob({source:?})"),
            Self::Regex(regex) => write!(f, "Regex({:?})", regex.as_str()),
            Self::Exact(url) => write!(f, "Exact({url:?})"),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for UrlPattern {
    type Error = InterceptError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::glob(value)
    }
}

fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut in_group = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                let double = chars.get(i + 1) == Some(&'*');
                if double {
                    if chars.get(i + 2) == Some(&'/') {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                    continue;
                }
                out.push_str("[^/]*");
            }
            '{' => {
                in_group = true;
                out.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_star_prefix() {
        let pattern = UrlPattern::glob("**/api/tags").unwrap();
        assert!(pattern.matches("https://conduit-api.test/api/tags"));
        assert!(!pattern.matches("https://conduit-api.test/api/tags/extra"));
        assert!(!pattern.matches("https://conduit-api.test/api/tagsx"));
    }

    #[test]
    fn test_trailing_star_covers_query() {
        let pattern = UrlPattern::glob("**/api/articles*").unwrap();
        assert!(pattern.matches("https://api.test/api/articles?limit=10&offset=0"));
        assert!(pattern.matches("https://api.test/api/articles"));
        assert!(!pattern.matches("https://api.test/api/articles/my-slug"));
    }

    #[test]
    fn test_scheme_star_prefix() {
        let pattern = UrlPattern::glob("*/**/api/tags").unwrap();
        assert!(pattern.matches("https://api.realworld.io/api/tags"));
    }

    #[test]
    fn test_alternation_and_literals() {
        let pattern = UrlPattern::glob("https://api.test/api/{tags,articles}").unwrap();
        assert!(pattern.matches("https://api.test/api/tags"));
        assert!(pattern.matches("https://api.test/api/articles"));
        assert!(!pattern.matches("https://apixtest/api/tags"));
    }

    #[test]
    fn test_regex_and_exact() {
        let regex = UrlPattern::regex(r"/api/articles/[^/]+/favorite$").unwrap();
        assert!(regex.matches("https://api.test/api/articles/s1/favorite"));

        let exact = UrlPattern::exact("https://api.test/api/articles/");
        assert!(exact.matches("https://api.test/api/articles/"));
        assert!(!exact.matches("https://api.test/api/articles"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = UrlPattern::regex("(unclosed").unwrap_err();
        assert!(matches!(err, InterceptError::InvalidPattern { .. }));
    }
}

//! Wire types of the conduit backend API.

use serde::{Deserialize, Serialize};

/// Author profile embedded in articles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Username.
    pub username: String,
    /// Biography.
    #[serde(default)]
    pub bio: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Whether the caller follows this user.
    #[serde(default)]
    pub following: bool,
}

/// An article as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// URL-safe identifier.
    pub slug: String,
    /// Title.
    pub title: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Markdown body.
    #[serde(default)]
    pub body: String,
    /// Tags.
    #[serde(default)]
    pub tag_list: Vec<String>,
    /// Whether the caller favorited it.
    #[serde(default)]
    pub favorited: bool,
    /// Number of favorites.
    #[serde(default)]
    pub favorites_count: u64,
    /// Author.
    #[serde(default)]
    pub author: Profile,
}

/// Payload for creating an article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    /// Title.
    pub title: String,
    /// Short description.
    pub description: String,
    /// Markdown body.
    pub body: String,
    /// Tags.
    #[serde(default)]
    pub tag_list: Vec<String>,
}

impl NewArticle {
    /// Creates an untagged article payload.
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            body: body.into(),
            tag_list: Vec::new(),
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_list.push(tag.into());
        self
    }
}

/// Fields changed by an article update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleUpdate {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// `{"article": ...}` wrapper used by requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleEnvelope<T> {
    /// The wrapped article.
    pub article: T,
}

/// A page of articles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleList {
    /// Articles on this page.
    pub articles: Vec<Article>,
    /// Total matching articles.
    #[serde(default)]
    pub articles_count: u64,
}

impl ArticleList {
    /// Returns true if any article has `title`.
    #[must_use]
    pub fn contains_title(&self, title: &str) -> bool {
        self.articles.iter().any(|article| article.title == title)
    }
}

/// Filters for listing articles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleQuery {
    /// Only articles with this tag.
    pub tag: Option<String>,
    /// Only articles by this author.
    pub author: Option<String>,
    /// Only articles favorited by this user.
    pub favorited: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
    /// Page offset.
    pub offset: Option<u32>,
}

impl ArticleQuery {
    /// The first page of `limit` articles.
    #[must_use]
    pub fn page(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(0),
            ..Self::default()
        }
    }

    pub(crate) fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(tag) = &self.tag {
            pairs.push(("tag", tag.clone()));
        }
        if let Some(author) = &self.author {
            pairs.push(("author", author.clone()));
        }
        if let Some(favorited) = &self.favorited {
            pairs.push(("favorited", favorited.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset", offset.to_string()));
        }
        pairs
    }
}

/// The tag cloud.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagList {
    /// Popular tags.
    pub tags: Vec<String>,
}

/// The logged-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Backend user id.
    #[serde(default)]
    pub id: Option<u64>,
    /// Email.
    pub email: String,
    /// Username.
    pub username: String,
    /// Biography.
    #[serde(default)]
    pub bio: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Session token.
    #[serde(default)]
    pub token: String,
}

/// Fields changed by a user update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    /// New email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// New biography.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// New avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// New password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `{"user": ...}` wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEnvelope<T> {
    /// The wrapped user.
    pub user: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_article_wire_names() {
        let raw = json!({
            "slug": "s1",
            "title": "T",
            "description": "D",
            "body": "B",
            "tagList": ["rust"],
            "favorited": true,
            "favoritesCount": 3,
            "author": {"username": "u", "bio": null, "image": null, "following": false}
        });
        let article: Article = serde_json::from_value(raw).unwrap();
        assert_eq!(article.tag_list, vec!["rust".to_string()]);
        assert_eq!(article.favorites_count, 3);
    }

    #[test]
    fn test_update_omits_unset_fields() {
        let update = ArticleUpdate {
            title: Some("new".to_string()),
            ..ArticleUpdate::default()
        };
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"title": "new"}));
    }

    #[test]
    fn test_query_pairs() {
        let query = ArticleQuery {
            tag: Some("rust".to_string()),
            ..ArticleQuery::page(10)
        };
        assert_eq!(
            query.to_pairs(),
            vec![
                ("tag", "rust".to_string()),
                ("limit", "10".to_string()),
                ("offset", "0".to_string())
            ]
        );
    }
}

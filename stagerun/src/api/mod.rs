//! Backend API access independent of any automation session.

mod auth;
mod client;
pub mod models;

pub use auth::{AuthToken, AuthTokenService, Credentials};
pub use client::ApiClient;
pub use models::{Article, ArticleList, ArticleQuery, ArticleUpdate, NewArticle, User, UserUpdate};

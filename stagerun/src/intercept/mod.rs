//! Per-session network interception.
//!
//! An [`InterceptionEngine`] holds an ordered list of [`InterceptRule`]s.
//! Each request issued by a session is matched against the list; the first
//! live rule decides whether the request is fulfilled with a fixed response,
//! forwarded and rewritten, or aborted. Unmatched requests go to the
//! [`Upstream`] untouched.

mod engine;
mod message;
mod pattern;
mod rule;
mod upstream;

pub use engine::{InterceptionEngine, ResponseWaiter, RuleHandle};
pub use message::{InterceptedRequest, InterceptedResponse, ResponseSource};
pub use pattern::UrlPattern;
pub use rule::{
    set_json_pointer, AbortReason, BodyTransform, InterceptRule, ResponseOverrides, RouteHandler,
    StaticResponse,
};
#[cfg(test)]
pub use upstream::MockUpstream;
pub use upstream::{HttpUpstream, Upstream};

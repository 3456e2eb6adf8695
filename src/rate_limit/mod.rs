//! Tiered Fixed-Window Rate Limiting
//!
//! Each identity is assigned one [`Tier`]; each tier grants `request_limit`
//! requests per `window_secs` fixed window. A denied check is an intended
//! rejection the caller turns into `429 Too Many Requests`, using
//! [`RateLimitHeaders`] for the response headers.
//!
//! # Usage
//!
//! ```ignore
//! let identity = Identity::from_client(&ClientInfo::anonymous(peer));
//! let decision = limiter.check(&identity).await;
//! if !decision.allowed {
//!     return too_many_requests(decision.headers.to_header_map());
//! }
//! ```

mod identity;
mod limiter;
mod tier;

pub use identity::{ClientInfo, Identity};
pub use limiter::{
    RateLimitConfig, RateLimitDecision, RateLimitHeaders, RateLimiter, HEADER_LIMIT,
    HEADER_REMAINING, HEADER_RESET,
};
pub use tier::{Tier, TierTable};

//! Caching and state subsystems backing the filter chain

pub mod bots;
pub mod country;
pub mod session;
pub mod tiered;

pub use bots::BotRegistry;
pub use country::CountryResolver;
pub use session::SessionStore;
pub use tiered::{CacheRecord, RedisTier, RemoteTier, TieredCache};

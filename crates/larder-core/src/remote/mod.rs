//! Remote source adapters.
//!
//! A `RemoteSource` is the authority the cache reconciles against. It is a
//! pure transport adapter: no caching, retry, or deduplication happens here.

pub mod http;
pub mod source;

pub use http::HttpRemoteSource;
pub use source::RemoteSource;

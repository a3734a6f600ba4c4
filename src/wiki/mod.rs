//! Wiki access: the API contract, the HTTP client and pool, the change
//! stream reader and wikitext scanning helpers.

pub mod api;
pub mod http;
pub mod pool;
pub mod stream;
pub mod text;

pub use api::{
    AbuseFilterHit, ChangeEvent, Page, Revision, SaveOptions, StreamSubscription, UserInfo,
    WikiApi,
};
pub use http::{Credentials, HttpWiki, HttpWikiConfig};
pub use pool::{WikiPool, dbname};
pub use stream::ChangeStream;

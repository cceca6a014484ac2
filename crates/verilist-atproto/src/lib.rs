//! AT Protocol adapters for the engine's collaborator traits.
//!
//! - [`BskyAgent`]: session, posts, list items, profile lookups and chat DMs
//! - [`ConstellationIndex`]: the backlink index behind the dedup oracle
//! - [`PdsResolver`] and [`RepoLister`]: paginated `listRecords` for backfill

mod agent;
mod constellation;
mod error;
mod lister;
mod resolver;
mod xrpc;

pub use agent::{
    list_item_record, post_record, BskyAgent, Credentials, Session, DEFAULT_CHAT_PROXY,
};
pub use constellation::ConstellationIndex;
pub use error::{ResolveError, XrpcError};
pub use lister::RepoLister;
pub use resolver::{PdsResolver, DEFAULT_PLC_DIRECTORY};
pub use xrpc::{build_http_client, CallOptions, XrpcClient, PROXY_HEADER, USER_AGENT};

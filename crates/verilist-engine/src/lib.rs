//! Event processing and idempotent fan-out for verification events.
//!
//! The engine turns an at-least-once stream of [`VerificationEvent`]s into
//! at-most-once side effects:
//!
//! ```text
//! EventSource → FanoutExecutor ─┬─ Ledger        (local, authoritative once populated)
//!                               ├─ Oracle        (remote backlink index, fails open)
//!                               ├─ SocialClient  (posts, list items, DMs; rate-limited)
//!                               └─ Ledger write
//!             → CheckpointStore (stream mode, only after the event is complete)
//! ```
//!
//! Everything that talks to the network sits behind the traits in
//! [`collaborator`], so the executor and both pipelines run against
//! in-memory fakes in tests.
//!
//! [`VerificationEvent`]: verilist_types::VerificationEvent

pub mod collaborator;
pub mod directory;
pub mod error;
pub mod executor;
pub mod handles;
pub mod messages;
pub mod oracle;
pub mod pipeline;
pub mod rate;
pub mod shutdown;
pub mod source;

pub use collaborator::{LinkIndex, ListedRecord, RecordLister, RecordPage, SocialClient};
pub use directory::VerifierDirectory;
pub use error::{EffectError, RemoteError, SourceError};
pub use executor::{EventOutcome, ExecutorSettings, FanoutExecutor, SinkOutcome, SinkReport};
pub use handles::HandleCache;
pub use oracle::Oracle;
pub use pipeline::{run_backfill, run_stream, BackfillSettings, StreamSummary, VerifierReport};
pub use rate::{CallClass, Pacing, RateController};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use source::{Cursor, EventSource, SourcedEvent, VerificationRecord};

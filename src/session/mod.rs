//! Identity-bound sessions, secondary indexing, and offline queueing.

pub mod identity;
pub mod index;
pub mod offline;
pub mod session;
pub mod store;

pub use identity::{ClientIdentity, TOKEN_LEN};
pub use index::GenericIndex;
pub use offline::{OfflineError, OfflineLimits};
pub use session::{FieldValue, FromField, Session, SessionStatus};
pub use store::SessionStore;

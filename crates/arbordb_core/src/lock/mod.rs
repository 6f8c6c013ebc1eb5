//! Advisory document locks for client protocols.
//!
//! Locks follow the WebDAV model: exclusive write locks identified by
//! `opaquelocktoken:` URIs, with `Infinite` or `Second-n` timeouts. They
//! are independent of transactions; the pipeline only consults them for
//! requests made on behalf of a client principal.

mod clock;
mod table;
mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use table::DocumentLockTable;
pub use token::{LockScope, LockTimeout, LockToken, TOKEN_SCHEME};

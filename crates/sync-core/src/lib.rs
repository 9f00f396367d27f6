//! Shared core of the remote synchronization protocol: the framed
//! connection (C1), the PAID template/index registry (C2), the XDR codec
//! (C3), the `Value` data model, the wire message enum, and the backing
//! store interface. `sync-client` and `sync-server` build C4/C5 on top of
//! this crate.

pub mod error;
pub mod framed;
pub mod ids;
pub mod message;
pub mod paid;
pub mod store;
pub mod value;
pub mod xdr;

pub use error::{Result, SyncError};
pub use ids::{ChildType, ElementIdent, IndexEntry, IndexId, TemplateEntry, TemplateId};
pub use message::{DefItem, Envelope, MarshalledElement, Message};
pub use paid::{PaidLookup, PaidRegistry, ServerPaidRegistry};
pub use store::{BackingStore, StoredElement};
pub use value::{AttributeMap, Number, SortDirection, SubstringTerm, Value};
pub use xdr::XdrCodec;

//! Client-side normalized graph cache.
//!
//! Responses are flattened by the [`QueryWriter`] into a layered
//! [`RecordStore`]; [`StoreData`] owns the layers together with the garbage
//! collector and the deferred query tracker.

pub mod change;
pub mod deferred;
pub mod gc;
pub mod query;
pub mod store;
pub mod store_data;
pub mod writer;

pub use change::{ChangeSet, ChangeTracker};
pub use deferred::{DeferredQueryTracker, FragmentListener, QueryStatus, RefParams, Subscription, TrackerKey};
pub use gc::GarbageCollector;
pub use query::{Field, FieldKind, Fragment, FragmentId, QueryId, RefParam, RootArg, RootCall, RootQuery, Selection};
pub use store::{EdgeRef, MutationId, RangeMetadata, RecordStore, StoreLayers, StoreView};
pub use store_data::{ChangeEmitter, StoreData};
pub use writer::{QueryWriter, WriterOptions};

pub mod frame;
pub mod query;
pub mod response;

// Re-export the types the executor surface is built from
pub use frame::{canonical_labels, Field, FieldValues, Frame, FrameMeta};
pub use query::{DataQuery, Query, QueryDataRequest, QueryKind, QueryModel, TimeRange};

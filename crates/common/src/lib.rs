//! Shared building blocks for the Conduit execution gateway.
//!
//! - **Configuration**: typed gateway configuration (`config`).
//! - **Models**: inbound operation requests and cache directives (`models`).
//! - **Values**: the closed scalar set and normalized row sets (`value`, `rowset`).
//! - **Logging**: subscriber setup and query-text scrubbing (`telemetry`, `scrubber`).
pub mod config;
pub mod models;
pub mod rowset;
pub mod scrubber;
pub mod telemetry;
pub mod value;

pub use models::{CacheDirective, Operation, OperationKind, OperationRequest, ParameterMap};
pub use rowset::{OrderedRow, Row, RowSet, RowWidthMismatch};
pub use value::{ScalarKind, ScalarValue};

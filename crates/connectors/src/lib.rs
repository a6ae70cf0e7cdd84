//! Engine adapters for the Conduit execution gateway.
//!
//! The gateway hands each operation to an [`engine::Engine`] after its parameters have
//! been through the [`binder::ParameterBinder`]. Engines return rows through a
//! [`engine::RowCursor`] that [`normalize::normalize`] turns into a `RowSet`.

pub mod binder;
pub mod engine;
pub mod normalize;
pub mod sources;

pub use binder::{BindError, BoundParameter, BoundParameters, IdentifierRules, ParameterBinder};
pub use engine::{
    BoundOperation, BufferedCursor, Engine, PoolStatus, RowCursor, Session, SqlConnection,
    SqlPool, Statement,
};
pub use normalize::normalize;
pub use sources::build_engine;

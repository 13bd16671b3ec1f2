//! Physical table layout model.
//!
//! [`TableSnapshot`] captures a table's current layout as reported by
//! the external metadata provider; [`TargetConfiguration`] is the
//! operator-supplied desired layout. Both are immutable once built.

mod table;
mod target;

pub use table::{
    ColumnDesc, ConstraintDesc, ConstraintKind, GrantDesc, IndexDesc, PartitionDesc,
    PartitionType, SubpartitionType, TableSnapshot,
};
pub use target::{IntervalUnit, TargetConfiguration, TargetError};

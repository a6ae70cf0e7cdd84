use crate::engine::RowCursor;
use conduit_common::RowSet;
use conduit_error::{ErrorCode, GatewayError, Result};

/// Drain a cursor into a [`RowSet`], keeping the cursor's column order.
///
/// A row whose width disagrees with the declared columns means the driver broke
/// its contract; it is reported as an internal error, never patched up.
pub async fn normalize(cursor: &mut dyn RowCursor) -> Result<RowSet> {
    let mut set = RowSet::new(cursor.columns().to_vec());

    while let Some(values) = cursor.next_row().await? {
        if let Err(mismatch) = set.push_row(values) {
            tracing::error!(
                target: "gateway",
                row = mismatch.row,
                expected = mismatch.expected,
                actual = mismatch.actual,
                "Driver returned a row that does not match its column list"
            );
            return Err(GatewayError::new(
                ErrorCode::DriverContractViolation,
                mismatch.to_string(),
            ));
        }
    }

    Ok(set)
}

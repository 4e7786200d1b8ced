//! Contract error classification.
//!
//! Turns an `alloy::contract::Error` into an [`EvmError`], decoding
//! standard `Error(string)` / `Panic(uint256)` revert payloads into a
//! readable reason and separating reverts that carry no data at all.

use alloy::primitives::Address;
use alloy::sol_types::decode_revert_reason;
use tracing::debug;

use crate::EvmError;

/// Classifies a contract error raised by a call against `contract`.
///
/// - revert with empty data → [`EvmError::EmptyRevert`]
/// - revert with decodable data → [`EvmError::Revert`]
/// - anything else → [`EvmError::Contract`]
pub fn classify_contract_error(contract: Address, err: alloy::contract::Error) -> EvmError {
    let Some(revert_data) = err.as_revert_data() else {
        return EvmError::Contract(err);
    };

    if revert_data.is_empty() {
        return EvmError::EmptyRevert { contract };
    }

    if let Some(reason) = decode_revert_reason(revert_data.as_ref()) {
        return EvmError::Revert { contract, reason };
    }

    debug!(%contract, "Failed to decode revert data");
    EvmError::Contract(err)
}

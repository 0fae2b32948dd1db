use alloy_primitives::{Address, B256, Bytes};
use alloy_rpc_types_eth::Log;
use serde::{Deserialize, Serialize};

use crate::models::errors::DataError;
use crate::utils::codec::decode_hex;

////////////////////////////////////// RPC Data ////////////////////////////////////////
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventLog {
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub removed: bool,
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl TryFrom<Log> for RawEventLog {
    type Error = DataError;

    // Pending logs carry no position, so they cannot be given an identity
    fn try_from(log: Log) -> Result<Self, Self::Error> {
        Ok(Self {
            block_number: log.block_number.ok_or(DataError::MissingField {
                field: "blockNumber",
            })?,
            tx_index: log.transaction_index.ok_or(DataError::MissingField {
                field: "transactionIndex",
            })?,
            log_index: log
                .log_index
                .ok_or(DataError::MissingField { field: "logIndex" })?,
            removed: log.removed,
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data,
        })
    }
}

/////////////////////////////////// Stored Data ///////////////////////////////////
/// A 32-byte word as a non-negative decimal number in normalized form.
///
/// `c` holds the significant digits in base 10^14 limbs (most significant first,
/// no trailing zero limbs) and `e` is the decimal exponent of the leading digit.
/// There is no sign: every encoded word is non-negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedArg {
    pub c: Vec<u64>,
    pub e: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub block_number: u64,
    pub tx_index: u64,
    #[serde(rename = "log_index")]
    pub index: u64,
    pub removed: bool,
    pub address: Address,
    pub signature: Option<B256>,
    pub args: Vec<EncodedArg>,
    pub data_index_start: Option<u32>,
}

impl LogRecord {
    /// Arguments as `0x`-prefixed 64-character hex strings.
    pub fn decoded_args(&self) -> Result<Vec<String>, DataError> {
        self.args.iter().map(decode_hex).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::LogData;

    fn rpc_log(block_number: Option<u64>) -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: Address::repeat_byte(0x42),
                data: LogData::new_unchecked(
                    vec![B256::repeat_byte(1), B256::repeat_byte(2)],
                    Bytes::from(vec![0u8; 32]),
                ),
            },
            block_number,
            transaction_index: Some(2),
            log_index: Some(1),
            removed: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_rpc_log() {
        let raw = RawEventLog::try_from(rpc_log(Some(5))).unwrap();
        assert_eq!(raw.block_number, 5);
        assert_eq!(raw.tx_index, 2);
        assert_eq!(raw.log_index, 1);
        assert!(raw.removed);
        assert_eq!(raw.address, Address::repeat_byte(0x42));
        assert_eq!(raw.topics, vec![B256::repeat_byte(1), B256::repeat_byte(2)]);
        assert_eq!(raw.data.len(), 32);
    }

    #[test]
    fn test_pending_log_is_rejected() {
        assert_eq!(
            RawEventLog::try_from(rpc_log(None)),
            Err(DataError::MissingField {
                field: "blockNumber"
            })
        );
    }
}

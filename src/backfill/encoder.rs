use alloy_primitives::{B256, hex, keccak256};

use crate::models::errors::DataError;
use crate::models::logs::{LogRecord, RawEventLog};
use crate::utils::codec::encode_word;

const WORD_BYTES: usize = 32;

/// Identity of a log: keccak256 over `"{block}x{tx}x{log}"`, hex without prefix.
pub fn log_id(block_number: u64, tx_index: u64, log_index: u64) -> String {
    hex::encode(keccak256(format!("{block_number}x{tx_index}x{log_index}")))
}

/// Split a payload into 32-byte words. A trailing partial word is an error.
pub fn chunk_payload(data: &[u8]) -> Result<Vec<B256>, DataError> {
    if data.len() % WORD_BYTES != 0 {
        return Err(DataError::PayloadNotAligned {
            hex_len: data.len() * 2,
        });
    }
    Ok(data.chunks_exact(WORD_BYTES).map(B256::from_slice).collect())
}

pub trait LogEncoder {
    fn encode(self) -> Result<LogRecord, DataError>;
}

impl LogEncoder for RawEventLog {
    fn encode(self) -> Result<LogRecord, DataError> {
        let payload = chunk_payload(&self.data)?;
        let (signature, indexed) = match self.topics.split_first() {
            Some((signature, indexed)) => (Some(*signature), indexed),
            None => (None, &[][..]),
        };

        let data_index_start = (!indexed.is_empty() && !payload.is_empty())
            .then_some(indexed.len() as u32);
        let args = indexed
            .iter()
            .chain(payload.iter())
            .map(encode_word)
            .collect();

        Ok(LogRecord {
            id: log_id(self.block_number, self.tx_index, self.log_index),
            block_number: self.block_number,
            tx_index: self.tx_index,
            index: self.log_index,
            removed: self.removed,
            address: self.address,
            signature,
            args,
            data_index_start,
        })
    }
}

/// Encode one window's logs, failing on the first malformed log.
pub fn encode_logs(logs: Vec<RawEventLog>) -> Result<Vec<LogRecord>, (u64, DataError)> {
    logs.into_iter()
        .map(|log| {
            let block_number = log.block_number;
            log.encode().map_err(|e| (block_number, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};

    fn raw_log(topics: Vec<B256>, data: Vec<u8>) -> RawEventLog {
        RawEventLog {
            block_number: 5,
            tx_index: 2,
            log_index: 1,
            removed: false,
            address: Address::repeat_byte(0x11),
            topics,
            data: Bytes::from(data),
        }
    }

    #[test]
    fn test_log_id_is_deterministic() {
        assert_eq!(log_id(5, 2, 1), log_id(5, 2, 1));
        assert_eq!(log_id(5, 2, 1).len(), 64);
        assert_ne!(log_id(5, 2, 1), log_id(6, 2, 1));
        assert_ne!(log_id(5, 2, 1), log_id(5, 3, 1));
        assert_ne!(log_id(5, 2, 1), log_id(5, 2, 2));
        // The separator keeps digit runs apart
        assert_ne!(log_id(1, 11, 1), log_id(11, 1, 1));
    }

    #[test]
    fn test_chunk_payload_boundaries() {
        for k in 0..4 {
            let chunks = chunk_payload(&vec![0xab; WORD_BYTES * k]).unwrap();
            assert_eq!(chunks.len(), k);
        }
        assert_eq!(
            chunk_payload(&[0u8; 33]),
            Err(DataError::PayloadNotAligned { hex_len: 66 })
        );
        assert_eq!(
            chunk_payload(&[0u8; 31]),
            Err(DataError::PayloadNotAligned { hex_len: 62 })
        );
    }

    #[test]
    fn test_encode_topics_and_payload() {
        let signature = B256::repeat_byte(0xdd);
        let from = B256::left_padding_from(&[0xaa; 20]);
        let to = B256::left_padding_from(&[0xbb; 20]);
        let mut data = vec![0u8; 64];
        data[31] = 7;
        data[63] = 9;

        let record = raw_log(vec![signature, from, to], data).encode().unwrap();

        assert_eq!(record.id, log_id(5, 2, 1));
        assert_eq!(record.signature, Some(signature));
        assert_eq!(record.args.len(), 4);
        assert_eq!(record.data_index_start, Some(2));
        let decoded = record.decoded_args().unwrap();
        assert_eq!(decoded[0], hex::encode_prefixed(from));
        assert_eq!(decoded[1], hex::encode_prefixed(to));
        assert_eq!(decoded[2], hex::encode_prefixed(B256::with_last_byte(7)));
        assert_eq!(decoded[3], hex::encode_prefixed(B256::with_last_byte(9)));
    }

    #[test]
    fn test_data_index_start_needs_both_sides() {
        let signature = B256::repeat_byte(0xdd);

        let only_signature = raw_log(vec![signature], vec![1u8; 32]).encode().unwrap();
        assert_eq!(only_signature.args.len(), 1);
        assert_eq!(only_signature.data_index_start, None);

        let no_payload = raw_log(vec![signature, B256::ZERO], vec![]).encode().unwrap();
        assert_eq!(no_payload.args.len(), 1);
        assert_eq!(no_payload.data_index_start, None);

        let anonymous = raw_log(vec![], vec![]).encode().unwrap();
        assert_eq!(anonymous.signature, None);
        assert!(anonymous.args.is_empty());
        assert_eq!(anonymous.data_index_start, None);
    }

    #[test]
    fn test_misaligned_payload_is_surfaced() {
        let logs = vec![
            raw_log(vec![B256::ZERO], vec![0u8; 32]),
            RawEventLog {
                block_number: 9,
                ..raw_log(vec![B256::ZERO], vec![0u8; 40])
            },
        ];
        let (block, err) = encode_logs(logs).unwrap_err();
        assert_eq!(block, 9);
        assert_eq!(err, DataError::PayloadNotAligned { hex_len: 80 });
    }
}

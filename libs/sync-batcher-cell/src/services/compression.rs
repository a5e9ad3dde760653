use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::io::{Read, Write};
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{BatchEnvelope, BatchOperation, PayloadEncoding, SyncBatch};

/// Serialize operations into a wire batch. Bodies larger than `threshold`
/// bytes are bzip2-compressed; smaller ones go out as plain JSON.
pub fn encode_batch(operations: Vec<BatchOperation>, threshold: usize) -> Result<SyncBatch, SyncError> {
    let envelope = BatchEnvelope {
        batch_id: Uuid::new_v4(),
        operations,
    };

    let raw = serde_json::to_vec(&envelope)?;
    let raw_size = raw.len();

    let (body, encoding) = if raw_size > threshold {
        let mut encoder = BzEncoder::new(Vec::with_capacity(raw_size / 4), Compression::default());
        encoder.write_all(&raw)?;
        (encoder.finish()?, PayloadEncoding::Bzip2)
    } else {
        (raw, PayloadEncoding::Identity)
    };

    Ok(SyncBatch {
        batch_id: envelope.batch_id,
        operations: envelope.operations,
        body,
        encoding,
        raw_size,
    })
}

/// Inverse of [`encode_batch`], used by stores that receive the raw body
pub fn decode_batch(body: &[u8], encoding: PayloadEncoding) -> Result<BatchEnvelope, SyncError> {
    let envelope = match encoding {
        PayloadEncoding::Identity => serde_json::from_slice(body)?,
        PayloadEncoding::Bzip2 => {
            let mut raw = Vec::new();
            BzDecoder::new(body).read_to_end(&mut raw)?;
            serde_json::from_slice(&raw)?
        }
    };
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observations(count: usize) -> Vec<BatchOperation> {
        (0..count)
            .map(|i| {
                BatchOperation::update(
                    "Observation",
                    &format!("obs-{}", i),
                    json!({ "code": "8867-4", "value": 72 + i, "unit": "beats/min" }),
                )
            })
            .collect()
    }

    #[test]
    fn small_batch_stays_plain_json() {
        let batch = encode_batch(observations(1), 4096).unwrap();

        assert_eq!(batch.encoding, PayloadEncoding::Identity);
        assert_eq!(batch.body.len(), batch.raw_size);
    }

    #[test]
    fn large_batch_is_compressed_and_decodes_back() {
        let operations = observations(200);
        let batch = encode_batch(operations.clone(), 4096).unwrap();

        assert_eq!(batch.encoding, PayloadEncoding::Bzip2);
        assert!(batch.body.len() < batch.raw_size);

        let envelope = decode_batch(&batch.body, batch.encoding).unwrap();
        assert_eq!(envelope.batch_id, batch.batch_id);
        assert_eq!(envelope.operations, operations);
    }

    #[test]
    fn threshold_is_exclusive() {
        let plain = encode_batch(observations(3), usize::MAX).unwrap();
        let at_threshold = encode_batch(observations(3), plain.raw_size).unwrap();

        assert_eq!(at_threshold.encoding, PayloadEncoding::Identity);
    }
}

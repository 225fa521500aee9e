//! Account record encoding
//!
//! ```text
//! CoordinatorConfig:
//! [disc:8][authority:32][min_batch_size:1][max_batch_size:1][next_batch_id:8 LE]
//!
//! LedgerBatch:
//! [disc:8][id:8 LE][status:1][fingerprint_count:1]
//! [n:4 LE][fingerprint:32]*n
//! [m:4 LE][submitter:32]*m
//! [created_at:8 LE signed]
//! [flag:1]([finalized_at:8 LE signed])
//! [flag:1]([results_hash:32])
//! ```
//!
//! Bytes past the last field are ignored; the ledger allocates accounts at
//! their maximum size.

use super::{discriminators, put_vec32, ByteReader, CodecError};
use crate::hashing::QueryHash;
use crate::state::{BatchStatus, CoordinatorConfig, LedgerBatch, Pubkey};

/// `fingerprint_count` is a single byte, so no vector can be longer
const MAX_VECTOR_LEN: usize = u8::MAX as usize;

/// A record stored in a ledger account
pub trait AccountRecord: Sized {
    /// Name used in decode errors
    const NAME: &'static str;

    /// Type tag preceding the record body
    const DISCRIMINATOR: [u8; 8];

    /// Append the body (everything after the discriminator)
    fn encode_body(&self, out: &mut Vec<u8>);

    /// Read the body from a reader positioned after the discriminator
    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, CodecError>;

    /// Encode including the discriminator
    fn encode(&self) -> Vec<u8> {
        let mut out = Self::DISCRIMINATOR.to_vec();
        self.encode_body(&mut out);
        out
    }

    /// Decode, validating the discriminator first
    fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(data);
        reader.expect_discriminator(Self::NAME, Self::DISCRIMINATOR)?;
        Self::decode_body(&mut reader)
    }
}

impl AccountRecord for CoordinatorConfig {
    const NAME: &'static str = "CoordinatorConfig";
    const DISCRIMINATOR: [u8; 8] = discriminators::COORDINATOR_CONFIG;

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.authority.as_bytes());
        out.push(self.min_batch_size);
        out.push(self.max_batch_size);
        out.extend_from_slice(&self.next_batch_id.to_le_bytes());
    }

    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            authority: Pubkey(reader.read_array("authority")?),
            min_batch_size: reader.read_u8("min_batch_size")?,
            max_batch_size: reader.read_u8("max_batch_size")?,
            next_batch_id: reader.read_u64_le("next_batch_id")?,
        })
    }
}

impl AccountRecord for LedgerBatch {
    const NAME: &'static str = "LedgerBatch";
    const DISCRIMINATOR: [u8; 8] = discriminators::LEDGER_BATCH;

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_le_bytes());
        out.push(self.status.tag());
        out.push(self.fingerprint_count);
        put_vec32(out, self.fingerprints.iter().map(|fp| fp.as_bytes()));
        put_vec32(out, self.submitters.iter().map(|pk| pk.as_bytes()));
        out.extend_from_slice(&self.created_at.to_le_bytes());
        match self.finalized_at {
            Some(ts) => {
                out.push(1);
                out.extend_from_slice(&ts.to_le_bytes());
            }
            None => out.push(0),
        }
        match &self.results_hash {
            Some(hash) => {
                out.push(1);
                out.extend_from_slice(hash.as_bytes());
            }
            None => out.push(0),
        }
    }

    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let id = reader.read_u64_le("id")?;
        let tag = reader.read_u8("status")?;
        let status = BatchStatus::from_tag(tag).ok_or(CodecError::InvalidTag {
            field: "status",
            tag,
        })?;
        let fingerprint_count = reader.read_u8("fingerprint_count")?;
        let fingerprints = reader
            .read_vec32("fingerprints", MAX_VECTOR_LEN)?
            .into_iter()
            .map(QueryHash)
            .collect();
        let submitters = reader
            .read_vec32("submitters", MAX_VECTOR_LEN)?
            .into_iter()
            .map(Pubkey)
            .collect();
        let created_at = reader.read_i64_le("created_at")?;
        let finalized_at = if reader.read_flag("finalized_at")? {
            Some(reader.read_i64_le("finalized_at")?)
        } else {
            None
        };
        let results_hash = if reader.read_flag("results_hash")? {
            Some(QueryHash(reader.read_array("results_hash")?))
        } else {
            None
        };

        let batch = Self {
            id,
            status,
            fingerprint_count,
            fingerprints,
            submitters,
            created_at,
            finalized_at,
            results_hash,
        };
        batch.check_invariants().map_err(CodecError::Malformed)?;
        Ok(batch)
    }
}

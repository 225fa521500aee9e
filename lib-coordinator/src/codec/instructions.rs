//! Coordinator program instructions
//!
//! ```text
//! Initialize:    [disc:8][min_batch_size:1][max_batch_size:1]
//! CreateBatch:   [disc:8]
//! SubmitQuery:   [disc:8][batch_id:8 LE][fingerprint:32]
//! FinalizeBatch: [disc:8][batch_id:8 LE]
//! CompleteBatch: [disc:8][batch_id:8 LE][results_hash:32]
//! ```
//!
//! `CreateBatch` carries no id: the program assigns the coordinator's
//! current `next_batch_id`.

use super::{discriminators, ByteReader, CodecError, DISCRIMINATOR_SIZE};
use crate::hashing::QueryHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorInstruction {
    Initialize {
        min_batch_size: u8,
        max_batch_size: u8,
    },
    CreateBatch,
    SubmitQuery {
        batch_id: u64,
        fingerprint: QueryHash,
    },
    FinalizeBatch {
        batch_id: u64,
    },
    CompleteBatch {
        batch_id: u64,
        results_hash: QueryHash,
    },
}

impl CoordinatorInstruction {
    pub fn discriminator(&self) -> [u8; 8] {
        match self {
            CoordinatorInstruction::Initialize { .. } => discriminators::INITIALIZE,
            CoordinatorInstruction::CreateBatch => discriminators::CREATE_BATCH,
            CoordinatorInstruction::SubmitQuery { .. } => discriminators::SUBMIT_QUERY,
            CoordinatorInstruction::FinalizeBatch { .. } => discriminators::FINALIZE_BATCH,
            CoordinatorInstruction::CompleteBatch { .. } => discriminators::COMPLETE_BATCH,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorInstruction::Initialize { .. } => "initialize",
            CoordinatorInstruction::CreateBatch => "create_batch",
            CoordinatorInstruction::SubmitQuery { .. } => "submit_query",
            CoordinatorInstruction::FinalizeBatch { .. } => "finalize_batch",
            CoordinatorInstruction::CompleteBatch { .. } => "complete_batch",
        }
    }

    /// Batch the instruction targets, if it names one
    pub fn batch_id(&self) -> Option<u64> {
        match self {
            CoordinatorInstruction::SubmitQuery { batch_id, .. }
            | CoordinatorInstruction::FinalizeBatch { batch_id }
            | CoordinatorInstruction::CompleteBatch { batch_id, .. } => Some(*batch_id),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DISCRIMINATOR_SIZE + 40);
        out.extend_from_slice(&self.discriminator());
        match self {
            CoordinatorInstruction::Initialize {
                min_batch_size,
                max_batch_size,
            } => {
                out.push(*min_batch_size);
                out.push(*max_batch_size);
            }
            CoordinatorInstruction::CreateBatch => {}
            CoordinatorInstruction::SubmitQuery {
                batch_id,
                fingerprint,
            } => {
                out.extend_from_slice(&batch_id.to_le_bytes());
                out.extend_from_slice(fingerprint.as_bytes());
            }
            CoordinatorInstruction::FinalizeBatch { batch_id } => {
                out.extend_from_slice(&batch_id.to_le_bytes());
            }
            CoordinatorInstruction::CompleteBatch {
                batch_id,
                results_hash,
            } => {
                out.extend_from_slice(&batch_id.to_le_bytes());
                out.extend_from_slice(results_hash.as_bytes());
            }
        }
        out
    }

    /// Decode an instruction payload
    ///
    /// Unlike account records, instruction payloads are exact: trailing bytes
    /// are rejected.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(data);
        let disc = reader.read_array::<DISCRIMINATOR_SIZE>("discriminator")?;

        let instruction = match disc {
            discriminators::INITIALIZE => CoordinatorInstruction::Initialize {
                min_batch_size: reader.read_u8("min_batch_size")?,
                max_batch_size: reader.read_u8("max_batch_size")?,
            },
            discriminators::CREATE_BATCH => CoordinatorInstruction::CreateBatch,
            discriminators::SUBMIT_QUERY => CoordinatorInstruction::SubmitQuery {
                batch_id: reader.read_u64_le("batch_id")?,
                fingerprint: QueryHash(reader.read_array("fingerprint")?),
            },
            discriminators::FINALIZE_BATCH => CoordinatorInstruction::FinalizeBatch {
                batch_id: reader.read_u64_le("batch_id")?,
            },
            discriminators::COMPLETE_BATCH => CoordinatorInstruction::CompleteBatch {
                batch_id: reader.read_u64_le("batch_id")?,
                results_hash: QueryHash(reader.read_array("results_hash")?),
            },
            other => return Err(CodecError::UnknownInstruction(other)),
        };

        if reader.remaining() != 0 {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes after {}",
                reader.remaining(),
                instruction.name()
            )));
        }
        Ok(instruction)
    }
}

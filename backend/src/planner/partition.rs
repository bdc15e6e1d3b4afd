//! Balanced chunk planning.
//!
//! Deliberately pure: no async, no IO. The planner decides how many chunks
//! a job gets and which items land in which chunk; everything downstream
//! (queues, workers, progress) is sized by its output.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::job::model::TaskType;
use crate::planner::types::{ChunkPlan, PlannedChunk};

/// Compute a balanced partition of `n_items` into chunk sizes.
///
/// `chunk_size` is a target, not a hard cap. For `n_items > chunk_size`
/// the chunk count is fixed at `k = floor(n_items / chunk_size)` and the
/// remainder is spread over the first chunks, so every size is either
/// `floor(n/k)` or `ceil(n/k)` and sizes differ by at most one. The
/// `n = k * chunk_size + 1` boundary therefore yields k chunks, one of
/// them a single item over target, rather than a k+1-th chunk of size 1.
///
/// `n_items <= chunk_size` yields exactly one chunk, including the empty
/// one for `n_items == 0` (callers may short-circuit that case).
pub fn plan_sizes(n_items: usize, chunk_size: usize) -> Vec<usize> {
    let chunk_size = chunk_size.max(1);

    if n_items <= chunk_size {
        return vec![n_items];
    }

    let k = n_items / chunk_size;
    let base = n_items / k;
    let rem = n_items % k;

    (0..k)
        .map(|i| if i < rem { base + 1 } else { base })
        .collect()
}

/// Seed for the item scatter: SHA-256 over electionId and operation type.
///
/// Deterministic per (election, operation), so re-planning the same job
/// yields the same assignment, while chunk boundaries stay uncorrelated
/// with the order ballots were cast in.
pub fn shuffle_seed(election_id: &Uuid, op: TaskType) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(election_id.as_bytes());
    hasher.update(op.as_str().as_bytes());
    hasher.finalize().into()
}

/// Scatter `item_ids` across chunks of the given sizes.
///
/// Every input id lands in exactly one chunk; the union of chunks is a
/// permutation of the input.
pub fn assign_items(item_ids: &[Uuid], sizes: &[usize], seed: [u8; 32]) -> ChunkPlan {
    debug_assert_eq!(sizes.iter().sum::<usize>(), item_ids.len());

    let mut shuffled = item_ids.to_vec();
    let mut rng = StdRng::from_seed(seed);
    shuffled.shuffle(&mut rng);

    let mut chunks = Vec::with_capacity(sizes.len());
    let mut offset = 0usize;

    for (i, &size) in sizes.iter().enumerate() {
        chunks.push(PlannedChunk {
            chunk_number: i as u32,
            item_ids: shuffled[offset..offset + size].to_vec(),
        });
        offset += size;
    }

    ChunkPlan { chunks }
}

/// Convenience wrapper: sizes + scatter in one call.
pub fn plan(item_ids: &[Uuid], chunk_size: usize, seed: [u8; 32]) -> ChunkPlan {
    let sizes = plan_sizes(item_ids.len(), chunk_size);
    assign_items(item_ids, &sizes, seed)
}

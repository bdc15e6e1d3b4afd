use uuid::Uuid;

/// One planned chunk: its position within the job and the item ids
/// assigned to it. Sizes across a plan differ by at most one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedChunk {
    pub chunk_number: u32,
    pub item_ids: Vec<Uuid>,
}

/// Output of the planner for one job: an ordered, balanced partition of
/// the input items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<PlannedChunk>,
}

impl ChunkPlan {
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn total_items(&self) -> usize {
        self.chunks.iter().map(|c| c.item_ids.len()).sum()
    }
}

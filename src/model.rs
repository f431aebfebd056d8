use crate::dim::Dim;
use crate::instruction::DecodedInstruction;
use crate::WARP_SIZE;
use serde::{Deserialize, Serialize};

/// Active mask over all threads of a block.
///
/// Bit position is the linear thread index within the block.
pub type BlockActiveMask = bitvec::vec::BitVec<u32, bitvec::order::Lsb0>;

/// Information about a kernel launch.
///
/// Created once per launch and read-only afterwards.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub name: String,
    pub grid: Dim,
    pub block: Dim,
    pub num_registers: u32,
    pub shared_mem_bytes: u32,
}

impl KernelDescriptor {
    #[must_use]
    pub fn threads_per_block(&self) -> usize {
        self.block.size() as usize
    }

    #[must_use]
    pub fn num_warps_per_block(&self) -> usize {
        let threads = self.threads_per_block();
        (threads + WARP_SIZE - 1) / WARP_SIZE
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.grid.size() as usize
    }

    /// Total number of warp slots for this launch.
    #[must_use]
    pub fn num_total_warps(&self) -> usize {
        self.num_warps_per_block() * self.num_blocks()
    }

    /// Linear id of a block within the grid.
    #[must_use]
    pub fn linear_block_id(&self, block: Dim) -> u64 {
        u64::from(block.x)
            + u64::from(block.y) * u64::from(self.grid.x)
            + u64::from(block.z) * u64::from(self.grid.x) * u64::from(self.grid.y)
    }
}

/// A memory allocation.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemAllocation {
    pub device_ptr: u64,
    pub num_bytes: u64,
}

/// Per-lane memory payload of one dynamic instruction.
///
/// Contains one address per active lane of the whole block, in ascending
/// linear thread order, all with the same access size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPayload {
    pub addresses: Vec<u64>,
    pub size: u32,
}

/// Branch outcome payload of one dynamic instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPayload {
    /// Taken outcome per lane, aligned with the block-wide active mask.
    pub taken: BlockActiveMask,
    /// Statically known branch target.
    pub target_pc: u32,
    /// Statically known reconvergence point, if any.
    pub reconvergence_pc: Option<u32>,
}

/// One dynamic execution event reported by the emulator.
#[derive(Debug, Clone)]
pub struct InstructionEvent {
    pub block: Dim,
    pub pc: u32,
    pub instruction: DecodedInstruction,
    pub active_mask: BlockActiveMask,
    pub memory: Option<MemoryPayload>,
    pub branch: Option<BranchPayload>,
}

#[cfg(test)]
mod tests {
    use super::KernelDescriptor;
    use crate::dim::Dim;

    #[test]
    fn warp_slot_count() {
        // blockDim=(256,1,1) => 8 warps per block, gridDim=(4,2,1) => 64 total
        let kernel = KernelDescriptor {
            name: "warp_slot_count".to_string(),
            grid: Dim::new(4, 2, 1),
            block: Dim::new(256, 1, 1),
            num_registers: 16,
            shared_mem_bytes: 0,
        };
        assert_eq!(kernel.num_warps_per_block(), 8);
        assert_eq!(kernel.num_total_warps(), 64);
    }

    #[test]
    fn partial_warp_rounds_up() {
        let kernel = KernelDescriptor {
            name: "partial".to_string(),
            grid: Dim::new(1, 1, 1),
            block: Dim::new(33, 1, 1),
            num_registers: 16,
            shared_mem_bytes: 0,
        };
        assert_eq!(kernel.num_warps_per_block(), 2);
    }

    #[test]
    fn block_ids_are_row_major() {
        let kernel = KernelDescriptor {
            name: "ids".to_string(),
            grid: Dim::new(4, 2, 1),
            block: Dim::new(32, 1, 1),
            num_registers: 16,
            shared_mem_bytes: 0,
        };
        assert_eq!(kernel.linear_block_id(Dim::new(0, 0, 0)), 0);
        assert_eq!(kernel.linear_block_id(Dim::new(3, 0, 0)), 3);
        assert_eq!(kernel.linear_block_id(Dim::new(0, 1, 0)), 4);
        assert_eq!(kernel.linear_block_id(Dim::new(3, 1, 0)), 7);
    }
}

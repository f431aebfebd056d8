use crate::model::KernelDescriptor;
use crate::WARP_SIZE;

/// Per-core hardware limits used for computing GPU occupancy.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct HardwareLimits {
    pub max_blocks_per_core: usize,
    pub max_threads_per_core: usize,
    pub max_registers_per_core: usize,
    pub max_shared_mem_per_core: usize,
    /// Shared memory is allocated in chunks of this many bytes.
    pub shared_mem_granularity: usize,
    /// Per-warp register allocation rounds up to a multiple of this.
    pub register_rounding: usize,
}

impl Default for HardwareLimits {
    fn default() -> Self {
        // compute capability 2.0
        Self {
            max_blocks_per_core: 8,
            max_threads_per_core: 1536,
            max_registers_per_core: 32768,
            max_shared_mem_per_core: 49152,
            shared_mem_granularity: 128,
            register_rounding: 64,
        }
    }
}

pub type OccupancyFormula = fn(&HardwareLimits, &KernelDescriptor) -> usize;

/// Occupancy formula table, selected by compute capability.
///
/// Only "2.0" is implemented; unknown versions abort rather than silently
/// tracing with the wrong resident-block count.
#[must_use]
pub fn formula_for(compute_version: &str) -> Option<OccupancyFormula> {
    match compute_version {
        "2.0" => Some(max_blocks_sm20),
        _ => None,
    }
}

/// Maximum number of resident blocks per core for this kernel.
pub fn max_resident_blocks(
    compute_version: &str,
    limits: &HardwareLimits,
    kernel: &KernelDescriptor,
) -> usize {
    let Some(formula) = formula_for(compute_version) else {
        log::error!("unsupported compute capability {compute_version}");
        panic!("unsupported compute capability {compute_version}");
    };
    let blocks = formula(limits, kernel);
    if blocks < 1 {
        panic!(
            "kernel {} requires more resources than a core provides",
            kernel.name
        );
    }
    blocks
}

fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) / multiple * multiple
}

fn max_blocks_sm20(limits: &HardwareLimits, kernel: &KernelDescriptor) -> usize {
    let threads_per_block = kernel.threads_per_block();
    let warps_per_block = kernel.num_warps_per_block();

    let mut limit = limits.max_blocks_per_core;

    // limit by threads per core
    limit = limit.min(limits.max_threads_per_core / threads_per_block);

    // limit by shared memory, allocated at chunk granularity
    if kernel.shared_mem_bytes > 0 {
        let rounded = round_up(
            kernel.shared_mem_bytes as usize,
            limits.shared_mem_granularity,
        );
        limit = limit.min(limits.max_shared_mem_per_core / rounded);
    }

    // limit by registers, allocated per warp
    let regs_per_warp = round_up(
        kernel.num_registers as usize * WARP_SIZE,
        limits.register_rounding,
    );
    let regs_per_block = regs_per_warp * warps_per_block;
    if regs_per_block > 0 {
        limit = limit.min(limits.max_registers_per_core / regs_per_block);
    }

    limit
}

use crate::active_mask::ActiveMask;
use crate::instruction::{InstructionClassifier, InstructionRecord};
use crate::model::InstructionEvent;
use crate::opcodes::ControlFlowKind;
use crate::record::{instruction_addr, TraceRecord};
use crate::WARP_SIZE;

/// One lane's memory request, ephemeral per event.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryAccess {
    pub addr: u64,
    pub size: u64,
}

impl MemoryAccess {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.addr + self.size
    }
}

/// Merge the per-lane accesses of one warp into minimal disjoint ranges.
///
/// Sorts by (address, size) and walks left to right, merging each entry
/// into its right neighbor when the ranges are equal, exactly adjacent or
/// overlapping. The surviving ranges cover exactly the input bytes.
pub fn coalesce(accesses: &mut Vec<MemoryAccess>) {
    accesses.sort_unstable_by_key(|access| (access.addr, access.size));
    for i in 0..accesses.len().saturating_sub(1) {
        let current = accesses[i];
        if current.size == 0 {
            continue;
        }
        let next = accesses[i + 1];
        if next.addr <= current.end() {
            accesses[i + 1] = MemoryAccess {
                addr: current.addr,
                size: current.end().max(next.end()) - current.addr,
            };
            accesses[i].size = 0;
        }
    }
    accesses.retain(|access| access.size > 0);
}

/// Reduces block-wide dynamic events into per-warp trace records.
///
/// Owns the PC-keyed classification cache; one processor lives per kernel.
#[derive(Debug, Default)]
pub struct WarpEventProcessor {
    classifier: InstructionClassifier,
}

impl WarpEventProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn num_cached_instructions(&self) -> usize {
        self.classifier.num_cached()
    }

    /// Process one dynamic event, independently per warp-size window of the
    /// active mask. `emit` receives the warp index within the block and one
    /// encoded-ready record per emission.
    pub fn process<F>(&mut self, event: &InstructionEvent, mut emit: F)
    where
        F: FnMut(usize, TraceRecord),
    {
        let record = self.classifier.classify(event.pc, &event.instruction).clone();

        let num_threads = event.active_mask.len();
        let num_warps = (num_threads + WARP_SIZE - 1) / WARP_SIZE;
        let mut addr_cursor = 0;

        for warp in 0..num_warps {
            let base = warp * WARP_SIZE;
            let window = &event.active_mask[base..num_threads.min(base + WARP_SIZE)];

            let mut active = ActiveMask::ZERO;
            for lane in window.iter_ones() {
                active.set(lane, true);
            }
            if active.num_active() == 0 {
                // no record, no instruction-count increment
                continue;
            }
            let inactive_mask = active.inverted().as_u32();

            if record.is_memory() {
                self.process_memory_warp(
                    event, &record, warp, &active, inactive_mask, &mut addr_cursor, &mut emit,
                );
            } else if record.control_flow != ControlFlowKind::None && event.branch.is_some() {
                self.process_branch_warp(event, &record, warp, &active, inactive_mask, &mut emit);
            } else {
                emit(
                    warp,
                    TraceRecord::from_instruction(&record, event.pc, inactive_mask),
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_memory_warp<F>(
        &self,
        event: &InstructionEvent,
        record: &InstructionRecord,
        warp: usize,
        active: &ActiveMask,
        inactive_mask: u32,
        addr_cursor: &mut usize,
        emit: &mut F,
    ) where
        F: FnMut(usize, TraceRecord),
    {
        let Some(payload) = event.memory.as_ref() else {
            panic!(
                "memory instruction at pc {} without address payload",
                event.pc
            );
        };

        // one address per active lane, in ascending lane order
        let mut accesses = Vec::with_capacity(active.num_active());
        for _lane in active.iter_ones() {
            let Some(&addr) = payload.addresses.get(*addr_cursor) else {
                panic!(
                    "address list shorter than active lane count at pc {}: \
                     emulator and generator are out of sync",
                    event.pc
                );
            };
            *addr_cursor += 1;
            accesses.push(MemoryAccess {
                addr,
                size: u64::from(payload.size),
            });
        }

        coalesce(&mut accesses);

        // one record per merged range; ranges wider than the u8 size field
        // (a full warp of contiguous doublewords merges to 256 bytes) are
        // emitted in chunks so the wire field never overflows
        let mut num_emitted = 0;
        for range in &accesses {
            let mut addr = range.addr;
            let mut remaining = range.size;
            loop {
                let size = remaining.min(u64::from(u8::MAX));
                let mut out = TraceRecord::from_instruction(record, event.pc, inactive_mask);
                // all but the first record carry the split diagnostic marker
                out.uncoalesced = num_emitted > 0;
                if record.num_loads > 0 {
                    out.mem_read_size = size as u8;
                    out.load_addr_or_taken_mask = addr;
                }
                if record.has_store {
                    out.mem_write_size = size as u8;
                    out.store_addr = addr;
                }
                emit(warp, out);
                num_emitted += 1;
                remaining -= size;
                if remaining == 0 {
                    break;
                }
                addr += size;
            }
        }
    }

    fn process_branch_warp<F>(
        &self,
        event: &InstructionEvent,
        record: &InstructionRecord,
        warp: usize,
        active: &ActiveMask,
        inactive_mask: u32,
        emit: &mut F,
    ) where
        F: FnMut(usize, TraceRecord),
    {
        let Some(branch) = event.branch.as_ref() else {
            unreachable!("checked by caller");
        };
        if branch.taken.len() < event.active_mask.len() {
            panic!(
                "taken mask shorter than active lane count at pc {}: \
                 emulator and generator are out of sync",
                event.pc
            );
        }

        let base = warp * WARP_SIZE;
        let mut taken_mask = ActiveMask::ZERO;
        for lane in active.iter_ones() {
            if branch.taken[base + lane] {
                taken_mask.set(lane, true);
            }
        }

        // unconditional branch family is always taken
        let taken = !record.is_conditional || taken_mask.num_active() > 0;

        let mut out = TraceRecord::from_instruction(record, event.pc, inactive_mask);
        out.load_addr_or_taken_mask = u64::from(taken_mask.inverted().as_u32());
        out.branch_target_addr = instruction_addr(branch.target_pc);
        out.reconvergence_addr = branch
            .reconvergence_pc
            .map(instruction_addr)
            .unwrap_or_default();
        out.taken = taken;
        emit(warp, out);
    }
}

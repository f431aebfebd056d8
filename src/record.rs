use crate::instruction::{InstructionRecord, RegId, MAX_REG_OPERANDS};
use crate::opcodes::{ControlFlowKind, TraceOpcode};
use smallvec::SmallVec;

/// Version of the binary trace record layout below.
pub const TRACE_FORMAT_VERSION: u32 = 1;

/// PC indices are encoded as `(pc << INSTRUCTION_SIZE_LOG2) + INSTRUCTION_BASE_ADDR`.
pub const INSTRUCTION_SIZE_LOG2: u64 = 2;
pub const INSTRUCTION_BASE_ADDR: u64 = 0x8000_0000;

/// Encoded size of one trace record in bytes.
pub const RECORD_BYTES: usize = 72;

/// Encode a PC index as an instruction address.
#[must_use]
pub fn instruction_addr(pc: u32) -> u64 {
    (u64::from(pc) << INSTRUCTION_SIZE_LOG2) + INSTRUCTION_BASE_ADDR
}

/// One fixed-width trace record.
///
/// Encoded with [`TraceRecord::encode_into`]; the layout is independent of
/// the in-memory representation. All integers are little-endian, fields in
/// declaration order, register id slots zero-padded to [`MAX_REG_OPERANDS`].
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TraceRecord {
    pub opcode: TraceOpcode,
    pub src_regs: SmallVec<[RegId; MAX_REG_OPERANDS]>,
    pub dest_regs: SmallVec<[RegId; MAX_REG_OPERANDS]>,
    pub control_flow: ControlFlowKind,
    /// Diagnostic split/uncoalesced marker, carries no dependency meaning.
    pub uncoalesced: bool,
    pub has_store: bool,
    pub num_loads: u8,
    pub mem_read_size: u8,
    pub mem_write_size: u8,
    pub is_floating_point: bool,
    /// Inverted active mask (bit = 1 means the lane was inactive).
    pub inactive_mask: u32,
    /// Load address, or the inverted taken mask for branch records.
    ///
    /// The two record kinds never populate both.
    pub load_addr_or_taken_mask: u64,
    pub store_addr: u64,
    pub instruction_addr: u64,
    pub branch_target_addr: u64,
    pub reconvergence_addr: u64,
    pub taken: bool,
    /// Reserved branch-direction flag, always zero for now.
    pub direction: u8,
}

impl TraceRecord {
    /// A record carrying only the classifier's static fields.
    #[must_use]
    pub fn from_instruction(instruction: &InstructionRecord, pc: u32, inactive_mask: u32) -> Self {
        Self {
            opcode: instruction.opcode,
            src_regs: instruction.src_regs.clone(),
            dest_regs: instruction.dest_regs.clone(),
            control_flow: instruction.control_flow,
            uncoalesced: false,
            has_store: instruction.has_store,
            num_loads: instruction.num_loads,
            mem_read_size: 0,
            mem_write_size: 0,
            is_floating_point: instruction.is_floating_point,
            inactive_mask,
            load_addr_or_taken_mask: 0,
            store_addr: 0,
            instruction_addr: instruction_addr(pc),
            branch_target_addr: 0,
            reconvergence_addr: 0,
            taken: false,
            direction: 0,
        }
    }

    /// Append the encoded record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        debug_assert!(self.src_regs.len() <= MAX_REG_OPERANDS);
        debug_assert!(self.dest_regs.len() <= MAX_REG_OPERANDS);

        let start = out.len();
        out.push(self.opcode as u8);

        out.push(self.src_regs.len() as u8);
        for slot in 0..MAX_REG_OPERANDS {
            let reg = self.src_regs.get(slot).copied().unwrap_or(0);
            out.extend_from_slice(&reg.to_le_bytes());
        }
        out.push(self.dest_regs.len() as u8);
        for slot in 0..MAX_REG_OPERANDS {
            let reg = self.dest_regs.get(slot).copied().unwrap_or(0);
            out.extend_from_slice(&reg.to_le_bytes());
        }

        out.push(self.control_flow as u8);
        out.push(u8::from(self.uncoalesced));
        out.push(u8::from(self.has_store));
        out.push(self.num_loads);
        out.push(self.mem_read_size);
        out.push(self.mem_write_size);
        out.push(u8::from(self.is_floating_point));

        out.extend_from_slice(&self.inactive_mask.to_le_bytes());
        out.extend_from_slice(&self.load_addr_or_taken_mask.to_le_bytes());
        out.extend_from_slice(&self.store_addr.to_le_bytes());
        out.extend_from_slice(&self.instruction_addr.to_le_bytes());
        out.extend_from_slice(&self.branch_target_addr.to_le_bytes());
        out.extend_from_slice(&self.reconvergence_addr.to_le_bytes());

        out.push(u8::from(self.taken));
        out.push(self.direction);

        debug_assert_eq!(out.len() - start, RECORD_BYTES);
    }
}

use crate::opcodes::{self, ControlFlowKind, DataType, PtxOp, TraceOpcode};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Maximum register operands per side of a trace record.
pub const MAX_REG_OPERANDS: usize = 4;

/// Static instruction byte width assumed for PC encoding.
pub const INSTRUCTION_WIDTH: u32 = 4;

pub type RegId = u16;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemorySpace {
    Constant,
    Global,
    Local,
    Param,
    Shared,
    Texture,
}

/// Operand address mode as decoded by the emulator.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum AddressMode {
    /// Plain register or register vector.
    Register,
    /// Memory operand addressed through a base register.
    Indirect,
    /// Literal value, no register.
    Immediate,
    /// Special register (tid, ntid, ...), not tracked.
    Special,
}

/// One decoded operand: address mode plus flattened register ids.
///
/// Vector operands of width 2 or 4 carry that many register ids.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Operand {
    pub mode: AddressMode,
    pub regs: SmallVec<[RegId; 4]>,
}

impl Operand {
    #[must_use]
    pub fn register(id: RegId) -> Self {
        Self {
            mode: AddressMode::Register,
            regs: smallvec::smallvec![id],
        }
    }

    #[must_use]
    pub fn vector(ids: &[RegId]) -> Self {
        debug_assert!(matches!(ids.len(), 2 | 4));
        Self {
            mode: AddressMode::Register,
            regs: SmallVec::from_slice(ids),
        }
    }

    #[must_use]
    pub fn indirect(base: RegId) -> Self {
        Self {
            mode: AddressMode::Indirect,
            regs: smallvec::smallvec![base],
        }
    }

    #[must_use]
    pub fn immediate() -> Self {
        Self {
            mode: AddressMode::Immediate,
            regs: SmallVec::new(),
        }
    }
}

/// Predicate guard on an instruction (`@p` / `@!p`).
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum PredicateGuard {
    #[default]
    None,
    Pred(RegId),
    InvPred(RegId),
}

/// The static shape of one decoded instruction, as reported by the emulator.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub op: PtxOp,
    pub dtype: DataType,
    /// Up to 3 source operands.
    pub sources: SmallVec<[Operand; 3]>,
    pub dest: Option<Operand>,
    /// Second destination, used for predicate-set results (`setp p|q`).
    pub dest_pred: Option<Operand>,
    pub guard: PredicateGuard,
    pub mem_space: Option<MemorySpace>,
}

/// Canonical classification of one static instruction.
///
/// Cached by PC; never recomputed once cached.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct InstructionRecord {
    pub opcode: TraceOpcode,
    pub src_regs: SmallVec<[RegId; MAX_REG_OPERANDS]>,
    pub dest_regs: SmallVec<[RegId; MAX_REG_OPERANDS]>,
    pub control_flow: ControlFlowKind,
    pub num_loads: u8,
    pub has_store: bool,
    pub is_floating_point: bool,
    /// Branch guarded by a predicate (divergence possible).
    pub is_conditional: bool,
}

impl InstructionRecord {
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.num_loads > 0 || self.has_store
    }
}

/// Classifies static instructions into cached [`InstructionRecord`]s.
///
/// The PC-keyed cache lives for one kernel and is dropped with the session.
#[derive(Debug, Default)]
pub struct InstructionClassifier {
    cache: HashMap<u32, InstructionRecord>,
}

impl InstructionClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn num_cached(&self) -> usize {
        self.cache.len()
    }

    /// Classify the instruction at `pc`, or return the cached record.
    pub fn classify(&mut self, pc: u32, instruction: &DecodedInstruction) -> &InstructionRecord {
        self.cache
            .entry(pc)
            .or_insert_with(|| classify_uncached(instruction))
    }
}

fn expand_registers(dest: &mut SmallVec<[RegId; MAX_REG_OPERANDS]>, operand: &Operand) {
    match operand.mode {
        AddressMode::Register | AddressMode::Indirect => {
            for &reg in &operand.regs {
                if dest.len() >= MAX_REG_OPERANDS {
                    panic!(
                        "more than {MAX_REG_OPERANDS} register operands: table/IR mismatch"
                    );
                }
                dest.push(reg);
            }
        }
        AddressMode::Immediate | AddressMode::Special => {}
    }
}

fn memory_category(op: PtxOp, space: Option<MemorySpace>) -> TraceOpcode {
    if op.is_texture() {
        return TraceOpcode::TEX_LOAD;
    }
    let Some(space) = space else {
        panic!("memory opcode {} without address space", op.as_ref());
    };
    if op.is_atomic() {
        return match space {
            MemorySpace::Global => TraceOpcode::ATOMIC_GLOBAL,
            MemorySpace::Shared => TraceOpcode::ATOMIC_SHARED,
            other => panic!("atomic in unsupported space {other:?}"),
        };
    }
    if op.is_load() {
        return match space {
            MemorySpace::Constant => TraceOpcode::LD_CONST,
            MemorySpace::Global => TraceOpcode::LD_GLOBAL,
            MemorySpace::Local => TraceOpcode::LD_LOCAL,
            MemorySpace::Param => TraceOpcode::LD_PARAM,
            MemorySpace::Shared => TraceOpcode::LD_SHARED,
            MemorySpace::Texture => TraceOpcode::TEX_LOAD,
        };
    }
    debug_assert!(op.is_store());
    match space {
        MemorySpace::Global => TraceOpcode::ST_GLOBAL,
        MemorySpace::Local => TraceOpcode::ST_LOCAL,
        MemorySpace::Shared => TraceOpcode::ST_SHARED,
        other => panic!("store to unsupported space {other:?}"),
    }
}

fn classify_uncached(instruction: &DecodedInstruction) -> InstructionRecord {
    let op = instruction.op;
    let is_memory = op.is_load() || op.is_store() || op.is_atomic() || op.is_texture();

    let opcode = if is_memory {
        memory_category(op, instruction.mem_space)
    } else {
        let family = instruction.dtype.family();
        let Some(opcode) = opcodes::lookup(op, family) else {
            panic!("undefined opcode {}.{}", op.as_ref(), family.as_ref());
        };
        opcode
    };

    let mut src_regs = SmallVec::new();
    for source in &instruction.sources {
        expand_registers(&mut src_regs, source);
    }

    let mut dest_regs = SmallVec::new();
    if op.is_store() {
        // the nominal destination is the stored value: read it like a source
        if let Some(value) = &instruction.dest {
            expand_registers(&mut src_regs, value);
        }
    } else {
        if let Some(dest) = &instruction.dest {
            expand_registers(&mut dest_regs, dest);
        }
        if let Some(dest) = &instruction.dest_pred {
            expand_registers(&mut dest_regs, dest);
        }
    }

    // a plain or inverted predicate test reads the predicate register
    match instruction.guard {
        PredicateGuard::Pred(reg) | PredicateGuard::InvPred(reg) => {
            expand_registers(&mut src_regs, &Operand::register(reg));
        }
        PredicateGuard::None => {}
    }

    let control_flow = op.control_flow_kind();

    InstructionRecord {
        opcode,
        src_regs,
        dest_regs,
        control_flow,
        num_loads: u8::from(op.is_load() || op.is_atomic() || op.is_texture()),
        has_store: op.is_store() || op.is_atomic(),
        is_floating_point: instruction.dtype.is_floating_point(),
        is_conditional: control_flow == ControlFlowKind::Branch
            && instruction.guard != PredicateGuard::None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AddressMode, DecodedInstruction, InstructionClassifier, MemorySpace, Operand,
        PredicateGuard,
    };
    use crate::opcodes::{ControlFlowKind, DataType, PtxOp, TraceOpcode};
    use pretty_assertions_sorted::assert_eq;
    use smallvec::smallvec;

    fn add(dest: u16, a: u16, b: u16) -> DecodedInstruction {
        DecodedInstruction {
            op: PtxOp::ADD,
            dtype: DataType::S32,
            sources: smallvec![Operand::register(a), Operand::register(b)],
            dest: Some(Operand::register(dest)),
            dest_pred: None,
            guard: PredicateGuard::None,
            mem_space: None,
        }
    }

    #[test]
    fn classifies_integer_add() {
        let mut classifier = InstructionClassifier::new();
        let record = classifier.classify(0, &add(1, 2, 3)).clone();
        assert_eq!(record.opcode, TraceOpcode::INT_ALU);
        assert_eq!(record.src_regs.as_slice(), &[2, 3]);
        assert_eq!(record.dest_regs.as_slice(), &[1]);
        assert_eq!(record.control_flow, ControlFlowKind::None);
        assert!(!record.is_floating_point);
        assert!(!record.is_memory());
    }

    #[test]
    fn second_event_at_pc_is_a_cache_hit() {
        let mut classifier = InstructionClassifier::new();
        let first = classifier.classify(8, &add(1, 2, 3)).clone();
        // a different shape at the same PC must not be re-classified
        let second = classifier.classify(8, &add(9, 9, 9)).clone();
        assert_eq!(first, second);
        assert_eq!(classifier.num_cached(), 1);
    }

    #[test]
    fn vector_operands_flatten() {
        let ld = DecodedInstruction {
            op: PtxOp::LD,
            dtype: DataType::F32,
            sources: smallvec![Operand::indirect(10)],
            dest: Some(Operand::vector(&[4, 5, 6, 7])),
            dest_pred: None,
            guard: PredicateGuard::None,
            mem_space: Some(MemorySpace::Global),
        };
        let mut classifier = InstructionClassifier::new();
        let record = classifier.classify(0, &ld);
        assert_eq!(record.opcode, TraceOpcode::LD_GLOBAL);
        assert_eq!(record.dest_regs.as_slice(), &[4, 5, 6, 7]);
        assert_eq!(record.src_regs.as_slice(), &[10]);
        assert_eq!(record.num_loads, 1);
        assert!(record.is_floating_point);
    }

    #[test]
    fn store_value_reads_like_a_source() {
        let st = DecodedInstruction {
            op: PtxOp::ST,
            dtype: DataType::U32,
            sources: smallvec![Operand::indirect(2)],
            dest: Some(Operand::vector(&[20, 21])),
            dest_pred: None,
            guard: PredicateGuard::None,
            mem_space: Some(MemorySpace::Shared),
        };
        let mut classifier = InstructionClassifier::new();
        let record = classifier.classify(0, &st);
        assert_eq!(record.opcode, TraceOpcode::ST_SHARED);
        assert_eq!(record.src_regs.as_slice(), &[2, 20, 21]);
        assert!(record.dest_regs.is_empty());
        assert!(record.has_store);
        assert_eq!(record.num_loads, 0);
    }

    #[test]
    fn predicate_guard_appends_a_source() {
        let mut guarded = add(1, 2, 3);
        guarded.guard = PredicateGuard::InvPred(7);
        let mut classifier = InstructionClassifier::new();
        let record = classifier.classify(0, &guarded);
        assert_eq!(record.src_regs.as_slice(), &[2, 3, 7]);
    }

    #[test]
    fn conditional_branch_kind() {
        let bra = DecodedInstruction {
            op: PtxOp::BRA,
            dtype: DataType::Pred,
            sources: smallvec![],
            dest: None,
            dest_pred: None,
            guard: PredicateGuard::Pred(1),
            mem_space: None,
        };
        let mut classifier = InstructionClassifier::new();
        let record = classifier.classify(0, &bra).clone();
        assert_eq!(record.opcode, TraceOpcode::CONTROL);
        assert_eq!(record.control_flow, ControlFlowKind::Branch);
        assert!(record.is_conditional);

        let mut uncond = bra_shape();
        uncond.guard = PredicateGuard::None;
        let record = classifier.classify(4, &uncond);
        assert!(!record.is_conditional);

        fn bra_shape() -> DecodedInstruction {
            DecodedInstruction {
                op: PtxOp::BRA,
                dtype: DataType::Pred,
                sources: smallvec![],
                dest: None,
                dest_pred: None,
                guard: PredicateGuard::None,
                mem_space: None,
            }
        }
    }

    #[test]
    fn atomics_read_and_write() {
        let atom = DecodedInstruction {
            op: PtxOp::ATOM,
            dtype: DataType::U32,
            sources: smallvec![Operand::indirect(3), Operand::register(4)],
            dest: Some(Operand::register(5)),
            dest_pred: None,
            guard: PredicateGuard::None,
            mem_space: Some(MemorySpace::Global),
        };
        let mut classifier = InstructionClassifier::new();
        let record = classifier.classify(0, &atom);
        assert_eq!(record.opcode, TraceOpcode::ATOMIC_GLOBAL);
        assert_eq!(record.num_loads, 1);
        assert!(record.has_store);
    }

    #[test]
    #[should_panic(expected = "register operands")]
    fn register_overflow_aborts() {
        // st.v4 plus an address register exceeds the fixed maximum
        let st = DecodedInstruction {
            op: PtxOp::ST,
            dtype: DataType::F32,
            sources: smallvec![Operand::indirect(2)],
            dest: Some(Operand {
                mode: AddressMode::Register,
                regs: smallvec![20, 21, 22, 23],
            }),
            dest_pred: None,
            guard: PredicateGuard::None,
            mem_space: Some(MemorySpace::Global),
        };
        let mut classifier = InstructionClassifier::new();
        classifier.classify(0, &st);
    }

    #[test]
    #[should_panic(expected = "undefined opcode")]
    fn unmapped_opcode_aborts() {
        let bad = DecodedInstruction {
            op: PtxOp::SIN,
            dtype: DataType::S32,
            sources: smallvec![Operand::register(1)],
            dest: Some(Operand::register(2)),
            dest_pred: None,
            guard: PredicateGuard::None,
            mem_space: None,
        };
        let mut classifier = InstructionClassifier::new();
        classifier.classify(0, &bad);
    }
}

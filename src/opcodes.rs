#![allow(clippy::upper_case_acronyms)]

/// PTX instruction opcodes understood by the classifier.
///
/// Memory, atomic and texture opcodes are categorized structurally from
/// their address space; every other opcode goes through [`TRACE_OPCODES`].
#[derive(strum::AsRefStr, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum PtxOp {
    ABS,
    ADD,
    ADDC,
    AND,
    ATOM,
    BAR,
    BFE,
    BFI,
    BFIND,
    BRA,
    BREV,
    BRKPT,
    CALL,
    CLZ,
    CNOT,
    COPYSIGN,
    COS,
    CVT,
    CVTA,
    DIV,
    EX2,
    EXIT,
    FMA,
    LD,
    LDU,
    LG2,
    MAD,
    MAD24,
    MAX,
    MEMBAR,
    MIN,
    MOV,
    MUL,
    MUL24,
    NEG,
    NOT,
    OR,
    POPC,
    PRMT,
    RCP,
    RED,
    REM,
    RET,
    RSQRT,
    SAD,
    SELP,
    SET,
    SETP,
    SHL,
    SHR,
    SIN,
    SLCT,
    SQRT,
    ST,
    SUB,
    SUBC,
    TESTP,
    TEX,
    TLD4,
    TRAP,
    TXQ,
    VABSDIFF,
    VOTE,
    XOR,
}

impl PtxOp {
    /// Load-family opcodes.
    #[must_use]
    pub fn is_load(&self) -> bool {
        matches!(self, PtxOp::LD | PtxOp::LDU)
    }

    /// Store-family opcodes.
    ///
    /// The nominal destination operand of these is the value being written.
    #[must_use]
    pub fn is_store(&self) -> bool {
        matches!(self, PtxOp::ST)
    }

    /// Atomic/reduction opcodes (read-modify-write).
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        matches!(self, PtxOp::ATOM | PtxOp::RED)
    }

    /// Texture-fetch opcodes.
    #[must_use]
    pub fn is_texture(&self) -> bool {
        matches!(self, PtxOp::TEX | PtxOp::TLD4 | PtxOp::TXQ)
    }
}

/// Operand datatype of a PTX instruction.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataType {
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
    B8,
    B16,
    B32,
    B64,
    Pred,
}

impl DataType {
    #[must_use]
    pub fn family(&self) -> TypeFamily {
        use DataType::*;
        match self {
            S8 | S16 | S32 | S64 | U8 | U16 | U32 | U64 => TypeFamily::Int,
            F16 | F32 => TypeFamily::Float,
            F64 => TypeFamily::Double,
            B8 | B16 | B32 | B64 => TypeFamily::Bits,
            Pred => TypeFamily::Predicate,
        }
    }

    #[must_use]
    pub fn is_floating_point(&self) -> bool {
        matches!(
            self.family(),
            TypeFamily::Float | TypeFamily::Double
        )
    }
}

/// Datatype family used as the first key dimension of the opcode table.
#[derive(strum::AsRefStr, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeFamily {
    #[strum(serialize = "I")]
    Int,
    #[strum(serialize = "F")]
    Float,
    #[strum(serialize = "D")]
    Double,
    #[strum(serialize = "B")]
    Bits,
    #[strum(serialize = "P")]
    Predicate,
}

/// Trace opcode category on the wire.
///
/// The discriminants are part of the trace format and must not change.
#[derive(strum::AsRefStr, strum::FromRepr, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TraceOpcode {
    INT_ALU = 0,
    INT_MUL = 1,
    INT_DIV = 2,
    FP_ALU = 3,
    FP_MUL = 4,
    FP_DIV = 5,
    FP_SFU = 6,
    DP_ALU = 7,
    DP_MUL = 8,
    DP_DIV = 9,
    CONV = 10,
    MOVE = 11,
    PRED = 12,
    CONTROL = 13,
    LD_CONST = 14,
    LD_GLOBAL = 15,
    LD_LOCAL = 16,
    LD_PARAM = 17,
    LD_SHARED = 18,
    ST_GLOBAL = 19,
    ST_LOCAL = 20,
    ST_SHARED = 21,
    ATOMIC_GLOBAL = 22,
    ATOMIC_SHARED = 23,
    TEX_LOAD = 24,
}

/// Control-flow kind on the wire.
///
/// The discriminants are part of the trace format and must not change.
#[derive(strum::FromRepr, Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ControlFlowKind {
    #[default]
    None = 0,
    Branch = 1,
    Call = 2,
    Return = 3,
    TrapExit = 4,
}

pub type OpcodeMap = phf::Map<&'static str, TraceOpcode>;

/// Fixed compute-category translation table.
///
/// Keyed by `{opcode}.{family}`; `*` rows apply to every family. An opcode
/// with no entry is a build-time table/IR mismatch and aborts tracing.
pub static TRACE_OPCODES: OpcodeMap = phf::phf_map! {
    // integer / float / double arithmetic
    "ABS.I" => TraceOpcode::INT_ALU,
    "ABS.F" => TraceOpcode::FP_ALU,
    "ABS.D" => TraceOpcode::DP_ALU,
    "ADD.I" => TraceOpcode::INT_ALU,
    "ADD.F" => TraceOpcode::FP_ALU,
    "ADD.D" => TraceOpcode::DP_ALU,
    "SUB.I" => TraceOpcode::INT_ALU,
    "SUB.F" => TraceOpcode::FP_ALU,
    "SUB.D" => TraceOpcode::DP_ALU,
    "MIN.I" => TraceOpcode::INT_ALU,
    "MIN.F" => TraceOpcode::FP_ALU,
    "MIN.D" => TraceOpcode::DP_ALU,
    "MAX.I" => TraceOpcode::INT_ALU,
    "MAX.F" => TraceOpcode::FP_ALU,
    "MAX.D" => TraceOpcode::DP_ALU,
    "NEG.I" => TraceOpcode::INT_ALU,
    "NEG.F" => TraceOpcode::FP_ALU,
    "NEG.D" => TraceOpcode::DP_ALU,
    "COPYSIGN.F" => TraceOpcode::FP_ALU,
    "COPYSIGN.D" => TraceOpcode::DP_ALU,
    "ADDC.I" => TraceOpcode::INT_ALU,
    "SUBC.I" => TraceOpcode::INT_ALU,
    "SAD.I" => TraceOpcode::INT_ALU,
    "VABSDIFF.I" => TraceOpcode::INT_ALU,

    // bitwise and shifts
    "AND.I" => TraceOpcode::INT_ALU,
    "AND.B" => TraceOpcode::INT_ALU,
    "AND.P" => TraceOpcode::PRED,
    "OR.I" => TraceOpcode::INT_ALU,
    "OR.B" => TraceOpcode::INT_ALU,
    "OR.P" => TraceOpcode::PRED,
    "XOR.I" => TraceOpcode::INT_ALU,
    "XOR.B" => TraceOpcode::INT_ALU,
    "XOR.P" => TraceOpcode::PRED,
    "NOT.I" => TraceOpcode::INT_ALU,
    "NOT.B" => TraceOpcode::INT_ALU,
    "NOT.P" => TraceOpcode::PRED,
    "CNOT.I" => TraceOpcode::INT_ALU,
    "CNOT.B" => TraceOpcode::INT_ALU,
    "SHL.I" => TraceOpcode::INT_ALU,
    "SHL.B" => TraceOpcode::INT_ALU,
    "SHR.I" => TraceOpcode::INT_ALU,
    "SHR.B" => TraceOpcode::INT_ALU,
    "BFE.I" => TraceOpcode::INT_ALU,
    "BFI.B" => TraceOpcode::INT_ALU,
    "BFIND.I" => TraceOpcode::INT_ALU,
    "BREV.B" => TraceOpcode::INT_ALU,
    "CLZ.B" => TraceOpcode::INT_ALU,
    "POPC.B" => TraceOpcode::INT_ALU,
    "PRMT.B" => TraceOpcode::INT_ALU,

    // multiplication and division
    "MUL.I" => TraceOpcode::INT_MUL,
    "MUL.F" => TraceOpcode::FP_MUL,
    "MUL.D" => TraceOpcode::DP_MUL,
    "MUL24.I" => TraceOpcode::INT_MUL,
    "MAD.I" => TraceOpcode::INT_MUL,
    "MAD.F" => TraceOpcode::FP_MUL,
    "MAD.D" => TraceOpcode::DP_MUL,
    "MAD24.I" => TraceOpcode::INT_MUL,
    "FMA.F" => TraceOpcode::FP_MUL,
    "FMA.D" => TraceOpcode::DP_MUL,
    "DIV.I" => TraceOpcode::INT_DIV,
    "DIV.F" => TraceOpcode::FP_DIV,
    "DIV.D" => TraceOpcode::DP_DIV,
    "REM.I" => TraceOpcode::INT_DIV,

    // special function unit
    "RCP.F" => TraceOpcode::FP_SFU,
    "RCP.D" => TraceOpcode::DP_DIV,
    "SQRT.F" => TraceOpcode::FP_SFU,
    "SQRT.D" => TraceOpcode::DP_DIV,
    "RSQRT.F" => TraceOpcode::FP_SFU,
    "RSQRT.D" => TraceOpcode::DP_DIV,
    "SIN.F" => TraceOpcode::FP_SFU,
    "COS.F" => TraceOpcode::FP_SFU,
    "LG2.F" => TraceOpcode::FP_SFU,
    "EX2.F" => TraceOpcode::FP_SFU,

    // conversions, moves, predicates (family independent)
    "CVT.*" => TraceOpcode::CONV,
    "CVTA.*" => TraceOpcode::CONV,
    "MOV.*" => TraceOpcode::MOVE,
    "SELP.*" => TraceOpcode::MOVE,
    "SLCT.*" => TraceOpcode::MOVE,
    "SET.*" => TraceOpcode::PRED,
    "SETP.*" => TraceOpcode::PRED,
    "TESTP.*" => TraceOpcode::PRED,
    "VOTE.*" => TraceOpcode::PRED,

    // control flow and synchronization (family independent)
    "BRA.*" => TraceOpcode::CONTROL,
    "CALL.*" => TraceOpcode::CONTROL,
    "RET.*" => TraceOpcode::CONTROL,
    "EXIT.*" => TraceOpcode::CONTROL,
    "TRAP.*" => TraceOpcode::CONTROL,
    "BRKPT.*" => TraceOpcode::CONTROL,
    "BAR.*" => TraceOpcode::CONTROL,
    "MEMBAR.*" => TraceOpcode::CONTROL,
};

/// Look up the compute category for an opcode.
///
/// Family-specific rows take precedence over `*` rows.
#[must_use]
pub fn lookup(op: PtxOp, family: TypeFamily) -> Option<TraceOpcode> {
    let keyed = format!("{}.{}", op.as_ref(), family.as_ref());
    TRACE_OPCODES
        .get(keyed.as_str())
        .or_else(|| TRACE_OPCODES.get(format!("{}.*", op.as_ref()).as_str()))
        .copied()
}

impl PtxOp {
    /// Static control-flow kind of this opcode.
    #[must_use]
    pub fn control_flow_kind(&self) -> ControlFlowKind {
        match self {
            PtxOp::BRA => ControlFlowKind::Branch,
            PtxOp::CALL => ControlFlowKind::Call,
            PtxOp::RET => ControlFlowKind::Return,
            PtxOp::EXIT | PtxOp::TRAP | PtxOp::BRKPT => ControlFlowKind::TrapExit,
            _ => ControlFlowKind::None,
        }
    }
}

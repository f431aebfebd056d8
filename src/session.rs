use crate::config::Config;
use crate::model::{InstructionEvent, KernelDescriptor, MemAllocation};
use crate::occupancy::{self, HardwareLimits};
use crate::record::{TraceRecord, RECORD_BYTES, TRACE_FORMAT_VERSION};
use crate::sink::CompressedSink;
use crate::warp::WarpEventProcessor;
use color_eyre::eyre::{self, WrapErr};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Accumulated records are compressed and written once the buffer is full.
pub const TRACE_BUFFER_BYTES: usize = 64 * 1024;

/// Global per-kernel instruction ceiling.
///
/// Exceeding it is logged *and* fatal (a long-standing quirk of the trace
/// format contract, see DESIGN.md).
pub const MAX_TRACE_INSTRUCTIONS: u64 = 1 << 31;

/// Output state of one warp.
///
/// Identity is `(block_id << 16) | warp_index`; the slot exclusively owns
/// its buffer and compressed stream.
struct WarpSlot {
    id: u64,
    sink: CompressedSink,
    buffer: Vec<u8>,
    num_instructions: u64,
}

impl WarpSlot {
    fn create(directory: &Path, id: u64) -> Result<Self, crate::sink::Error> {
        let sink = CompressedSink::create(directory.join(format!("{id}.bz2")))?;
        Ok(Self {
            id,
            sink,
            buffer: Vec::with_capacity(TRACE_BUFFER_BYTES),
            num_instructions: 0,
        })
    }

    fn append(&mut self, record: &TraceRecord) {
        record.encode_into(&mut self.buffer);
        self.num_instructions += 1;
        if self.buffer.len() + RECORD_BYTES > TRACE_BUFFER_BYTES {
            self.sink.write_all(&self.buffer);
            self.buffer.clear();
        }
    }

    /// Write out remaining bytes, close the stream and report
    /// (warp id, instruction count).
    fn finish(mut self) -> (u64, u64) {
        if !self.buffer.is_empty() {
            self.sink.write_all(&self.buffer);
            self.buffer.clear();
        }
        self.sink.finish();
        (self.id, self.num_instructions)
    }
}

/// Run-level trace context: configuration, per-kernel instance counts and
/// the shared run index.
#[derive(Debug)]
pub struct TraceRun {
    config: Config,
    limits: HardwareLimits,
    instance_counts: HashMap<String, u64>,
}

impl TraceRun {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            limits: HardwareLimits::default(),
            instance_counts: HashMap::new(),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    /// Start tracing one kernel launch.
    ///
    /// Computes occupancy, creates the per-kernel output directory, writes
    /// the device allocation listing and the summary headers, and appends
    /// this kernel to the run index.
    pub fn begin_kernel(
        &mut self,
        mut kernel: KernelDescriptor,
        allocations: &[MemAllocation],
    ) -> eyre::Result<KernelSession> {
        eyre::ensure!(
            kernel.grid.z == 1,
            "grid z dimension must be 1, got {}",
            kernel.grid.z
        );

        // resource usage for kernels launched without metadata
        if kernel.num_registers == 0 && kernel.shared_mem_bytes == 0 {
            if let Some(info) = self.config.kernel_info.get(&kernel.name) {
                kernel.num_registers = info.num_registers;
                kernel.shared_mem_bytes = info.shared_mem_bytes;
            }
        }

        let occupancy = occupancy::max_resident_blocks(
            &self.config.compute_version,
            &self.limits,
            &kernel,
        );

        let instance = {
            let count = self.instance_counts.entry(kernel.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let directory = self
            .config
            .trace_path
            .join(format!("{}_{}", kernel.name, instance));
        std::fs::create_dir_all(&directory)
            .wrap_err_with(|| format!("could not create trace directory {directory:?}"))?;

        let index_path = self.config.trace_path.join("index.txt");
        let mut index = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .wrap_err_with(|| format!("could not open run index {index_path:?}"))?;
        writeln!(index, "{} {}", kernel.name, directory.display())?;

        let data_path = directory.join("data.txt");
        let mut data = std::fs::File::create(&data_path)
            .wrap_err_with(|| format!("could not create {data_path:?}"))?;
        for allocation in allocations {
            writeln!(data, "{:#018x} {}", allocation.device_ptr, allocation.num_bytes)?;
        }

        let header = format!(
            "trace_version {TRACE_FORMAT_VERSION}\nkernel {}\nnum_warps {}\noccupancy {}\n",
            kernel.name,
            kernel.num_total_warps(),
            occupancy,
        );
        let summary_path = directory.join(format!("{}.txt", self.config.trace_name));
        let mut summary_txt = std::fs::File::create(&summary_path)
            .wrap_err_with(|| format!("could not create {summary_path:?}"))?;
        summary_txt.write_all(header.as_bytes())?;
        let mut summary_sink =
            CompressedSink::create(directory.join(format!("{}.txt.bz2", self.config.trace_name)))?;
        summary_sink.write_all(header.as_bytes());

        log::debug!(
            "tracing kernel {} (grid {}, block {}, occupancy {occupancy}) into {directory:?}",
            kernel.name,
            kernel.grid,
            kernel.block,
        );

        Ok(KernelSession {
            kernel,
            directory,
            occupancy,
            processor: WarpEventProcessor::new(),
            open_slots: BTreeMap::new(),
            current_block: None,
            summary_txt,
            summary_sink,
            total_instructions: 0,
        })
    }
}

/// Per-kernel trace session.
///
/// Owns the classification cache, the warp slots of the currently executing
/// block and the summary streams. Dropped and rebuilt on the next launch;
/// there are no ambient globals.
pub struct KernelSession {
    kernel: KernelDescriptor,
    directory: PathBuf,
    occupancy: usize,
    processor: WarpEventProcessor,
    /// Warp slots of the currently executing block, keyed by warp index.
    open_slots: BTreeMap<u64, WarpSlot>,
    current_block: Option<u64>,
    summary_txt: std::fs::File,
    summary_sink: CompressedSink,
    total_instructions: u64,
}

impl KernelSession {
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn num_instructions(&self) -> u64 {
        self.total_instructions
    }

    /// Process one dynamic event.
    ///
    /// This is the single entry point for the kernel-boundary heuristic:
    /// there is no explicit end-of-block signal, so observing a new block id
    /// flushes and closes every warp slot of the previous block. Swapping
    /// the heuristic for an explicit boundary signal only touches this
    /// method.
    pub fn observe_event(&mut self, event: &InstructionEvent) -> eyre::Result<()> {
        let block_id = self.kernel.linear_block_id(event.block);
        if self.current_block != Some(block_id) {
            if self.current_block.is_some() {
                self.flush_open_block()?;
            }
            self.current_block = Some(block_id);
        }

        let mut emitted = Vec::new();
        self.processor
            .process(event, |warp, record| emitted.push((warp as u64, record)));
        for (warp, record) in emitted {
            self.append_record(block_id, warp, &record)?;
        }
        Ok(())
    }

    fn append_record(&mut self, block_id: u64, warp: u64, record: &TraceRecord) -> eyre::Result<()> {
        let slot = match self.open_slots.entry(warp) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let slot_id = (block_id << 16) | warp;
                entry.insert(WarpSlot::create(&self.directory, slot_id)?)
            }
        };
        slot.append(record);

        // counts emitted records, not dynamic instructions (see DESIGN.md)
        self.total_instructions += 1;
        if self.total_instructions > MAX_TRACE_INSTRUCTIONS {
            log::error!(
                "kernel {} exceeded {MAX_TRACE_INSTRUCTIONS} trace records",
                self.kernel.name
            );
            panic!("trace instruction ceiling exceeded");
        }
        Ok(())
    }

    /// Flush and close every warp slot of the previous block, appending
    /// per-warp summaries in warp-index order.
    fn flush_open_block(&mut self) -> eyre::Result<()> {
        let slots = std::mem::take(&mut self.open_slots);
        for (_, slot) in slots {
            let (id, count) = slot.finish();
            let line = format!("{id} {count}\n");
            self.summary_txt.write_all(line.as_bytes())?;
            self.summary_sink.write_all(line.as_bytes());
        }
        Ok(())
    }

    /// Flush whichever block is still open and close the summary streams.
    pub fn finalize(mut self) -> eyre::Result<()> {
        self.flush_open_block()?;
        self.summary_txt.flush()?;
        self.summary_sink.finish();
        log::debug!(
            "finalized kernel {}: {} trace records",
            self.kernel.name,
            self.total_instructions
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TraceRun;
    use crate::config::{Config, KernelInfoTable};
    use crate::dim::Dim;
    use crate::instruction::{DecodedInstruction, MemorySpace, Operand, PredicateGuard};
    use crate::model::{InstructionEvent, KernelDescriptor, MemAllocation, MemoryPayload};
    use crate::opcodes::{DataType, PtxOp};
    use pretty_assertions_sorted::assert_eq;
    use smallvec::smallvec;
    use std::path::Path;

    fn test_config(trace_path: &Path) -> Config {
        Config {
            trace_path: trace_path.to_path_buf(),
            trace_name: "Trace".to_string(),
            compute_version: "2.0".to_string(),
            kernel_info: KernelInfoTable::default(),
        }
    }

    fn small_kernel(name: &str) -> KernelDescriptor {
        KernelDescriptor {
            name: name.to_string(),
            grid: Dim::new(2, 1, 1),
            block: Dim::new(32, 1, 1),
            num_registers: 16,
            shared_mem_bytes: 0,
        }
    }

    fn add_event(block: Dim) -> InstructionEvent {
        InstructionEvent {
            block,
            pc: 0,
            instruction: DecodedInstruction {
                op: PtxOp::ADD,
                dtype: DataType::S32,
                sources: smallvec![Operand::register(2), Operand::register(3)],
                dest: Some(Operand::register(1)),
                dest_pred: None,
                guard: PredicateGuard::None,
                mem_space: None,
            },
            active_mask: std::iter::repeat(true).take(32).collect(),
            memory: None,
            branch: None,
        }
    }

    fn summary_lines(directory: &Path) -> Vec<String> {
        let text = std::fs::read_to_string(directory.join("Trace.txt")).unwrap();
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn block_change_flushes_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = TraceRun::new(test_config(dir.path()));
        let mut session = run
            .begin_kernel(small_kernel("boundary"), &[])
            .unwrap();

        // block 0, block 1, then block 0 again
        session.observe_event(&add_event(Dim::new(0, 0, 0))).unwrap();
        session.observe_event(&add_event(Dim::new(1, 0, 0))).unwrap();
        session.observe_event(&add_event(Dim::new(0, 0, 0))).unwrap();
        let directory = session.directory().to_path_buf();
        session.finalize().unwrap();

        let lines = summary_lines(&directory);
        assert_eq!(
            lines,
            vec![
                "trace_version 1".to_string(),
                "kernel boundary".to_string(),
                "num_warps 2".to_string(),
                "occupancy 8".to_string(),
                // block 0 flushed once when block 1 appeared
                "0 1".to_string(),
                // block 1 flushed when block 0 recurred
                "65536 1".to_string(),
                // the recurring block 0 flushed only at finalize
                "0 1".to_string(),
            ]
        );
    }

    #[test]
    fn split_access_counts_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = TraceRun::new(test_config(dir.path()));
        let mut session = run.begin_kernel(small_kernel("split"), &[]).unwrap();

        // two active lanes touching far-apart addresses: one dynamic
        // instruction, two emitted records
        let mut active = vec![false; 32];
        active[0] = true;
        active[1] = true;
        let event = InstructionEvent {
            block: Dim::new(0, 0, 0),
            pc: 4,
            instruction: DecodedInstruction {
                op: PtxOp::LD,
                dtype: DataType::F32,
                sources: smallvec![Operand::indirect(8)],
                dest: Some(Operand::register(1)),
                dest_pred: None,
                guard: PredicateGuard::None,
                mem_space: Some(MemorySpace::Global),
            },
            active_mask: active.into_iter().collect(),
            memory: Some(MemoryPayload {
                addresses: vec![0x1000, 0x8000],
                size: 4,
            }),
            branch: None,
        };
        session.observe_event(&event).unwrap();
        assert_eq!(session.num_instructions(), 2);

        let directory = session.directory().to_path_buf();
        session.finalize().unwrap();
        let lines = summary_lines(&directory);
        assert_eq!(lines.last().unwrap(), "0 2");
    }

    #[test]
    fn writes_allocation_listing_and_run_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = TraceRun::new(test_config(dir.path()));
        let allocations = [
            MemAllocation {
                device_ptr: 0xc000_0000,
                num_bytes: 4096,
            },
            MemAllocation {
                device_ptr: 0xc000_2000,
                num_bytes: 256,
            },
        ];
        let session = run.begin_kernel(small_kernel("alloc"), &allocations).unwrap();
        let directory = session.directory().to_path_buf();
        session.finalize().unwrap();

        let data = std::fs::read_to_string(directory.join("data.txt")).unwrap();
        assert_eq!(
            data,
            "0x00000000c0000000 4096\n0x00000000c0002000 256\n"
        );

        // a second launch of the same kernel gets its own directory
        let session = run.begin_kernel(small_kernel("alloc"), &[]).unwrap();
        assert_ne!(session.directory(), directory);
        session.finalize().unwrap();

        let index = std::fs::read_to_string(dir.path().join("index.txt")).unwrap();
        let lines: Vec<_> = index.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("alloc "));
        assert!(lines[0].ends_with("alloc_1"));
        assert!(lines[1].ends_with("alloc_2"));
    }

    #[test]
    fn warp_trace_files_are_created_per_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = TraceRun::new(test_config(dir.path()));
        let mut session = run.begin_kernel(small_kernel("files"), &[]).unwrap();

        session.observe_event(&add_event(Dim::new(0, 0, 0))).unwrap();
        session.observe_event(&add_event(Dim::new(1, 0, 0))).unwrap();
        let directory = session.directory().to_path_buf();
        session.finalize().unwrap();

        assert!(directory.join("0.bz2").is_file());
        assert!(directory.join("65536.bz2").is_file());
        assert!(directory.join("Trace.txt.bz2").is_file());

        // the warp stream decompresses to whole records
        use std::io::Read;
        let file = std::fs::File::open(directory.join("0.bz2")).unwrap();
        let mut decoder = bzip2::read::MultiBzDecoder::new(file);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), crate::record::RECORD_BYTES);
        assert_eq!(bytes[0], crate::opcodes::TraceOpcode::INT_ALU as u8);
    }

    #[test]
    fn kernel_info_fills_missing_resources() {
        let dir = tempfile::tempdir().unwrap();
        let info_path = dir.path().join("kernel_info.txt");
        std::fs::write(&info_path, "filled 32 0\n").unwrap();

        let mut config = test_config(dir.path());
        config.kernel_info = KernelInfoTable::load(&info_path).unwrap();
        let mut run = TraceRun::new(config);

        let mut kernel = small_kernel("filled");
        kernel.block = Dim::new(256, 1, 1);
        kernel.num_registers = 0;
        let session = run.begin_kernel(kernel, &[]).unwrap();
        // 32 regs/thread over a 256-thread block limits occupancy to 4
        assert_eq!(session.occupancy(), 4);
        session.finalize().unwrap();
    }

    #[test]
    fn rejects_3d_grids() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = TraceRun::new(test_config(dir.path()));
        let mut kernel = small_kernel("grid3d");
        kernel.grid = Dim::new(2, 2, 2);
        assert!(run.begin_kernel(kernel, &[]).is_err());
    }
}

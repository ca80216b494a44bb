use bitflags::bitflags;

// Facts recorded on a block while it is built and linked.
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        const HAS_RETURN = 0x1;
        const HAS_THROW = 0x2;
        const HAS_GOTO = 0x4;
        const HAS_DEAD_CODE = 0x8;
        const TRY_BLOCK = 0x10;
        const CATCH_BLOCK = 0x20;
    }
}

/// A run of consecutive method lines with a single entry point.
///
/// `lines` are indices into the owning class' line arena. Edges are indices into
/// the owning method's block vector, kept in insertion order without duplicates.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    index: usize,
    lines: Vec<usize>,
    successors: Vec<usize>,
    predecessors: Vec<usize>,
    flags: BlockFlags,
    label: Option<usize>,
}

impl BasicBlock {
    pub(crate) fn new(index: usize, lines: Vec<usize>, flags: BlockFlags) -> BasicBlock {
        BasicBlock {
            index,
            lines,
            successors: vec![],
            predecessors: vec![],
            flags,
            label: None,
        }
    }

    /// Position of this block within its method.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    pub fn successors(&self) -> &[usize] {
        &self.successors
    }

    pub fn predecessors(&self) -> &[usize] {
        &self.predecessors
    }

    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    pub fn has_return(&self) -> bool {
        self.flags.contains(BlockFlags::HAS_RETURN)
    }

    pub fn has_throw(&self) -> bool {
        self.flags.contains(BlockFlags::HAS_THROW)
    }

    pub fn has_goto(&self) -> bool {
        self.flags.contains(BlockFlags::HAS_GOTO)
    }

    pub fn has_dead_code(&self) -> bool {
        self.flags.contains(BlockFlags::HAS_DEAD_CODE)
    }

    pub fn is_try_block(&self) -> bool {
        self.flags.contains(BlockFlags::TRY_BLOCK)
    }

    pub fn is_catch_block(&self) -> bool {
        self.flags.contains(BlockFlags::CATCH_BLOCK)
    }

    /// Discovery order from the method entry, `None` if never reached.
    pub fn dfs_label(&self) -> Option<usize> {
        self.label
    }

    pub(crate) fn set_label(&mut self, label: Option<usize>) {
        self.label = label;
    }

    pub(crate) fn insert_flags(&mut self, flags: BlockFlags) {
        self.flags.insert(flags);
    }

    pub(crate) fn add_successor(&mut self, block: usize) {
        if !self.successors.contains(&block) {
            self.successors.push(block);
        }
    }

    pub(crate) fn add_predecessor(&mut self, block: usize) {
        if !self.predecessors.contains(&block) {
            self.predecessors.push(block);
        }
    }
}

/// Adds the edge `from -> to` on both ends. Duplicates are ignored.
pub(crate) fn link(blocks: &mut [BasicBlock], from: usize, to: usize) {
    blocks[from].add_successor(to);
    blocks[to].add_predecessor(from);
}

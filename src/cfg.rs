//! Control flow graph construction for a single method.
//!
//! Blocks are cut at leaders: the first line of the method, the line after every
//! `goto`, and every line some branch, switch table or catch handler names as a
//! target. Links collected from the instructions are then resolved into edges
//! between the blocks holding their two ends, exception handlers are wired to
//! every block of the range they guard, and textually adjacent blocks are joined
//! unless the first one ends in `goto`, `return` or `throw`.

use rangemap::RangeInclusiveMap;
use std::collections::{BTreeSet, HashMap};

use crate::basic_block::{link, BasicBlock, BlockFlags};
use crate::code_line::CodeLine;
use crate::error::CfgError;
use crate::instruction::{parse_switch_entry, InstructionType};

/// A candidate edge between two lines of a method, collected before blocks exist.
/// Both ends are positions within the method's line list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub(crate) from: usize,
    pub(crate) to: usize,
    /// The not-taken side of a conditional branch. It becomes an edge but does not
    /// cut a block, so the branch and its next line share a block and the edge
    /// shows up as a self-edge on that block. A self-edge alone does not mean a loop.
    pub(crate) fall_through: bool,
}

/// A guarded range and the handlers protecting it, taken from the `.catch` /
/// `.catchall` directives that share the same `{:start .. :end}` range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlock {
    begin_pos: usize,
    end_pos: usize,
    last_protected_pos: usize,
    begin_line_nr: usize,
    end_line_nr: usize,
    last_protected_line_nr: usize,
    catch_pos: Vec<usize>,
    catch_lines: Vec<usize>,
}

impl TryBlock {
    /// Line number of the `:try_start` label.
    pub fn begin_line_nr(&self) -> usize {
        self.begin_line_nr
    }

    /// Line number of the `:try_end` label.
    pub fn end_line_nr(&self) -> usize {
        self.end_line_nr
    }

    /// Line number of the last instruction inside the range, or of the end label if there is none.
    pub fn last_protected_line_nr(&self) -> usize {
        self.last_protected_line_nr
    }

    /// Handler label lines, as indices into the class line arena, in directive order.
    pub fn catch_targets(&self) -> &[usize] {
        &self.catch_lines
    }
}

pub(crate) struct MethodCfg {
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) try_blocks: Vec<TryBlock>,
}

/// Builds the basic blocks of one method. `lines` are the method's lines as
/// indices into `arena`, from `.method` to `.end method`.
pub(crate) fn build(arena: &[CodeLine], lines: &[usize]) -> Result<MethodCfg, CfgError> {
    let mut builder = CfgBuilder::new(arena, lines);
    builder.collect_branch_links()?;
    builder.collect_try_links()?;
    builder.collect_leaders();
    let groups = builder.partition();
    let mut blocks: Vec<BasicBlock> = groups
        .iter()
        .enumerate()
        .map(|(i, g)| builder.make_block(i, g))
        .collect();
    builder.link_blocks(&groups, &mut blocks)?;
    Ok(MethodCfg { blocks, try_blocks: builder.try_blocks })
}

struct CfgBuilder<'a> {
    arena: &'a [CodeLine],
    lines: &'a [usize],
    labels: HashMap<&'a [u8], usize>,
    /// Lines belonging to a switch table, which are data and never part of a block
    payload: Vec<bool>,
    links: Vec<Link>,
    leaders: BTreeSet<usize>,
    try_blocks: Vec<TryBlock>,
}

impl<'a> CfgBuilder<'a> {
    fn new(arena: &'a [CodeLine], lines: &'a [usize]) -> CfgBuilder<'a> {
        let mut labels = HashMap::new();
        let mut payload = vec![false; lines.len()];
        let mut table_end: Option<&'static [u8]> = None;

        for (pos, ix) in lines.iter().enumerate() {
            let line = &arena[*ix];
            if let Some(end) = table_end {
                payload[pos] = true;
                if line.starts_with(end) {
                    table_end = None;
                }
                continue;
            }
            if line.starts_with(b".packed-switch") {
                payload[pos] = true;
                table_end = Some(&b".end packed-switch"[..]);
            } else if line.starts_with(b".sparse-switch") {
                payload[pos] = true;
                table_end = Some(&b".end sparse-switch"[..]);
            } else if line.instruction().kind() == InstructionType::Label {
                if let Some(name) = line.instruction().label() {
                    labels.entry(name).or_insert(pos);
                }
            }
        }

        CfgBuilder {
            arena,
            lines,
            labels,
            payload,
            links: vec![],
            leaders: BTreeSet::from([0]),
            try_blocks: vec![],
        }
    }

    fn line(&self, pos: usize) -> &'a CodeLine {
        &self.arena[self.lines[pos]]
    }

    fn kind(&self, pos: usize) -> InstructionType {
        self.line(pos).instruction().kind()
    }

    fn resolve(&self, label: &[u8]) -> Result<usize, CfgError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| err!("Unresolved label {}", String::from_utf8_lossy(label)))
    }

    fn add_link(&mut self, link: Link) {
        if !self.links.contains(&link) {
            self.links.push(link);
        }
    }

    /// Links for `goto`, `if-*` and switch instructions.
    fn collect_branch_links(&mut self) -> Result<(), CfgError> {
        let n = self.lines.len();
        for pos in 0..n {
            if self.payload[pos] {
                continue;
            }
            let line = self.line(pos);
            let instruction = line.instruction();
            match instruction.kind() {
                InstructionType::Goto | InstructionType::Jmp => {
                    let label = match instruction.label() {
                        Some(l) => l,
                        None => fail!("Branch without target on line {}", line.line_nr()),
                    };
                    let target = self.resolve(label)?;
                    self.add_link(Link { from: pos, to: target, fall_through: false });
                    if instruction.kind() == InstructionType::Goto {
                        if pos + 1 < n {
                            self.leaders.insert(pos + 1);
                        }
                    } else if pos + 1 < n {
                        self.add_link(Link { from: pos, to: pos + 1, fall_through: true });
                    }
                }
                InstructionType::Switch => {
                    let label = match instruction.label() {
                        Some(l) => l,
                        None => fail!("Switch without table on line {}", line.line_nr()),
                    };
                    let table = self.resolve(label)?;
                    for target in self.switch_targets(table)? {
                        self.add_link(Link { from: pos, to: target, fall_through: false });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolves every entry of the switch table following the label at `label_pos`.
    fn switch_targets(&self, label_pos: usize) -> Result<Vec<usize>, CfgError> {
        let n = self.lines.len();
        let table_label = self.line(label_pos);
        let mut pos = label_pos + 1;
        while pos < n
            && !self.payload[pos]
            && matches!(self.kind(pos), InstructionType::Label | InstructionType::Comment | InstructionType::Empty)
        {
            pos += 1;
        }
        if pos >= n || !self.payload[pos] {
            fail!("Switch table {} has no payload", String::from_utf8_lossy(table_label.bytes()));
        }

        let mut targets = vec![];
        pos += 1;
        while pos < n && self.payload[pos] {
            let line = self.line(pos);
            if line.starts_with(b".end packed-switch") || line.starts_with(b".end sparse-switch") {
                return Ok(targets);
            }
            if !line.bytes().is_empty() && !line.starts_with(b"#") {
                let label = match parse_switch_entry(line.bytes()) {
                    Ok((_, l)) => l,
                    Err(_) => fail!("Malformed switch entry on line {}", line.line_nr()),
                };
                targets.push(self.resolve(label)?);
            }
            pos += 1;
        }
        fail!("Unterminated switch table {}", String::from_utf8_lossy(table_label.bytes()))
    }

    /// Links and [`TryBlock`]s for `.catch` / `.catchall` directives. The last
    /// instruction of the guarded range is linked to every handler and to the first
    /// line after the directives following the end label, even when that
    /// instruction is a return. Lines after it, up to the end label, are not guarded.
    fn collect_try_links(&mut self) -> Result<(), CfgError> {
        let n = self.lines.len();
        for pos in 0..n {
            let line = self.line(pos);
            let catch = match line.instruction().catch_directive() {
                Some(c) => c,
                None => continue,
            };
            let begin = self.resolve(&catch.start)?;
            let end = self.resolve(&catch.end)?;
            let handler = self.resolve(&catch.handler)?;
            if begin > end {
                fail!("Try range ends before it starts on line {}", line.line_nr());
            }

            let ix = match self.try_blocks.iter().position(|t| t.begin_pos == begin && t.end_pos == end) {
                Some(ix) => ix,
                None => {
                    let last_protected = (begin..=end)
                        .rev()
                        .find(|p| self.kind(*p).is_code())
                        .unwrap_or(end);
                    self.try_blocks.push(TryBlock {
                        begin_pos: begin,
                        end_pos: end,
                        last_protected_pos: last_protected,
                        begin_line_nr: self.line(begin).line_nr(),
                        end_line_nr: self.line(end).line_nr(),
                        last_protected_line_nr: self.line(last_protected).line_nr(),
                        catch_pos: vec![],
                        catch_lines: vec![],
                    });
                    self.try_blocks.len() - 1
                }
            };
            let try_block = &mut self.try_blocks[ix];
            if !try_block.catch_pos.contains(&handler) {
                try_block.catch_pos.push(handler);
                try_block.catch_lines.push(self.lines[handler]);
            }
            let from = try_block.last_protected_pos;

            let mut after = end + 1;
            while after < n
                && matches!(self.kind(after), InstructionType::Catch | InstructionType::Comment | InstructionType::Empty)
            {
                after += 1;
            }
            if after < n {
                self.add_link(Link { from, to: after, fall_through: false });
            }
            self.add_link(Link { from, to: handler, fall_through: false });
        }
        Ok(())
    }

    fn collect_leaders(&mut self) {
        for link in &self.links {
            if !link.fall_through {
                self.leaders.insert(link.to);
            }
        }
        for try_block in &self.try_blocks {
            self.leaders.extend(try_block.catch_pos.iter().copied());
        }
    }

    /// Cuts the method into groups of line positions. Switch tables are left out,
    /// and a group without any instruction is carried into the next one (or the
    /// previous one at the end of the method).
    fn partition(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = vec![];
        let mut pending: Vec<usize> = vec![];
        let mut current: Vec<usize> = vec![];

        for pos in 0..self.lines.len() {
            if self.payload[pos] {
                continue;
            }
            if self.leaders.contains(&pos) && !current.is_empty() {
                self.close_group(&mut groups, &mut pending, std::mem::take(&mut current));
            }
            current.push(pos);
        }
        if !current.is_empty() {
            self.close_group(&mut groups, &mut pending, current);
        }
        if !pending.is_empty() {
            if let Some(last) = groups.last_mut() {
                last.extend(pending);
            }
        }
        groups
    }

    fn close_group(&self, groups: &mut Vec<Vec<usize>>, pending: &mut Vec<usize>, group: Vec<usize>) {
        if group.iter().any(|p| self.kind(*p).is_code()) {
            let mut merged = std::mem::take(pending);
            merged.extend(group);
            groups.push(merged);
        } else {
            pending.extend(group);
        }
    }

    fn make_block(&self, index: usize, group: &[usize]) -> BasicBlock {
        let mut flags = BlockFlags::empty();
        let mut returns = 0;
        let mut last = None;
        for pos in group {
            let kind = self.kind(*pos);
            if !kind.is_code() {
                continue;
            }
            match kind {
                InstructionType::Return => {
                    returns += 1;
                    flags.insert(BlockFlags::HAS_RETURN);
                }
                InstructionType::Throw => flags.insert(BlockFlags::HAS_THROW),
                InstructionType::Goto => flags.insert(BlockFlags::HAS_GOTO),
                _ => {}
            }
            last = Some(kind);
        }
        if returns > 1 || (returns == 1 && last != Some(InstructionType::Return)) {
            flags.insert(BlockFlags::HAS_DEAD_CODE);
        }
        let lines = group.iter().map(|p| self.lines[*p]).collect();
        BasicBlock::new(index, lines, flags)
    }

    /// The last instruction of a group, skipping labels, directives and comments.
    fn last_instruction(&self, group: &[usize]) -> Option<InstructionType> {
        group.iter().rev().map(|p| self.kind(*p)).find(|k| k.is_code())
    }

    fn link_blocks(&self, groups: &[Vec<usize>], blocks: &mut [BasicBlock]) -> Result<(), CfgError> {
        let mut block_of_line = RangeInclusiveMap::new();
        for (i, group) in groups.iter().enumerate() {
            if let (Some(first), Some(last)) = (group.first(), group.last()) {
                block_of_line.insert(*first..=*last, i);
            }
        }
        let block_of = |pos: usize| -> Result<usize, CfgError> {
            match block_of_line.get(&pos) {
                Some(b) => Ok(*b),
                None => Err(err!("Line {} is outside every block", self.line(pos).line_nr())),
            }
        };

        for l in &self.links {
            link(blocks, block_of(l.from)?, block_of(l.to)?);
        }

        for try_block in &self.try_blocks {
            let guarded: Vec<usize> = block_of_line
                .overlapping(&(try_block.begin_pos..=try_block.last_protected_pos))
                .map(|(_, b)| *b)
                .collect();
            for handler in &try_block.catch_pos {
                let target = block_of(*handler)?;
                for source in &guarded {
                    link(blocks, *source, target);
                    blocks[*source].insert_flags(BlockFlags::TRY_BLOCK);
                }
                blocks[target].insert_flags(BlockFlags::CATCH_BLOCK);
            }
        }

        for i in 1..groups.len() {
            match self.last_instruction(&groups[i - 1]) {
                Some(kind) if !kind.ends_flow() => link(blocks, i - 1, i),
                _ => {}
            }
        }
        Ok(())
    }
}

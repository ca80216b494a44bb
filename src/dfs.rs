//! Reachability labelling of a method's basic blocks.

use log::debug;

use crate::method::Method;

/// Numbers the blocks reachable from the method entry in depth-first discovery
/// order, following successors in the order they were added. Blocks that are
/// never reached keep no label and mark the method as having unlinked blocks.
///
/// Returns the number of blocks that were reached.
pub fn label(method: &mut Method) -> usize {
    let blocks = method.blocks_mut();
    for block in blocks.iter_mut() {
        block.set_label(None);
    }
    if blocks.is_empty() {
        method.set_unlinked_blocks(false);
        return 0;
    }

    let mut next = 0;
    blocks[0].set_label(Some(next));
    next += 1;

    // (block, index of the next successor to visit)
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    while let Some(&(block, child)) = stack.last() {
        match blocks[block].successors().get(child).copied() {
            Some(successor) => {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if blocks[successor].dfs_label().is_none() {
                    blocks[successor].set_label(Some(next));
                    next += 1;
                    stack.push((successor, 0));
                }
            }
            None => {
                stack.pop();
            }
        }
    }

    let total = blocks.len();
    let unlinked = next < total;
    if unlinked {
        debug!("{} of {} blocks unreachable in {}", total - next, total, method.signature());
    }
    method.set_unlinked_blocks(unlinked);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_line::CodeLine;

    fn method(src: &str) -> (Vec<CodeLine>, Method) {
        let lines: Vec<CodeLine> = src.lines().enumerate().map(|(i, l)| CodeLine::new(l.as_bytes(), i + 1)).collect();
        let mut m = Method::new(0, &lines, (0..lines.len()).collect());
        m.generate_bbs(&lines).unwrap();
        (lines, m)
    }

    fn labels(m: &Method) -> Vec<Option<usize>> {
        m.blocks().iter().map(|b| b.dfs_label()).collect()
    }

    #[test]
    fn depth_first_order() {
        // B0 -> B1 (branch), B0 -> B2 (goto), B1 -> B2
        let (_, mut m) = method(
            ".method public foo(I)V\n\
             if-eqz p1, :cond_0\n\
             goto :goto_0\n\
             :cond_0\n\
             const/4 v0, 0x1\n\
             goto :goto_0\n\
             :goto_0\n\
             return-void\n\
             .end method",
        );
        assert_eq!(m.blocks().len(), 3);
        assert_eq!(label(&mut m), 3);
        assert_eq!(labels(&m), vec![Some(0), Some(1), Some(2)]);
        assert!(!m.has_unlinked_blocks());
    }

    #[test]
    fn unreachable_block_stays_unlabelled() {
        let (_, mut m) = method(
            ".method public foo()V\n\
             goto :goto_1\n\
             :goto_0\n\
             nop\n\
             :goto_1\n\
             return-void\n\
             .end method",
        );
        assert_eq!(label(&mut m), 2);
        assert_eq!(labels(&m), vec![Some(0), None, Some(1)]);
        assert!(m.has_unlinked_blocks());
        assert!(m.is_probably_patched());
    }

    #[test]
    fn relabelling_is_idempotent() {
        let (_, mut m) = method(
            ".method public foo(I)V\n\
             :goto_0\n\
             if-eqz p1, :cond_0\n\
             goto :goto_0\n\
             :cond_0\n\
             return-void\n\
             .end method",
        );
        label(&mut m);
        let first = labels(&m);
        label(&mut m);
        assert_eq!(labels(&m), first);
        assert!(first.iter().all(|l| l.is_some()));
    }

    #[test]
    fn empty_method() {
        let (_, mut m) = method(".method public native foo()V\n.end method");
        assert_eq!(label(&mut m), 0);
        assert!(!m.has_unlinked_blocks());
        assert!(!m.is_probably_patched());
    }
}

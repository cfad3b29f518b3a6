//! Atomic document changes.

use super::node::{Fragment, Mark, Node, Slice};
use super::replace::replace;
use crate::error::Result;
use crate::schema::Schema;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Replace the range `from..to` with a slice.
    Replace { from: usize, to: usize, slice: Slice },
    /// Add a mark to all text in the range.
    AddMark { from: usize, to: usize, mark: Mark },
    /// Remove the mark occupying this mark's slot from all text in the range.
    RemoveMark { from: usize, to: usize, mark: Mark },
}

impl Step {
    pub fn apply(&self, schema: &Schema, doc: &Node) -> Result<Node> {
        match self {
            Step::Replace { from, to, slice } => replace(schema, doc, *from, *to, slice),
            Step::AddMark { from, to, mark } => {
                doc.check_pos(*to)?;
                Ok(map_marks(schema, doc, *from, *to, &|set| mark.add_to_set(set)))
            }
            Step::RemoveMark { from, to, mark } => {
                doc.check_pos(*to)?;
                Ok(map_marks(schema, doc, *from, *to, &|set| mark.remove_from_set(set)))
            }
        }
    }

    /// Maps a position in the document before this step to the one after.
    ///
    /// `assoc` picks the side for positions at an insertion point: negative
    /// sticks to the content before, positive to the content after.
    pub fn map(&self, pos: usize, assoc: i8) -> usize {
        match self {
            Step::Replace { from, to, slice } => map_over(pos, assoc, *from, to - from, slice.size()),
            _ => pos,
        }
    }

    /// Maps a position in the document after this step back to the one before.
    pub fn unmap(&self, pos: usize, assoc: i8) -> usize {
        match self {
            Step::Replace { from, to, slice } => map_over(pos, assoc, *from, slice.size(), to - from),
            _ => pos,
        }
    }

    /// The same step with its positions moved by `map`.
    pub fn mapped(&self, map: impl Fn(usize, i8) -> usize) -> Step {
        match self {
            Step::Replace { from, to, slice } => {
                let start = map(*from, 1);
                Step::Replace {
                    from: start,
                    to: if from == to { start } else { map(*to, -1) },
                    slice: slice.clone(),
                }
            }
            Step::AddMark { from, to, mark } => Step::AddMark {
                from: map(*from, 1),
                to: map(*to, -1),
                mark: mark.clone(),
            },
            Step::RemoveMark { from, to, mark } => Step::RemoveMark {
                from: map(*from, 1),
                to: map(*to, -1),
                mark: mark.clone(),
            },
        }
    }

    /// Start and end of the range the step covers.
    pub fn range(&self) -> (usize, usize) {
        match self {
            Step::Replace { from, to, .. }
            | Step::AddMark { from, to, .. }
            | Step::RemoveMark { from, to, .. } => (*from, *to),
        }
    }
}

/// Maps `pos` over `old_size` positions at `from` becoming `new_size`.
fn map_over(pos: usize, assoc: i8, from: usize, old_size: usize, new_size: usize) -> usize {
    let to = from + old_size;
    if pos < from {
        return pos;
    }
    if pos > to {
        return pos - old_size + new_size;
    }
    let side = if old_size == 0 {
        assoc
    } else if pos == from {
        -1
    } else if pos == to {
        1
    } else {
        assoc
    };
    if side < 0 { from } else { from + new_size }
}

fn map_marks(
    schema: &Schema,
    doc: &Node,
    from: usize,
    to: usize,
    f: &dyn Fn(&[Mark]) -> Vec<Mark>,
) -> Node {
    let content = mark_content(schema, doc.content(), 0, from, to, false, f);
    doc.copy(content)
}

fn mark_content(
    schema: &Schema,
    frag: &Fragment,
    start: usize,
    from: usize,
    to: usize,
    allow_marks: bool,
    f: &dyn Fn(&[Mark]) -> Vec<Mark>,
) -> Fragment {
    let mut out = Vec::with_capacity(frag.child_count());
    let mut pos = start;
    for child in frag.iter() {
        let end = pos + child.node_size();
        if end <= from || pos >= to {
            out.push(child.clone());
            pos = end;
            continue;
        }
        match child {
            Node::Text(t) if allow_marks => {
                let len = end - pos;
                let a = from.saturating_sub(pos);
                let b = to.min(end) - pos;
                out.push(child.cut(0, a));
                out.push(Node::text(
                    child.cut(a, b).text_str().unwrap_or_default(),
                    f(&t.marks),
                ));
                out.push(child.cut(b, len));
            }
            Node::Element(e) if !e.leaf => {
                let inner = mark_content(
                    schema,
                    &e.content,
                    pos + 1,
                    from,
                    to,
                    schema.allows_marks(&e.node_type),
                    f,
                );
                out.push(child.copy(inner));
            }
            _ => out.push(child.clone()),
        }
        pos = end;
    }
    Fragment::from_nodes(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Attrs;

    #[test]
    fn test_add_and_remove_mark() {
        let schema = Schema::basic();
        let p = schema.element(
            "paragraph",
            schema.default_attrs("paragraph"),
            vec![Node::text("world", vec![])],
        );
        let doc = schema.element("doc", Attrs::new(), vec![p]);
        let marked = Step::AddMark {
            from: 2,
            to: 4,
            mark: Mark::new("strong"),
        }
        .apply(&schema, &doc)
        .unwrap();
        assert_eq!(
            marked.to_string(),
            "doc(paragraph(\"w\", \"or\"[strong], \"ld\"))"
        );
        let unmarked = Step::RemoveMark {
            from: 0,
            to: 7,
            mark: Mark::new("strong"),
        }
        .apply(&schema, &marked)
        .unwrap();
        assert_eq!(unmarked, doc);
    }

    #[test]
    fn test_code_block_ignores_marks() {
        let schema = Schema::basic();
        let code = schema.element(
            "code_block",
            schema.default_attrs("code_block"),
            vec![Node::text("x", vec![])],
        );
        let doc = schema.element("doc", Attrs::new(), vec![code]);
        let out = Step::AddMark {
            from: 0,
            to: 3,
            mark: Mark::new("em"),
        }
        .apply(&schema, &doc)
        .unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn test_map_positions() {
        let step = Step::Replace {
            from: 3,
            to: 5,
            slice: Slice::closed(vec![Node::text("xyz", vec![])]),
        };
        assert_eq!(step.map(2, 1), 2);
        assert_eq!(step.map(3, 1), 3);
        assert_eq!(step.map(4, -1), 3);
        assert_eq!(step.map(4, 1), 6);
        assert_eq!(step.map(5, -1), 6);
        assert_eq!(step.map(9, 1), 10);

        let insert = Step::Replace {
            from: 3,
            to: 3,
            slice: Slice::closed(vec![Node::text("ab", vec![])]),
        };
        assert_eq!(insert.map(3, -1), 3);
        assert_eq!(insert.map(3, 1), 5);
        assert_eq!(insert.unmap(5, 1), 3);
        assert_eq!(insert.unmap(7, 1), 5);
    }

    #[test]
    fn test_mapped_step() {
        let insert = Step::Replace {
            from: 1,
            to: 1,
            slice: Slice::closed(vec![Node::text("zz", vec![])]),
        };
        let delete = Step::Replace {
            from: 3,
            to: 4,
            slice: Slice::empty(),
        };
        let moved = delete.mapped(|pos, assoc| insert.map(pos, assoc));
        assert_eq!(moved.range(), (5, 6));
    }
}

//! Replacing a range of a document with a possibly open slice.
//!
//! Open sides of the slice are joined onto the nodes at the edges of the
//! replaced range; every rebuilt node is checked against its content rules.

use super::node::{Fragment, Node, Slice};
use super::resolved::ResolvedPos;
use crate::error::{ReplaceError, Result};
use crate::schema::Schema;

pub fn replace(schema: &Schema, doc: &Node, from: usize, to: usize, slice: &Slice) -> Result<Node> {
    let from = ResolvedPos::resolve(doc, from)?;
    let to = ResolvedPos::resolve(doc, to)?;
    if slice.open_start > from.depth() {
        return Err(ReplaceError::TooDeep.into());
    }
    if from.depth() - slice.open_start != to.depth().saturating_sub(slice.open_end)
        || slice.open_end > to.depth()
    {
        return Err(ReplaceError::InconsistentOpenDepths.into());
    }
    Ok(replace_outer(schema, &from, &to, slice, 0)?)
}

type Replaced<T> = std::result::Result<T, ReplaceError>;

fn replace_outer(
    schema: &Schema,
    from: &ResolvedPos<'_>,
    to: &ResolvedPos<'_>,
    slice: &Slice,
    depth: usize,
) -> Replaced<Node> {
    let index = from.index(depth);
    let node = from.node(depth);
    if index == to.index(depth) && depth < from.depth() - slice.open_start {
        let inner = replace_outer(schema, from, to, slice, depth + 1)?;
        return Ok(node.copy(node.content().replace_child(index, inner)));
    }
    if slice.content.is_empty() {
        return close(schema, node, replace_two_way(schema, from, to, depth)?);
    }
    if slice.open_start == 0 && slice.open_end == 0 && from.depth() == depth && to.depth() == depth
    {
        let parent = from.parent();
        let content = parent.content();
        let joined = content
            .cut(0, from.parent_offset)
            .append(&slice.content)
            .append(&content.cut(to.parent_offset, content.size()));
        return close(schema, parent, joined);
    }
    let prepared = prepare_slice(slice, from);
    let start = ResolvedPos::resolve(&prepared.node, prepared.start)
        .map_err(|_| ReplaceError::InconsistentOpenDepths)?;
    let end = ResolvedPos::resolve(&prepared.node, prepared.end)
        .map_err(|_| ReplaceError::InconsistentOpenDepths)?;
    close(
        schema,
        node,
        replace_three_way(schema, from, &start, &end, to, depth)?,
    )
}

fn check_join(schema: &Schema, main: &Node, sub: &Node) -> Replaced<()> {
    if schema.compatible_content(main.node_type(), sub.node_type()) {
        Ok(())
    } else {
        Err(ReplaceError::CannotJoin {
            main: main.node_type().into(),
            sub: sub.node_type().into(),
        })
    }
}

fn joinable<'a>(
    schema: &Schema,
    before: &ResolvedPos<'a>,
    after: &ResolvedPos<'_>,
    depth: usize,
) -> Replaced<&'a Node> {
    let node = before.node(depth);
    check_join(schema, node, after.node(depth))?;
    Ok(node)
}

fn add_node(child: Node, target: &mut Vec<Node>) {
    if let (Node::Text(next), Some(Node::Text(last))) = (&child, target.last_mut()) {
        if next.marks == last.marks {
            last.text.push_str(&next.text);
            return;
        }
    }
    target.push(child);
}

fn add_range(
    start: Option<&ResolvedPos<'_>>,
    end: Option<&ResolvedPos<'_>>,
    depth: usize,
    target: &mut Vec<Node>,
) {
    let Some(node) = end.or(start).map(|p| p.node(depth)) else {
        return;
    };
    let mut start_index = 0;
    let end_index = end.map_or(node.child_count(), |e| e.index(depth));
    if let Some(start) = start {
        start_index = start.index(depth);
        if start.depth() > depth {
            start_index += 1;
        } else if start.text_offset() > 0 {
            if let Some(after) = start.node_after() {
                add_node(after, target);
            }
            start_index += 1;
        }
    }
    for i in start_index..end_index {
        if let Some(child) = node.child(i) {
            add_node(child.clone(), target);
        }
    }
    if let Some(end) = end {
        if end.depth() == depth && end.text_offset() > 0 {
            if let Some(before) = end.node_before() {
                add_node(before, target);
            }
        }
    }
}

fn close(schema: &Schema, node: &Node, content: Fragment) -> Replaced<Node> {
    if !schema.check_content(node.node_type(), &content) {
        return Err(ReplaceError::InvalidContent(node.node_type().into()));
    }
    Ok(node.copy(content))
}

fn replace_three_way(
    schema: &Schema,
    from: &ResolvedPos<'_>,
    start: &ResolvedPos<'_>,
    end: &ResolvedPos<'_>,
    to: &ResolvedPos<'_>,
    depth: usize,
) -> Replaced<Fragment> {
    let open_start = if from.depth() > depth {
        Some(joinable(schema, from, start, depth + 1)?)
    } else {
        None
    };
    let open_end = if to.depth() > depth {
        Some(joinable(schema, end, to, depth + 1)?)
    } else {
        None
    };

    let mut content = Vec::new();
    add_range(None, Some(from), depth, &mut content);
    match (open_start, open_end) {
        (Some(os), Some(oe)) if start.index(depth) == end.index(depth) => {
            check_join(schema, os, oe)?;
            let inner = replace_three_way(schema, from, start, end, to, depth + 1)?;
            add_node(close(schema, os, inner)?, &mut content);
        }
        _ => {
            if let Some(os) = open_start {
                let inner = replace_two_way(schema, from, start, depth + 1)?;
                add_node(close(schema, os, inner)?, &mut content);
            }
            add_range(Some(start), Some(end), depth, &mut content);
            if let Some(oe) = open_end {
                let inner = replace_two_way(schema, end, to, depth + 1)?;
                add_node(close(schema, oe, inner)?, &mut content);
            }
        }
    }
    add_range(Some(to), None, depth, &mut content);
    Ok(Fragment::from_nodes(content))
}

fn replace_two_way(
    schema: &Schema,
    from: &ResolvedPos<'_>,
    to: &ResolvedPos<'_>,
    depth: usize,
) -> Replaced<Fragment> {
    let mut content = Vec::new();
    add_range(None, Some(from), depth, &mut content);
    if from.depth() > depth {
        let node = joinable(schema, from, to, depth + 1)?;
        let inner = replace_two_way(schema, from, to, depth + 1)?;
        add_node(close(schema, node, inner)?, &mut content);
    }
    add_range(Some(to), None, depth, &mut content);
    Ok(Fragment::from_nodes(content))
}

struct PreparedSlice {
    node: Node,
    start: usize,
    end: usize,
}

/// Wraps the slice content in copies of the ancestors along `along` so that
/// its open sides can be resolved like a document.
fn prepare_slice(slice: &Slice, along: &ResolvedPos<'_>) -> PreparedSlice {
    let extra = along.depth() - slice.open_start;
    let mut node = along.node(extra).copy(slice.content.clone());
    for depth in (0..extra).rev() {
        node = along.node(depth).copy(Fragment::from_nodes(vec![node]));
    }
    let size = node.content_size();
    PreparedSlice {
        node,
        start: slice.open_start + extra,
        end: size - slice.open_end - extra,
    }
}

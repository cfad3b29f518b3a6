//! Content expressions and matching.
//!
//! An expression is a sequence of terms like `paragraph block*`. Each term
//! names a node type or a group and carries a repetition (`*`, `+`, `?` or
//! exactly once). Matching is greedy term by term.

use std::collections::VecDeque;

use smol_str::SmolStr;

use crate::schema::Schema;

/// One term of a content expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTerm {
    /// Node types accepted by this term, group members already expanded.
    pub types: Vec<SmolStr>,
    pub min: usize,
    pub max: Option<usize>,
}

impl ContentTerm {
    fn has_room(&self, count: usize) -> bool {
        self.max.is_none_or(|max| count < max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentExpr {
    terms: Vec<ContentTerm>,
}

/// Accepts nothing; stands in for types the schema does not know.
pub(crate) static EMPTY_EXPR: ContentExpr = ContentExpr { terms: Vec::new() };

impl ContentExpr {
    /// Parses an expression.
    ///
    /// `resolve` expands a name into the node types it stands for; a name
    /// that resolves to nothing produces a term that never matches.
    pub fn parse<F>(src: &str, resolve: F) -> Self
    where
        F: Fn(&str) -> Vec<SmolStr>,
    {
        let terms = src
            .split_whitespace()
            .map(|word| {
                let (name, min, max) = match word.as_bytes().last() {
                    Some(b'*') => (&word[..word.len() - 1], 0, None),
                    Some(b'+') => (&word[..word.len() - 1], 1, None),
                    Some(b'?') => (&word[..word.len() - 1], 0, Some(1)),
                    _ => (word, 1, Some(1)),
                };
                let types = resolve(name);
                if types.is_empty() {
                    tracing::warn!("content expression {src:?} names unknown type {name}");
                }
                ContentTerm { types, min, max }
            })
            .collect();
        Self { terms }
    }

    pub fn terms(&self) -> &[ContentTerm] {
        &self.terms
    }

    /// Leaf nodes have no content expression.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Whether any term accepts the given type.
    pub fn mentions(&self, node_type: &str) -> bool {
        self.terms
            .iter()
            .any(|t| t.types.iter().any(|ty| ty == node_type))
    }

    pub fn start(&self) -> ContentMatch<'_> {
        ContentMatch {
            expr: self,
            term: 0,
            count: 0,
        }
    }
}

/// A position inside a content expression.
#[derive(Debug, Clone, Copy)]
pub struct ContentMatch<'a> {
    expr: &'a ContentExpr,
    term: usize,
    count: usize,
}

impl PartialEq for ContentMatch<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.expr, other.expr) && self.term == other.term && self.count == other.count
    }
}

impl<'a> ContentMatch<'a> {
    /// Advances past one node of the given type.
    pub fn match_type(&self, node_type: &str) -> Option<ContentMatch<'a>> {
        let terms = &self.expr.terms;
        let mut term = self.term;
        let mut count = self.count;
        while term < terms.len() {
            let t = &terms[term];
            if t.has_room(count) && t.types.iter().any(|ty| ty == node_type) {
                return Some(ContentMatch {
                    expr: self.expr,
                    term,
                    count: count + 1,
                });
            }
            if count < t.min {
                return None;
            }
            term += 1;
            count = 0;
        }
        None
    }

    /// Advances past a sequence of node types.
    pub fn match_types<'t, I>(&self, types: I) -> Option<ContentMatch<'a>>
    where
        I: IntoIterator<Item = &'t str>,
    {
        let mut m = *self;
        for ty in types {
            m = m.match_type(ty)?;
        }
        Some(m)
    }

    /// Whether the content may end here.
    pub fn valid_end(&self) -> bool {
        let terms = &self.expr.terms;
        let Some(current) = terms.get(self.term) else {
            return true;
        };
        self.count >= current.min && terms[self.term + 1..].iter().all(|t| t.min == 0)
    }

    /// Node types that may come next, in expression order.
    pub fn next_types(&self) -> Vec<&'a SmolStr> {
        let terms = &self.expr.terms;
        let mut out: Vec<&'a SmolStr> = Vec::new();
        let mut term = self.term;
        let mut count = self.count;
        while term < terms.len() {
            let t = &terms[term];
            if t.has_room(count) {
                for ty in &t.types {
                    if !out.contains(&ty) {
                        out.push(ty);
                    }
                }
            }
            if count < t.min {
                break;
            }
            term += 1;
            count = 0;
        }
        out
    }

    /// The first creatable non-text type that may come next.
    pub fn default_type(&self, schema: &Schema) -> Option<&'a SmolStr> {
        self.next_types()
            .into_iter()
            .find(|ty| schema.is_creatable(ty))
    }

    /// Identifies states that accept the same continuations.
    fn state_key(&self) -> (usize, usize) {
        match self.expr.terms.get(self.term) {
            Some(t) if t.max.is_none() => (self.term, self.count.min(t.min.max(1))),
            _ => (self.term, self.count),
        }
    }

    /// Minimal sequence of node types to insert here so that `after` fits,
    /// and, with `to_end`, so that the content can end afterwards.
    pub fn fill_before(
        &self,
        schema: &Schema,
        after: &[&str],
        to_end: bool,
    ) -> Option<Vec<SmolStr>> {
        let mut seen: Vec<(usize, usize)> = Vec::new();
        let mut queue: VecDeque<(ContentMatch<'a>, Vec<SmolStr>)> = VecDeque::new();
        queue.push_back((*self, Vec::new()));
        while let Some((m, types)) = queue.pop_front() {
            if let Some(end) = m.match_types(after.iter().copied()) {
                if !to_end || end.valid_end() {
                    return Some(types);
                }
            }
            let key = m.state_key();
            if seen.contains(&key) || types.len() > 8 {
                continue;
            }
            seen.push(key);
            for ty in m.next_types() {
                if !schema.is_creatable(ty) {
                    continue;
                }
                if let Some(next) = m.match_type(ty) {
                    let mut chain = types.clone();
                    chain.push(ty.clone());
                    queue.push_back((next, chain));
                }
            }
        }
        None
    }

    /// Shortest chain of wrapper types that lets `target` be placed here.
    ///
    /// Returns an empty chain when `target` fits directly.
    pub fn find_wrapping(&self, schema: &'a Schema, target: &str) -> Option<Vec<SmolStr>> {
        if self.match_type(target).is_some() {
            return Some(Vec::new());
        }
        let mut seen: Vec<&'a SmolStr> = Vec::new();
        let mut queue: VecDeque<(ContentMatch<'a>, Vec<SmolStr>)> = VecDeque::new();
        queue.push_back((*self, Vec::new()));
        while let Some((m, chain)) = queue.pop_front() {
            for ty in m.next_types() {
                if seen.contains(&ty) || !schema.is_wrapper_candidate(ty) {
                    continue;
                }
                // Nested wrappers must be able to close right after their one child.
                if !chain.is_empty() && !m.match_type(ty).is_some_and(|n| n.valid_end()) {
                    continue;
                }
                seen.push(ty);
                let Some(inner) = schema.start_match(ty) else {
                    continue;
                };
                let mut next_chain = chain.clone();
                next_chain.push(ty.clone());
                if inner.match_type(target).is_some() {
                    return Some(next_chain);
                }
                queue.push_back((inner, next_chain));
            }
        }
        None
    }
}

use super::{NodeId, Tree, DEFAULT_BRANCH_LENGTH, NO_NODE};
use crate::error::{TfResult, TreeForgeError};
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use std::sync::Arc;

struct RawNode {
    children: Vec<usize>,
    label: Option<String>,
    length: Option<f64>,
}

fn err(pos: usize, msg: impl Into<String>) -> TreeForgeError {
    TreeForgeError::Newick {
        pos,
        msg: msg.into(),
    }
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b',' | b':' | b';') || c.is_ascii_whitespace()
}

/// Reads a quoted or bare label starting at `pos`. Returns the label and the
/// position just past it.
fn read_label(bytes: &[u8], mut pos: usize) -> TfResult<(String, usize)> {
    if bytes[pos] == b'\'' {
        let start = pos;
        pos += 1;
        let mut label = Vec::new();
        loop {
            match bytes.get(pos) {
                None => return Err(err(start, "unterminated quoted label")),
                Some(b'\'') if bytes.get(pos + 1) == Some(&b'\'') => {
                    label.push(b'\'');
                    pos += 2;
                }
                Some(b'\'') => {
                    pos += 1;
                    break;
                }
                Some(&c) => {
                    label.push(c);
                    pos += 1;
                }
            }
        }
        return Ok((String::from_utf8_lossy(&label).into_owned(), pos));
    }
    let start = pos;
    while pos < bytes.len() && !is_delimiter(bytes[pos]) {
        pos += 1;
    }
    Ok((String::from_utf8_lossy(&bytes[start..pos]).into_owned(), pos))
}

fn read_number(bytes: &[u8], mut pos: usize) -> TfResult<(f64, usize)> {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    let start = pos;
    while pos < bytes.len() && !is_delimiter(bytes[pos]) {
        pos += 1;
    }
    let text = std::str::from_utf8(&bytes[start..pos]).map_err(|_| err(start, "bad utf-8"))?;
    let value: f64 = text
        .parse()
        .map_err(|_| err(start, format!("invalid branch length '{}'", text)))?;
    Ok((value, pos))
}

fn tokenize(text: &str) -> TfResult<Vec<RawNode>> {
    let bytes = text.as_bytes();
    let mut nodes: Vec<RawNode> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = 0;
    let mut finished = false;

    while pos < bytes.len() {
        let c = bytes[pos];
        match c {
            b'(' => {
                let id = nodes.len();
                nodes.push(RawNode {
                    children: Vec::new(),
                    label: None,
                    length: None,
                });
                if let Some(&parent) = open.last() {
                    nodes[parent].children.push(id);
                } else if id != 0 {
                    return Err(err(pos, "more than one top-level clade"));
                }
                open.push(id);
                current = None;
                pos += 1;
            }
            b',' => {
                if open.is_empty() {
                    return Err(err(pos, "',' outside of any clade"));
                }
                current = None;
                pos += 1;
            }
            b')' => {
                current = Some(open.pop().ok_or_else(|| err(pos, "unbalanced ')'"))?);
                pos += 1;
            }
            b':' => {
                let target = current.ok_or_else(|| err(pos, "length without a node"))?;
                let (value, next) = read_number(bytes, pos + 1)?;
                nodes[target].length = Some(value);
                pos = next;
            }
            b';' => {
                if let Some(extra) = bytes[pos + 1..].iter().position(|c| !c.is_ascii_whitespace()) {
                    return Err(err(pos + 1 + extra, "trailing text after ';'"));
                }
                finished = true;
                break;
            }
            c if c.is_ascii_whitespace() => pos += 1,
            _ => {
                let (label, next) = read_label(bytes, pos)?;
                match current {
                    // label after ')' names an internal node (e.g. support values)
                    Some(id) if !nodes[id].children.is_empty() => nodes[id].label = Some(label),
                    Some(_) => return Err(err(pos, "two labels for one node")),
                    None => {
                        let parent = *open.last().ok_or_else(|| err(pos, "leaf outside of any clade"))?;
                        let id = nodes.len();
                        nodes.push(RawNode {
                            children: Vec::new(),
                            label: Some(label),
                            length: None,
                        });
                        nodes[parent].children.push(id);
                        current = Some(id);
                    }
                }
                pos = next;
            }
        }
    }

    if !open.is_empty() {
        return Err(err(pos, "unbalanced '('"));
    }
    if !finished {
        return Err(err(pos, "missing terminating ';'"));
    }
    if nodes.is_empty() {
        return Err(err(0, "empty tree"));
    }
    Ok(nodes)
}

/// Parses a binary Newick tree over a fixed taxon set. A degree-2 root is
/// suppressed so rooted and unrooted inputs give the same topology.
pub fn parse(text: &str, taxa: &Arc<Vec<String>>) -> TfResult<Tree> {
    let raw = tokenize(text)?;
    let n = taxa.len();
    let index: HashMap<&str, usize> = taxa.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();

    let mut ids = vec![NO_NODE; raw.len()];
    let mut seen = vec![false; n];
    let mut next_internal = n;
    let root_children = raw[0].children.len();
    let suppress_root = root_children == 2;
    if !(2..=3).contains(&root_children) {
        return Err(TreeForgeError::Topology(format!(
            "root has {} children, expected 2 or 3",
            root_children
        )));
    }

    for (i, node) in raw.iter().enumerate() {
        if node.children.is_empty() {
            let label = node.label.as_deref().unwrap_or("");
            let taxon = *index.get(label).ok_or_else(|| {
                TreeForgeError::Topology(format!("unknown taxon '{}' in tree", label))
            })?;
            if seen[taxon] {
                return Err(TreeForgeError::Topology(format!(
                    "taxon '{}' appears twice",
                    label
                )));
            }
            seen[taxon] = true;
            ids[i] = taxon;
        } else if i == 0 && suppress_root {
            continue;
        } else {
            if i != 0 && node.children.len() != 2 {
                return Err(TreeForgeError::Topology(format!(
                    "internal node with {} children, tree is not bifurcating",
                    node.children.len()
                )));
            }
            if next_internal >= n + n.saturating_sub(2) {
                return Err(TreeForgeError::Topology("too many internal nodes".to_string()));
            }
            ids[i] = next_internal;
            next_internal += 1;
        }
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(TreeForgeError::Topology(format!(
            "taxon '{}' missing from tree",
            taxa[missing]
        )));
    }

    let mut tree = Tree::detached(Arc::clone(taxa));
    let len_of = |i: usize| raw[i].length.unwrap_or(DEFAULT_BRANCH_LENGTH);
    for (i, node) in raw.iter().enumerate() {
        if i == 0 && suppress_root {
            let (a, b) = (node.children[0], node.children[1]);
            tree.link(ids[a], ids[b], len_of(a) + len_of(b));
            continue;
        }
        for &child in &node.children {
            tree.link(ids[i], ids[child], len_of(child));
        }
    }
    tree.validate()?;
    Ok(tree)
}

/// One tree per non-empty line; `#` starts a comment line.
pub fn parse_all(text: &str, taxa: &Arc<Vec<String>>) -> TfResult<Vec<Tree>> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| parse(l, taxa))
        .collect()
}

pub fn load_file<P: AsRef<Path>>(path: P, taxa: &Arc<Vec<String>>) -> TfResult<Vec<Tree>> {
    let text = fs::read_to_string(path)?;
    parse_all(&text, taxa)
}

fn quote(label: &str) -> String {
    if label.bytes().any(|c| is_delimiter(c) || c == b'\'') {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

/// Writes the canonical form: rooted at the internal node next to the
/// smallest attached taxon, children ordered by their smallest taxon.
pub fn write(tree: &Tree, with_lengths: bool) -> String {
    let Some(&first) = tree.attached_leaves().first() else {
        return ";".to_string();
    };
    let Some(root) = tree.leaf_parent(first) else {
        return ";".to_string();
    };

    let mut text: Vec<Option<(NodeId, String)>> = vec![None; tree.node_count()];
    for (node, dad) in tree.postorder(root, NO_NODE) {
        let mut out = String::new();
        let min_taxon;
        if tree.is_leaf(node) {
            out.push_str(&quote(&tree.taxa()[node]));
            min_taxon = node;
        } else {
            let mut kids: Vec<(NodeId, String)> = tree
                .neighbors(node)
                .iter()
                .filter(|&&nb| nb != dad)
                .filter_map(|&nb| text[nb].take())
                .collect();
            kids.sort_by_key(|k| k.0);
            min_taxon = kids.first().map(|k| k.0).unwrap_or(NO_NODE);
            out.push('(');
            for (i, (_, s)) in kids.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(s);
            }
            out.push(')');
        }
        if with_lengths && dad != NO_NODE {
            let _ = write!(out, ":{}", tree.length(node, dad));
        }
        text[node] = Some((min_taxon, out));
    }

    let mut result = text[root].take().map(|(_, s)| s).unwrap_or_default();
    result.push(';');
    result
}

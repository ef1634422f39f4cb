//! Canonical data-structure codec.
//!
//! Converts between the flat literal encodings used in test-case text and
//! the pointer structures submitted code manipulates. The sandbox driver
//! carries a mirror of these rules to materialize real objects; the host
//! side uses this module to validate literals before dispatch and to bring
//! expected structure literals into the form the driver reports.
//!
//! Lists and graphs may be cyclic, so both are arena-backed and refer to
//! nodes by index. Trees are acyclic and use the `Rc<RefCell<_>>` shape the
//! usual problem signatures expect.

use crate::value::Value;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("expected a list literal, got {0}")]
    NotAList(String),
    #[error("random index {index} out of range for list of length {len}")]
    RandomIndexOutOfRange { index: i64, len: usize },
    #[error("random index must be an integer or null, got {0}")]
    InvalidRandomIndex(String),
    #[error("node {node} lists neighbor {neighbor}, but the graph has {len} nodes")]
    NeighborOutOfRange { node: usize, neighbor: i64, len: usize },
    #[error("neighbor lists must hold integers, got {0}")]
    InvalidNeighbor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    List,
    Tree,
    Graph,
}

#[derive(Debug)]
pub enum Structure {
    List(LinkedList),
    Tree(Option<TreeRef>),
    Graph(Graph),
}

/// Decode a literal into the structure `kind` names. Nothing is built
/// unless the whole literal is valid.
pub fn decode(kind: StructureKind, literal: &Value) -> Result<Structure, CodecError> {
    match kind {
        StructureKind::List => LinkedList::decode(literal, None).map(Structure::List),
        StructureKind::Tree => decode_tree(literal).map(Structure::Tree),
        StructureKind::Graph => Graph::decode(literal).map(Structure::Graph),
    }
}

pub fn encode(structure: &Structure) -> Value {
    match structure {
        Structure::List(list) => list.encode(),
        Structure::Tree(root) => encode_tree(root.as_ref()),
        Structure::Graph(graph) => graph.encode(),
    }
}

/// `encode(decode(kind, literal))`: trailing tree `null`s trimmed, graph
/// neighbor lists sorted.
pub fn canonicalize(kind: StructureKind, literal: &Value) -> Result<Value, CodecError> {
    decode(kind, literal).map(|structure| encode(&structure))
}

fn items_of(literal: &Value) -> Result<&[Value], CodecError> {
    literal
        .as_list()
        .ok_or_else(|| CodecError::NotAList(literal.to_string()))
}

// ---------------------------------------------------------------------------
// Linked list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ListNode {
    pub value: Value,
    pub next: Option<usize>,
    pub random: Option<usize>,
}

/// Singly linked list, optionally with random pointers or a tail cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkedList {
    pub nodes: Vec<ListNode>,
    pub head: Option<usize>,
}

impl LinkedList {
    /// `[[v, randomIndex|null], ...]` builds the random-pointer variant;
    /// anything else is a plain list whose tail is wired back to `pos`
    /// when `pos` is a valid 0-based index.
    pub fn decode(literal: &Value, pos: Option<i64>) -> Result<Self, CodecError> {
        let items = items_of(literal)?;
        if items.is_empty() {
            return Ok(Self::default());
        }

        let with_random = items
            .iter()
            .all(|item| item.as_list().map_or(false, |pair| pair.len() == 2));

        if with_random {
            let len = items.len();
            let mut randoms = Vec::with_capacity(len);
            for item in items {
                let pair = items_of(item)?;
                let random = match &pair[1] {
                    Value::Null => None,
                    other => {
                        let index = other
                            .as_i64()
                            .ok_or_else(|| CodecError::InvalidRandomIndex(other.to_string()))?;
                        if index < 0 || index as usize >= len {
                            return Err(CodecError::RandomIndexOutOfRange { index, len });
                        }
                        Some(index as usize)
                    }
                };
                randoms.push((pair[0].clone(), random));
            }

            let nodes = randoms
                .into_iter()
                .enumerate()
                .map(|(i, (value, random))| ListNode {
                    value,
                    next: (i + 1 < len).then_some(i + 1),
                    random,
                })
                .collect();
            return Ok(Self { nodes, head: Some(0) });
        }

        let len = items.len();
        let mut nodes: Vec<ListNode> = items
            .iter()
            .enumerate()
            .map(|(i, value)| ListNode {
                value: value.clone(),
                next: (i + 1 < len).then_some(i + 1),
                random: None,
            })
            .collect();

        if let Some(pos) = pos {
            if pos >= 0 && (pos as usize) < len {
                nodes[len - 1].next = Some(pos as usize);
            }
        }

        Ok(Self { nodes, head: Some(0) })
    }

    /// Node indices in `next` order, stopping at the first revisit.
    fn walk(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.head;
        while let Some(idx) = current {
            if !visited.insert(idx) {
                break;
            }
            order.push(idx);
            current = self.nodes[idx].next;
        }
        order
    }

    pub fn encode(&self) -> Value {
        let order = self.walk();
        let has_random = order.iter().any(|&i| self.nodes[i].random.is_some());

        if !has_random {
            return Value::List(order.iter().map(|&i| self.nodes[i].value.clone()).collect());
        }

        let position: HashMap<usize, usize> =
            order.iter().enumerate().map(|(pos, &idx)| (idx, pos)).collect();
        Value::List(
            order
                .iter()
                .map(|&i| {
                    let node = &self.nodes[i];
                    let random = node
                        .random
                        .and_then(|r| position.get(&r))
                        .map_or(Value::Null, |&p| Value::Int(p as i64));
                    Value::List(vec![node.value.clone(), random])
                })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Binary tree
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub struct TreeNode {
    pub value: Value,
    pub left: Option<TreeRef>,
    pub right: Option<TreeRef>,
}

pub type TreeRef = Rc<RefCell<TreeNode>>;

impl TreeNode {
    pub fn new(value: Value) -> TreeRef {
        Rc::new(RefCell::new(TreeNode {
            value,
            left: None,
            right: None,
        }))
    }
}

/// Level-order array with `null` gaps; each dequeued parent consumes two slots.
pub fn decode_tree(literal: &Value) -> Result<Option<TreeRef>, CodecError> {
    let items = items_of(literal)?;
    let first = match items.first() {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };

    let root = TreeNode::new(first.clone());
    let mut queue = VecDeque::from([Rc::clone(&root)]);
    let mut i = 1;

    while i < items.len() {
        let Some(parent) = queue.pop_front() else {
            break;
        };

        if let Some(value) = items.get(i).filter(|v| !v.is_null()) {
            let child = TreeNode::new(value.clone());
            parent.borrow_mut().left = Some(Rc::clone(&child));
            queue.push_back(child);
        }
        i += 1;

        if let Some(value) = items.get(i).filter(|v| !v.is_null()) {
            let child = TreeNode::new(value.clone());
            parent.borrow_mut().right = Some(Rc::clone(&child));
            queue.push_back(child);
        }
        i += 1;
    }

    Ok(Some(root))
}

/// Breadth-first with `null` placeholders, trailing `null`s trimmed.
pub fn encode_tree(root: Option<&TreeRef>) -> Value {
    let mut out = Vec::new();
    let mut queue: VecDeque<Option<TreeRef>> = VecDeque::from([root.cloned()]);

    if root.is_none() {
        return Value::List(out);
    }

    while let Some(slot) = queue.pop_front() {
        match slot {
            Some(node) => {
                let node = node.borrow();
                out.push(node.value.clone());
                queue.push_back(node.left.clone());
                queue.push_back(node.right.clone());
            }
            None => out.push(Value::Null),
        }
    }

    while out.last().map_or(false, Value::is_null) {
        out.pop();
    }
    Value::List(out)
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub value: i64,
    pub neighbors: Vec<usize>,
}

/// Undirected graph given as 1-indexed adjacency lists; `entry` is node 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub entry: Option<usize>,
}

impl Graph {
    pub fn decode(literal: &Value) -> Result<Self, CodecError> {
        let lists = items_of(literal)?;
        let len = lists.len();
        let mut nodes = Vec::with_capacity(len);

        for (i, neighbors) in lists.iter().enumerate() {
            let mut wired = Vec::new();
            for neighbor in items_of(neighbors)? {
                let n = neighbor
                    .as_i64()
                    .ok_or_else(|| CodecError::InvalidNeighbor(neighbor.to_string()))?;
                if n < 1 || n as usize > len {
                    return Err(CodecError::NeighborOutOfRange {
                        node: i + 1,
                        neighbor: n,
                        len,
                    });
                }
                wired.push(n as usize - 1);
            }
            nodes.push(GraphNode {
                value: i as i64 + 1,
                neighbors: wired,
            });
        }

        let entry = (len > 0).then_some(0);
        Ok(Self { nodes, entry })
    }

    /// BFS from the entry node keyed by value, neighbor lists sorted ascending.
    pub fn encode(&self) -> Value {
        let Some(entry) = self.entry else {
            return Value::List(Vec::new());
        };

        let mut seen: HashMap<i64, usize> = HashMap::new();
        let mut queue = VecDeque::from([entry]);
        seen.insert(self.nodes[entry].value, entry);

        while let Some(idx) = queue.pop_front() {
            for &n in &self.nodes[idx].neighbors {
                let value = self.nodes[n].value;
                if let std::collections::hash_map::Entry::Vacant(slot) = seen.entry(value) {
                    slot.insert(n);
                    queue.push_back(n);
                }
            }
        }

        let max_value = seen.keys().copied().max().unwrap_or(0).max(0) as usize;
        let mut out = vec![Value::List(Vec::new()); max_value];
        for (&value, &idx) in &seen {
            if value < 1 {
                continue;
            }
            let mut neighbors: Vec<i64> = self.nodes[idx]
                .neighbors
                .iter()
                .map(|&n| self.nodes[n].value)
                .collect();
            neighbors.sort_unstable();
            out[value as usize - 1] = Value::List(neighbors.into_iter().map(Value::Int).collect());
        }
        Value::List(out)
    }
}

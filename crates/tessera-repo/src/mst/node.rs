//! MST node data structures
//!
//! In memory a node is a flat, ordered `Vec<NodeEntry>` where subtrees and
//! leaves interleave: `[Tree?, Leaf, Tree?, Leaf, Tree?, ...]`, never two
//! trees in a row. On the wire it is [`NodeData`]: a left pointer plus
//! prefix-compressed entries, each carrying the subtree to its right.

use std::fmt;

use cid::Cid as IpldCid;
use smol_str::SmolStr;

use crate::error::{MstError, Result};
use crate::mst::util::common_prefix_len;

/// Entry in an MST node: a subtree pointer or a key/value leaf
#[derive(Clone, PartialEq, Eq)]
pub enum NodeEntry {
    /// CID of a child node one layer down
    Tree(IpldCid),

    /// Leaf node with key-value pair
    Leaf {
        /// Full key (not prefix-compressed in memory)
        key: SmolStr,
        /// CID of the record value
        value: IpldCid,
    },
}

impl fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEntry::Tree(cid) => write!(f, "Tree({})", cid),
            NodeEntry::Leaf { key, value } => {
                write!(f, "Leaf {{ key: {}, value: {} }}", key, value)
            }
        }
    }
}

impl NodeEntry {
    /// Check if this is a tree entry
    pub fn is_tree(&self) -> bool {
        matches!(self, NodeEntry::Tree(_))
    }

    /// Check if this is a leaf entry
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeEntry::Leaf { .. })
    }

    /// Get the key if this is a leaf
    pub fn leaf_key(&self) -> Option<&str> {
        match self {
            NodeEntry::Leaf { key, .. } => Some(key.as_str()),
            NodeEntry::Tree(_) => None,
        }
    }

    /// Get the subtree pointer if this is a tree
    pub fn tree(&self) -> Option<IpldCid> {
        match self {
            NodeEntry::Tree(cid) => Some(*cid),
            NodeEntry::Leaf { .. } => None,
        }
    }
}

/// Wire format entry (prefix-compressed leaf with optional right subtree)
///
/// Field order is k, p, t, v: DAG-CBOR's length-then-bytewise key order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TreeEntry {
    /// Key bytes after the shared prefix, as a CBOR byte string
    #[serde(rename = "k", with = "serde_bytes")]
    pub key_suffix: Vec<u8>,

    /// Bytes shared with the previous key in this node
    #[serde(rename = "p")]
    pub prefix_len: usize,

    /// Subtree to the right of this entry; encoded as explicit `null` when absent
    #[serde(rename = "t")]
    pub tree: Option<IpldCid>,

    /// CID of the record value
    #[serde(rename = "v")]
    pub value: IpldCid,
}

/// Wire format node data (serialized as DAG-CBOR)
///
/// Every `Option` encodes as an explicit `null`: omitting the field would
/// change the bytes and therefore the CID.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeData {
    /// Entries in this node (sorted by full key, prefix-compressed)
    #[serde(rename = "e")]
    pub entries: Vec<TreeEntry>,

    /// Left-most subtree pointer
    #[serde(rename = "l")]
    pub left: Option<IpldCid>,
}

impl NodeData {
    /// The empty node, root of an empty tree
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            left: None,
        }
    }

    /// Compress flat entries into wire form
    ///
    /// Rejects adjacent subtrees and keys out of order.
    pub fn from_entries(entries: &[NodeEntry]) -> Result<Self> {
        let mut data = NodeData::empty();
        let mut iter = entries.iter().peekable();

        if let Some(NodeEntry::Tree(cid)) = iter.peek() {
            data.left = Some(*cid);
            iter.next();
        }

        let mut last_key: &str = "";
        while let Some(entry) = iter.next() {
            let NodeEntry::Leaf { key, value } = entry else {
                return Err(MstError::InvalidNode("adjacent subtree pointers".into()).into());
            };
            if !data.entries.is_empty() && key.as_str() <= last_key {
                return Err(MstError::InvalidNode(format!(
                    "keys out of order: {} after {}",
                    key, last_key
                ))
                .into());
            }

            let prefix_len = common_prefix_len(last_key, key);
            let tree = match iter.peek() {
                Some(NodeEntry::Tree(cid)) => {
                    let cid = *cid;
                    iter.next();
                    Some(cid)
                }
                _ => None,
            };

            data.entries.push(TreeEntry {
                prefix_len,
                key_suffix: key.as_bytes()[prefix_len..].to_vec(),
                tree,
                value: *value,
            });
            last_key = key.as_str();
        }

        Ok(data)
    }

    /// Expand wire form into flat entries, reconstructing full keys
    pub fn to_entries(&self) -> Result<Vec<NodeEntry>> {
        let mut entries = Vec::with_capacity(self.entries.len() * 2 + 1);
        if let Some(left) = self.left {
            entries.push(NodeEntry::Tree(left));
        }

        let mut last_key: Vec<u8> = Vec::new();
        for entry in &self.entries {
            let prefix_len = entry.prefix_len;
            if prefix_len > last_key.len() {
                return Err(MstError::InvalidNode(format!(
                    "prefix length {} exceeds previous key length {}",
                    prefix_len,
                    last_key.len()
                ))
                .into());
            }
            let mut key = last_key[..prefix_len].to_vec();
            key.extend_from_slice(&entry.key_suffix);
            let key_str = std::str::from_utf8(&key)
                .map_err(|e| MstError::InvalidNode(format!("non-UTF-8 key: {}", e)))?;

            entries.push(NodeEntry::Leaf {
                key: SmolStr::new(key_str),
                value: entry.value,
            });
            if let Some(tree) = entry.tree {
                entries.push(NodeEntry::Tree(tree));
            }
            last_key = key;
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{decode_block, encode_block};
    use tessera_common::types::cid::cbor_cid;

    fn leaf(key: &str, n: u8) -> NodeEntry {
        NodeEntry::Leaf {
            key: SmolStr::new(key),
            value: cbor_cid(&[n]),
        }
    }

    #[test]
    fn prefix_compression_round_trip() {
        let sub = cbor_cid(b"sub");
        let entries = vec![
            NodeEntry::Tree(cbor_cid(b"left")),
            leaf("com.example.post/aaa", 1),
            leaf("com.example.post/aab", 2),
            NodeEntry::Tree(sub),
            leaf("com.example.profile/self", 3),
        ];
        let data = NodeData::from_entries(&entries).unwrap();
        assert_eq!(data.entries[0].prefix_len, 0);
        assert_eq!(data.entries[1].prefix_len, 19);
        assert_eq!(data.entries[1].key_suffix, b"b".to_vec());
        assert_eq!(data.entries[1].tree, Some(sub));
        assert_eq!(data.entries[2].prefix_len, 14);

        let (_, bytes) = encode_block(&data).unwrap();
        let decoded: NodeData = decode_block(&bytes).unwrap();
        assert_eq!(decoded.to_entries().unwrap(), entries);
    }

    #[test]
    fn empty_node_encodes_nulls() {
        let (_, bytes) = encode_block(&NodeData::empty()).unwrap();
        // {"e": [], "l": null}
        assert_eq!(bytes.as_ref(), &[0xa2, 0x61, b'e', 0x80, 0x61, b'l', 0xf6]);
    }

    #[test]
    fn rejects_adjacent_trees_and_disorder() {
        let t = NodeEntry::Tree(cbor_cid(b"t"));
        assert!(NodeData::from_entries(&[t.clone(), t.clone()]).is_err());
        assert!(NodeData::from_entries(&[leaf("a/2", 1), leaf("a/1", 2)]).is_err());
    }

    #[test]
    fn long_shared_prefix_round_trip() {
        let stem = format!("com.example.record/{}", "x".repeat(300));
        let entries = vec![leaf(&format!("{stem}001"), 1), leaf(&format!("{stem}002"), 2)];
        let data = NodeData::from_entries(&entries).unwrap();
        assert_eq!(data.entries[1].prefix_len, stem.len() + 2);
        assert_eq!(data.entries[1].key_suffix, b"2".to_vec());

        let (_, bytes) = encode_block(&data).unwrap();
        let decoded: NodeData = decode_block(&bytes).unwrap();
        assert_eq!(decoded.to_entries().unwrap(), entries);
    }

    #[test]
    fn rejects_bad_prefix() {
        let data = NodeData {
            entries: vec![TreeEntry {
                key_suffix: b"x".to_vec(),
                prefix_len: 4,
                tree: None,
                value: cbor_cid(b"v"),
            }],
            left: None,
        };
        assert!(data.to_entries().is_err());
    }
}

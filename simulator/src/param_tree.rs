//! Nested parameter trees.
//!
//! Configurations are grouped by object (`main_deflector_params`,
//! `source_params`, ...) and then by field. The same shape is used for the
//! declarative phase, where leaves are [`DistributionRecord`]s, and for the
//! drawn phase, where leaves are sampled values.
//!
//! # Canonical order
//!
//! Leaves are always visited depth-first with the keys of every level sorted
//! byte-wise, which is the same as sorting leaves by their path components.
//! The sampler pairs the i-th leaf in this order with the i-th split key, so
//! this order must never change.
//!
//! [`DistributionRecord`]: crate::distribution::DistributionRecord

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::distribution::DistributionRecord;

/// Declarative tree of distribution records.
pub type EncodedTree = ParamTree<DistributionRecord>;
/// Tree of sampled scalar values.
pub type SampledTree = ParamTree<f64>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("unknown field '{path}'")]
    UnknownField { path: String },
    #[error("'{path}' is a nested object, expected a value")]
    NotALeaf { path: String },
    #[error("'{path}' is a value, expected a nested object")]
    NotABranch { path: String },
}

/// Either a value or a nested group of values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node<T> {
    Leaf(T),
    Branch(ParamTree<T>),
}

/// Ordered nested mapping from names to values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParamTree<T> {
    children: BTreeMap<String, Node<T>>,
}

/// Value types a [`ParamTree`] can be read into.
pub trait TreeLeaf: DeserializeOwned {
    /// Whether a JSON object is a single leaf value rather than a nested
    /// group.
    fn is_leaf_object(_object: &Map<String, Value>) -> bool {
        false
    }
}

impl TreeLeaf for f64 {}

impl TreeLeaf for Vec<f64> {}

impl TreeLeaf for DistributionRecord {
    fn is_leaf_object(object: &Map<String, Value>) -> bool {
        object.contains_key("kind")
    }
}

impl<T: TreeLeaf> ParamTree<T> {
    fn from_json_object(object: Map<String, Value>, prefix: &str) -> Result<Self, String> {
        let mut children = BTreeMap::new();
        for (name, value) in object {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            let node = match value {
                Value::Object(inner) if !T::is_leaf_object(&inner) => {
                    Node::Branch(Self::from_json_object(inner, &path)?)
                }
                value => Node::Leaf(
                    T::deserialize(value).map_err(|err| format!("invalid '{path}': {err}"))?,
                ),
            };
            children.insert(name, node);
        }
        Ok(ParamTree { children })
    }
}

// Leaf errors carry the dotted path of the leaf.
impl<'de, T: TreeLeaf> Deserialize<'de> for ParamTree<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object: Map<String, Value> = Map::deserialize(deserializer)?;
        Self::from_json_object(object, "").map_err(D::Error::custom)
    }
}

impl<T> Default for ParamTree<T> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
        }
    }
}

impl<T> ParamTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ParamTree::insert_leaf`].
    pub fn leaf(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert_leaf(name, value);
        self
    }

    /// Builder form of [`ParamTree::insert_branch`].
    pub fn branch(mut self, name: impl Into<String>, tree: ParamTree<T>) -> Self {
        self.insert_branch(name, tree);
        self
    }

    /// Insert or replace a value.
    pub fn insert_leaf(&mut self, name: impl Into<String>, value: T) {
        self.children.insert(name.into(), Node::Leaf(value));
    }

    /// Insert or replace a nested object.
    pub fn insert_branch(&mut self, name: impl Into<String>, tree: ParamTree<T>) {
        self.children.insert(name.into(), Node::Branch(tree));
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Direct children in canonical order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Node<T>)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Nested object stored under `name`.
    pub fn object(&self, name: &str) -> Result<&ParamTree<T>, TreeError> {
        match self.children.get(name) {
            Some(Node::Branch(tree)) => Ok(tree),
            Some(Node::Leaf(_)) => Err(TreeError::NotABranch {
                path: name.to_string(),
            }),
            None => Err(TreeError::UnknownField {
                path: name.to_string(),
            }),
        }
    }

    /// Value stored at `path`.
    pub fn get(&self, path: &[&str]) -> Result<&T, TreeError> {
        let joined = || path.join(".");
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| TreeError::UnknownField { path: joined() })?;

        let mut tree = self;
        for name in parents {
            tree = match tree.children.get(*name) {
                Some(Node::Branch(next)) => next,
                Some(Node::Leaf(_)) => return Err(TreeError::NotABranch { path: joined() }),
                None => return Err(TreeError::UnknownField { path: joined() }),
            };
        }

        match tree.children.get(*last) {
            Some(Node::Leaf(value)) => Ok(value),
            Some(Node::Branch(_)) => Err(TreeError::NotALeaf { path: joined() }),
            None => Err(TreeError::UnknownField { path: joined() }),
        }
    }

    /// Number of leaves in the whole tree.
    pub fn num_leaves(&self) -> usize {
        self.children
            .values()
            .map(|node| match node {
                Node::Leaf(_) => 1,
                Node::Branch(tree) => tree.num_leaves(),
            })
            .sum()
    }

    /// All leaves in canonical order, with dotted paths.
    pub fn leaves(&self) -> Vec<(String, &T)> {
        let mut out = Vec::with_capacity(self.num_leaves());
        self.collect_leaves("", &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a T)>) {
        for (name, node) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            match node {
                Node::Leaf(value) => out.push((path, value)),
                Node::Branch(tree) => tree.collect_leaves(&path, out),
            }
        }
    }

    /// Same-shape tree with `f` applied to every leaf.
    pub fn map<U, F>(&self, mut f: F) -> ParamTree<U>
    where
        F: FnMut(&T) -> U,
    {
        self.map_indexed(|_, value| f(value))
    }

    /// Same-shape tree with `f` applied to every leaf together with the
    /// leaf's position in canonical order.
    pub fn map_indexed<U, F>(&self, mut f: F) -> ParamTree<U>
    where
        F: FnMut(usize, &T) -> U,
    {
        let mut next = 0;
        self.map_indexed_from(&mut next, &mut f)
    }

    fn map_indexed_from<U, F>(&self, next: &mut usize, f: &mut F) -> ParamTree<U>
    where
        F: FnMut(usize, &T) -> U,
    {
        let children = self
            .children
            .iter()
            .map(|(name, node)| {
                let mapped = match node {
                    Node::Leaf(value) => {
                        let index = *next;
                        *next += 1;
                        Node::Leaf(f(index, value))
                    }
                    Node::Branch(tree) => Node::Branch(tree.map_indexed_from(next, f)),
                };
                (name.clone(), mapped)
            })
            .collect();
        ParamTree { children }
    }

    /// Fallible [`ParamTree::map`]; stops at the first error in canonical order.
    pub fn try_map<U, E, F>(&self, mut f: F) -> Result<ParamTree<U>, E>
    where
        F: FnMut(&T) -> Result<U, E>,
    {
        self.try_map_with(&mut f)
    }

    fn try_map_with<U, E, F>(&self, f: &mut F) -> Result<ParamTree<U>, E>
    where
        F: FnMut(&T) -> Result<U, E>,
    {
        let mut children = BTreeMap::new();
        for (name, node) in &self.children {
            let mapped = match node {
                Node::Leaf(value) => Node::Leaf(f(value)?),
                Node::Branch(tree) => Node::Branch(tree.try_map_with(f)?),
            };
            children.insert(name.clone(), mapped);
        }
        Ok(ParamTree { children })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{encode_constant, encode_uniform};

    fn sample_tree() -> ParamTree<f64> {
        ParamTree::new()
            .leaf("theta_e", 1.1)
            .leaf("center_x", 0.08)
            .branch("shear", ParamTree::new().leaf("gamma2", 0.0).leaf("gamma1", 0.02))
            .leaf("z_lens", 0.5)
    }

    #[test]
    fn test_canonical_leaf_order() {
        let tree = sample_tree();
        let paths: Vec<String> = tree.leaves().into_iter().map(|(path, _)| path).collect();

        assert_eq!(
            paths,
            vec!["center_x", "shear.gamma1", "shear.gamma2", "theta_e", "z_lens"]
        );
        assert_eq!(tree.num_leaves(), 5);
    }

    #[test]
    fn test_order_independent_of_insertion() {
        let reversed = ParamTree::new()
            .leaf("z_lens", 0.5)
            .branch("shear", ParamTree::new().leaf("gamma1", 0.02).leaf("gamma2", 0.0))
            .leaf("center_x", 0.08)
            .leaf("theta_e", 1.1);

        assert_eq!(reversed, sample_tree());
    }

    #[test]
    fn test_map_indexed_follows_canonical_order() {
        let tree = sample_tree();
        let indices = tree.map_indexed(|i, _| i);
        let values: Vec<usize> = indices.leaves().into_iter().map(|(_, v)| *v).collect();

        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(*indices.get(&["shear", "gamma2"]).unwrap(), 2);
    }

    #[test]
    fn test_get_errors_are_descriptive() {
        let tree = sample_tree();

        assert_eq!(*tree.get(&["z_lens"]).unwrap(), 0.5);
        assert_eq!(
            tree.get(&["shear", "gamma3"]),
            Err(TreeError::UnknownField {
                path: "shear.gamma3".to_string()
            })
        );
        assert_eq!(
            tree.get(&["shear"]),
            Err(TreeError::NotALeaf {
                path: "shear".to_string()
            })
        );
        assert_eq!(
            tree.get(&["z_lens", "x"]),
            Err(TreeError::NotABranch {
                path: "z_lens.x".to_string()
            })
        );
        assert!(tree.object("theta_e").is_err());
        assert!(tree.object("shear").is_ok());
    }

    #[test]
    fn test_try_map_propagates_error() {
        let tree = sample_tree();
        let result: Result<ParamTree<f64>, String> = tree.try_map(|v| {
            if *v > 1.0 {
                Err(format!("too large: {v}"))
            } else {
                Ok(v * 2.0)
            }
        });
        assert_eq!(result, Err("too large: 1.1".to_string()));
    }

    #[test]
    fn test_encoded_tree_from_json() {
        let json = r#"{
            "main_deflector_params": {
                "theta_e": {"kind": "uniform", "min": 0.5, "max": 2.0},
                "z_lens": {"kind": "constant", "value": 0.5}
            }
        }"#;
        let tree: EncodedTree = serde_json::from_str(json).unwrap();

        assert_eq!(
            *tree.get(&["main_deflector_params", "theta_e"]).unwrap(),
            encode_uniform(0.5, 2.0).unwrap()
        );
        assert_eq!(
            *tree.get(&["main_deflector_params", "z_lens"]).unwrap(),
            encode_constant(0.5).unwrap()
        );
    }

    #[test]
    fn test_invalid_record_reports_path_and_reason() {
        let json = r#"{
            "source_params": {
                "z_source": {"kind": "uniform", "min": 2.0, "max": 1.0}
            }
        }"#;
        let err = serde_json::from_str::<EncodedTree>(json).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("'source_params.z_source'"), "{message}");
        assert!(message.contains("uniform minimum 2 exceeds maximum 1"), "{message}");
    }

    #[test]
    fn test_leaf_without_kind_is_a_group() {
        let json = r#"{"shear": {"gamma1": 0.1, "gamma2": -0.2}}"#;
        let tree: SampledTree = serde_json::from_str(json).unwrap();
        assert_eq!(*tree.get(&["shear", "gamma2"]).unwrap(), -0.2);
        assert!(tree.object("shear").is_ok());
    }

    #[test]
    fn test_sampled_tree_json_round_trip() {
        let tree = sample_tree();
        let json = serde_json::to_string(&tree).unwrap();
        let parsed: SampledTree = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tree);
    }
}

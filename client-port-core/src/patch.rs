//! The patch engine: applies a sequence of JSON-Patch-like structural
//! operations to an immutable document, and can synthesize such a sequence
//! by diffing the result of a mutating "producer" closure against its
//! input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One segment of a patch path. `path: []` addresses the document root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Key(s.to_owned())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
    Add,
    Remove,
}

/// One structural edit, interoperable byte-for-byte with the canonical
/// JSON-Patch-like wire format the server speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: Vec<PathSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    pub fn replace_root(value: Value) -> Self {
        Patch {
            op: PatchOp::Replace,
            path: Vec::new(),
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch path {0:?} does not exist in the document")]
    PathNotFound(Vec<PathSegment>),
    #[error("patch path {0:?} addresses a scalar as if it were a container")]
    NotAContainer(Vec<PathSegment>),
    #[error("{0:?} requires a value but none was given")]
    MissingValue(PatchOp),
    #[error("array index {1} out of bounds for path {0:?}")]
    IndexOutOfBounds(Vec<PathSegment>, usize),
}

/// Applies `patches` to `doc` in order, returning a new document. `doc` is
/// never mutated in place; each step works on an owned clone of the subtree
/// it touches, which is the same externally-observable semantics as a true
/// structurally-shared draft would give callers.
pub fn apply_patches(doc: &Value, patches: &[Patch]) -> Result<Value, PatchError> {
    let mut current = doc.clone();
    for patch in patches {
        current = apply_one(current, patch)?;
    }
    Ok(current)
}

fn apply_one(doc: Value, patch: &Patch) -> Result<Value, PatchError> {
    if patch.path.is_empty() {
        return match patch.op {
            PatchOp::Replace | PatchOp::Add => patch
                .value
                .clone()
                .ok_or(PatchError::MissingValue(patch.op)),
            PatchOp::Remove => Ok(Value::Null),
        };
    }
    apply_at(doc, &patch.path, patch)
}

fn apply_at(mut doc: Value, path: &[PathSegment], patch: &Patch) -> Result<Value, PatchError> {
    let (head, rest) = path.split_first().expect("non-empty path");
    if rest.is_empty() {
        set_leaf(&mut doc, head, patch)?;
        return Ok(doc);
    }
    match (&mut doc, head) {
        (Value::Object(map), PathSegment::Key(key)) => {
            let child = map
                .get(key)
                .cloned()
                .ok_or_else(|| PatchError::PathNotFound(path.to_vec()))?;
            map.insert(key.clone(), apply_at(child, rest, patch)?);
            Ok(doc)
        }
        (Value::Array(items), PathSegment::Index(idx)) => {
            let child = items
                .get(*idx)
                .cloned()
                .ok_or(PatchError::IndexOutOfBounds(path.to_vec(), *idx))?;
            items[*idx] = apply_at(child, rest, patch)?;
            Ok(doc)
        }
        _ => Err(PatchError::NotAContainer(path.to_vec())),
    }
}

fn set_leaf(doc: &mut Value, segment: &PathSegment, patch: &Patch) -> Result<(), PatchError> {
    match (doc, segment) {
        (Value::Object(map), PathSegment::Key(key)) => match patch.op {
            PatchOp::Replace | PatchOp::Add => {
                let value = patch
                    .value
                    .clone()
                    .ok_or(PatchError::MissingValue(patch.op))?;
                map.insert(key.clone(), value);
                Ok(())
            }
            PatchOp::Remove => {
                map.remove(key);
                Ok(())
            }
        },
        (Value::Array(items), PathSegment::Index(idx)) => match patch.op {
            PatchOp::Replace => {
                let value = patch
                    .value
                    .clone()
                    .ok_or(PatchError::MissingValue(patch.op))?;
                let slot = items
                    .get_mut(*idx)
                    .ok_or(PatchError::IndexOutOfBounds(patch.path.clone(), *idx))?;
                *slot = value;
                Ok(())
            }
            PatchOp::Add => {
                let value = patch
                    .value
                    .clone()
                    .ok_or(PatchError::MissingValue(patch.op))?;
                if *idx > items.len() {
                    return Err(PatchError::IndexOutOfBounds(patch.path.clone(), *idx));
                }
                items.insert(*idx, value);
                Ok(())
            }
            PatchOp::Remove => {
                if *idx >= items.len() {
                    return Err(PatchError::IndexOutOfBounds(patch.path.clone(), *idx));
                }
                items.remove(*idx);
                Ok(())
            }
        },
        _ => Err(PatchError::NotAContainer(patch.path.clone())),
    }
}

/// Runs `producer` against a clone of `doc`, then diffs the result back
/// against `doc` to synthesize the smallest patch list that reproduces it.
/// This is the idiomatic-Rust rendition of an Immer-style "draft" producer:
/// `serde_json::Value` has no useful structural sharing to exploit, so we
/// simply diff before/after rather than tracking mutations as they happen.
pub fn produce<F>(doc: &Value, producer: F) -> (Value, Vec<Patch>)
where
    F: FnOnce(&mut Value),
{
    let mut draft = doc.clone();
    producer(&mut draft);
    let patches = diff(doc, &draft, &mut Vec::new());
    (draft, patches)
}

fn diff(before: &Value, after: &Value, path: &mut Vec<PathSegment>) -> Vec<Patch> {
    if before == after {
        return Vec::new();
    }
    match (before, after) {
        (Value::Object(before_map), Value::Object(after_map)) => {
            let mut patches = Vec::new();
            for (key, before_val) in before_map {
                path.push(PathSegment::Key(key.clone()));
                match after_map.get(key) {
                    Some(after_val) => patches.extend(diff(before_val, after_val, path)),
                    None => patches.push(Patch {
                        op: PatchOp::Remove,
                        path: path.clone(),
                        value: None,
                    }),
                }
                path.pop();
            }
            for (key, after_val) in after_map {
                if !before_map.contains_key(key) {
                    path.push(PathSegment::Key(key.clone()));
                    patches.push(Patch {
                        op: PatchOp::Add,
                        path: path.clone(),
                        value: Some(after_val.clone()),
                    });
                    path.pop();
                }
            }
            patches
        }
        _ => {
            vec![Patch {
                op: PatchOp::Replace,
                path: path.clone(),
                value: Some(after.clone()),
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_replace() {
        let doc = json!({"n": 0});
        let patches = vec![Patch::replace_root(json!({"n": 1}))];
        assert_eq!(apply_patches(&doc, &patches).unwrap(), json!({"n": 1}));
    }

    #[test]
    fn nested_replace() {
        let doc = json!({"n": 0, "other": "keep"});
        let patches = vec![Patch {
            op: PatchOp::Replace,
            path: vec![PathSegment::Key("n".into())],
            value: Some(json!(1)),
        }];
        assert_eq!(
            apply_patches(&doc, &patches).unwrap(),
            json!({"n": 1, "other": "keep"})
        );
    }

    #[test]
    fn array_add_and_remove() {
        let doc = json!({"items": [1, 2]});
        let add = vec![Patch {
            op: PatchOp::Add,
            path: vec![PathSegment::Key("items".into()), PathSegment::Index(1)],
            value: Some(json!(99)),
        }];
        let added = apply_patches(&doc, &add).unwrap();
        assert_eq!(added, json!({"items": [1, 99, 2]}));

        let remove = vec![Patch {
            op: PatchOp::Remove,
            path: vec![PathSegment::Key("items".into()), PathSegment::Index(0)],
            value: None,
        }];
        assert_eq!(apply_patches(&added, &remove).unwrap(), json!({"items": [99, 2]}));
    }

    #[test]
    fn unknown_path_errors() {
        let doc = json!({"n": 0});
        let patches = vec![Patch {
            op: PatchOp::Replace,
            path: vec![PathSegment::Key("missing".into()), PathSegment::Key("deeper".into())],
            value: Some(json!(1)),
        }];
        assert!(matches!(
            apply_patches(&doc, &patches),
            Err(PatchError::PathNotFound(_))
        ));
    }

    #[test]
    fn produce_matches_manual_patch() {
        let doc = json!({"n": 0, "tags": ["a"]});
        let (produced, patches) = produce(&doc, |draft| {
            draft["n"] = json!(1);
            draft["tags"].as_array_mut().unwrap().push(json!("b"));
        });
        let replayed = apply_patches(&doc, &patches).unwrap();
        assert_eq!(replayed, produced);
        assert_eq!(produced, json!({"n": 1, "tags": ["a", "b"]}));
    }

    #[test]
    fn produce_no_change_yields_no_patches() {
        let doc = json!({"n": 0});
        let (produced, patches) = produce(&doc, |_| {});
        assert!(patches.is_empty());
        assert_eq!(produced, doc);
    }
}

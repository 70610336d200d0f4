//! # Property Accessor
//!
//! Path-based access to untyped configuration trees.
//!
//! Configuration coming from the `SpinnakerService` spec is free-form, so it is kept as a
//! `serde_json::Value` tree. Values are addressed with dotted paths such as
//! `providers.kubernetes.accounts.0.name`:
//!
//! - a segment addressing an object is a key (numeric keys are allowed)
//! - a segment addressing an array must be a base-10 index
//!
//! There is no implicit coercion: reading `server.port` as an integer fails when the
//! value is the string `"8085"`, and writing through a scalar is an error instead of
//! silently replacing it.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropertyError {
    #[error("invalid property path '{0}'")]
    InvalidPath(String),
    #[error("cannot descend into '{segment}' of '{path}': parent is neither an object nor an array")]
    NotAContainer { path: String, segment: String },
    #[error("'{segment}' is not a valid array index in '{path}'")]
    InvalidIndex { path: String, segment: String },
    #[error("index {index} out of bounds (len {len}) in '{path}'")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
}

/// Parsed dotted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    raw: String,
    segments: Vec<String>,
}

impl PropertyPath {
    pub fn parse(raw: &str) -> Result<Self, PropertyError> {
        if raw.is_empty() {
            return Err(PropertyError::InvalidPath(raw.to_string()));
        }
        let segments: Vec<String> = raw.split('.').map(ToString::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PropertyError::InvalidPath(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn index(&self, segment: &str) -> Result<usize, PropertyError> {
        segment
            .parse::<usize>()
            .map_err(|_| PropertyError::InvalidIndex {
                path: self.raw.clone(),
                segment: segment.to_string(),
            })
    }
}

/// Get a value by path. Missing keys, out-of-range indices and non-numeric array
/// segments all read as absent.
#[must_use]
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = PropertyPath::parse(path).ok()?;
    let mut node = root;
    for segment in path.segments() {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

#[must_use]
pub fn get_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let path = PropertyPath::parse(path).ok()?;
    let mut node = root;
    for segment in path.segments() {
        node = match node {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

#[must_use]
pub fn get_str<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    get(root, path).and_then(Value::as_str)
}


/// Set a value by path, creating intermediate objects for missing keys.
///
/// A `null` intermediate is replaced by an object. Array segments must address an
/// existing element, except the final segment which may equal the length (append).
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), PropertyError> {
    let parsed = PropertyPath::parse(path)?;
    let (last, parents) = parsed
        .segments()
        .split_last()
        .ok_or_else(|| PropertyError::InvalidPath(path.to_string()))?;

    let mut node = root;
    for segment in parents {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => {
                let child = map
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if child.is_null() {
                    *child = Value::Object(Map::new());
                }
                child
            }
            Value::Array(items) => {
                let index = parsed.index(segment)?;
                let len = items.len();
                items
                    .get_mut(index)
                    .ok_or_else(|| PropertyError::IndexOutOfBounds {
                        path: path.to_string(),
                        index,
                        len,
                    })?
            }
            _ => {
                return Err(PropertyError::NotAContainer {
                    path: path.to_string(),
                    segment: segment.clone(),
                })
            }
        };
    }

    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = parsed.index(last)?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => {
                    items[index] = value;
                    Ok(())
                }
                std::cmp::Ordering::Equal => {
                    items.push(value);
                    Ok(())
                }
                std::cmp::Ordering::Greater => Err(PropertyError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len: items.len(),
                }),
            }
        }
        _ => Err(PropertyError::NotAContainer {
            path: path.to_string(),
            segment: last.clone(),
        }),
    }
}

/// Set a value only when nothing is set at `path` yet. Returns whether a write happened.
pub fn set_if_absent(root: &mut Value, path: &str, value: Value) -> Result<bool, PropertyError> {
    if get(root, path).is_some_and(|v| !v.is_null()) {
        return Ok(false);
    }
    set(root, path, value)?;
    Ok(true)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; everything else
/// (scalars, arrays) in `overlay` replaces what `base` has.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

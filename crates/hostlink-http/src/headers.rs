//! Header and trailer collections.
//!
//! A whole collection crosses the boundary in one call: the caller allocates
//! `2 × count` descriptors and a backing region of the total key/value size,
//! the host fills both, and the pairs are decoded into owned strings before
//! the region is dropped.
//!
//! `max_header_bytes` bounds both allocations: the descriptor table and the
//! region.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use hostlink_capi::{HeaderAction, HostString, SliceDescriptor};
use hostlink_core::{BridgeError, BridgeResult, DecodeError, Operation};

use crate::request::HttpRequest;

/// Headers or trailers keyed by name.
///
/// Names are case-sensitive. Values of a repeated name keep their arrival
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderCollection {
    entries: BTreeMap<String, Vec<String>>,
}

impl HeaderCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value after any existing values of `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(name.into()).or_default().push(value.into());
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of `name`, in arrival order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `name` has at least one value.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Total number of name/value entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Number of distinct names.
    pub fn name_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names with their values.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<String>> {
        self.entries.iter()
    }

    /// Every entry as a `(name, value)` pair.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// The underlying map.
    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.entries
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderCollection {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut collection = Self::new();
        for (name, value) in iter {
            collection.append(name, value);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a HeaderCollection {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = btree_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Decode host-filled descriptors into a collection.
///
/// `slots` alternates key and value. With `strict_utf8` unset, invalid
/// sequences are replaced instead of rejected.
pub fn decode_pairs(
    slots: &[SliceDescriptor],
    region: &[u8],
    strict_utf8: bool,
) -> Result<HeaderCollection, DecodeError> {
    let mut collection = HeaderCollection::new();
    for (pair, descriptors) in slots.chunks_exact(2).enumerate() {
        let key = decode_slice(pair * 2, descriptors[0], region, strict_utf8)?;
        let value = decode_slice(pair * 2 + 1, descriptors[1], region, strict_utf8)?;
        collection.append(key, value);
    }
    Ok(collection)
}

fn decode_slice(
    index: usize,
    descriptor: SliceDescriptor,
    region: &[u8],
    strict_utf8: bool,
) -> Result<String, DecodeError> {
    let out_of_bounds = || DecodeError::DescriptorOutOfBounds {
        index,
        offset: descriptor.offset,
        end: descriptor.end().unwrap_or(usize::MAX),
        region: region.len(),
    };
    let end = descriptor.end().ok_or_else(out_of_bounds)?;
    let bytes = region.get(descriptor.offset..end).ok_or_else(out_of_bounds)?;

    if strict_utf8 {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|source| DecodeError::InvalidUtf8 { index, source })
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl HttpRequest {
    /// Copy every header in one boundary call.
    ///
    /// `count` and `total_bytes` are the sizes the host passed to the header
    /// callback. A zero count returns an empty collection without calling the
    /// host.
    pub fn copy_headers(&self, count: usize, total_bytes: usize) -> BridgeResult<HeaderCollection> {
        self.copy_pairs(Operation::CopyHeaders, count, total_bytes)
    }

    /// Copy every trailer in one boundary call.
    pub fn copy_trailers(&self, count: usize, total_bytes: usize) -> BridgeResult<HeaderCollection> {
        self.copy_pairs(Operation::CopyTrailers, count, total_bytes)
    }

    /// First value of a header, `None` if absent.
    pub fn get_header(&self, key: &str) -> BridgeResult<Option<String>> {
        let mut value = HostString::new();
        self.bridge()
            .sync_call(self.handle(), Operation::GetHeader, |capi| {
                capi.get_header(self.handle(), key, &mut value)
            })?;
        self.host_string(Operation::GetHeader, value)
    }

    /// Replace every value of a header.
    pub fn set_header(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.write_header(key, value, HeaderAction::Set)
    }

    /// Add a header value after the existing ones.
    pub fn add_header(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.write_header(key, value, HeaderAction::Add)
    }

    /// Remove every value of a header.
    pub fn remove_header(&self, key: &str) -> BridgeResult<()> {
        self.bridge()
            .sync_call(self.handle(), Operation::RemoveHeader, |capi| {
                capi.remove_header(self.handle(), key)
            })
    }

    /// Replace every value of a trailer.
    pub fn set_trailer(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.bridge()
            .sync_call(self.handle(), Operation::SetTrailer, |capi| {
                capi.set_trailer(self.handle(), key, value)
            })?;
        self.bridge()
            .metrics()
            .record_bytes_out(Operation::SetTrailer, key.len() + value.len());
        Ok(())
    }

    fn write_header(&self, key: &str, value: &str, action: HeaderAction) -> BridgeResult<()> {
        self.bridge()
            .sync_call(self.handle(), Operation::SetHeader, |capi| {
                capi.set_header(self.handle(), key, value, action)
            })?;
        self.bridge()
            .metrics()
            .record_bytes_out(Operation::SetHeader, key.len() + value.len());
        Ok(())
    }

    fn copy_pairs(
        &self,
        operation: Operation,
        count: usize,
        total_bytes: usize,
    ) -> BridgeResult<HeaderCollection> {
        if count == 0 {
            return Ok(HeaderCollection::new());
        }

        let bridge = self.bridge();
        let limit = bridge.config().max_header_bytes;
        let descriptor_bytes = count
            .checked_mul(2 * size_of::<SliceDescriptor>())
            .unwrap_or(usize::MAX);
        let requested = if descriptor_bytes > limit {
            Some(descriptor_bytes)
        } else if total_bytes > limit {
            Some(total_bytes)
        } else {
            None
        };
        if let Some(requested) = requested {
            let err = BridgeError::LimitExceeded {
                operation,
                requested,
                limit,
            };
            bridge.failed(self.handle(), operation, &err);
            return Err(err);
        }

        let slot_count = count * 2;
        let mut slots = vec![SliceDescriptor::default(); slot_count];
        let mut region = vec![0u8; total_bytes];
        bridge.sync_call(self.handle(), operation, |capi| match operation {
            Operation::CopyTrailers => capi.copy_trailers(self.handle(), &mut slots, &mut region),
            _ => capi.copy_headers(self.handle(), &mut slots, &mut region),
        })?;

        let decoded = decode_pairs(&slots, &region, bridge.config().strict_utf8).map_err(|source| {
            let err = BridgeError::Decode { operation, source };
            bridge.failed(self.handle(), operation, &err);
            err
        })?;
        bridge.metrics().record_bytes_in(operation, total_bytes);
        Ok(decoded)
    }
}

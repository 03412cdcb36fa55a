// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::slice::Iter;

use smol_str::SmolStr;

/// Represents a single SIP header field as a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

impl Header {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn value(&self) -> &str {
        self.value.as_str()
    }
}

/// Collection of SIP headers preserving insertion order.
///
/// Order matters for the multi-valued routing headers (Via, Route,
/// Record-Route): the first occurrence is the "top" value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// Creates an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header to the collection.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Inserts a header above every existing header of the same name.
    ///
    /// When no header with that name exists the new one goes to the front
    /// of the list.
    pub fn prepend(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        let name = name.into();
        let index = self.position(name.as_str()).unwrap_or(0);
        self.0.insert(
            index,
            Header {
                name,
                value: value.into(),
            },
        );
    }

    /// Returns an iterator over the stored headers.
    pub fn iter(&self) -> Iter<'_, Header> {
        self.0.iter()
    }

    /// Returns the number of headers present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the collection does not contain any headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index of the first header whose name matches ignoring ASCII case.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// Finds the first header whose name matches ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Returns all headers with the given name, preserving original order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Counts header lines with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.get_all(name).count()
    }

    /// Replaces the value of the first matching header, or appends one.
    pub fn set_or_push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|h| h.name.eq_ignore_ascii_case(&name)) {
            Some(existing) => existing.value = value,
            None => self.0.push(Header { name, value }),
        }
    }

    /// Replaces the value of the header line at `index`.
    pub fn set_at(&mut self, index: usize, value: impl Into<SmolStr>) {
        if let Some(header) = self.0.get_mut(index) {
            header.value = value.into();
        }
    }

    /// Removes the first header line with the given name and returns it.
    pub fn remove_first(&mut self, name: &str) -> Option<Header> {
        let index = self.position(name)?;
        Some(self.0.remove(index))
    }

    /// Removes every header with the given name, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    /// Returns the Call-ID value, trimmed.
    pub fn call_id(&self) -> Option<&str> {
        self.get("Call-ID").map(|v| v.trim())
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

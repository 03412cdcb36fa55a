// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

use crate::{Headers, SipUri};

/// One parsed Route/Record-Route value: `["name"] <uri>;params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub display_name: Option<SmolStr>,
    pub uri: SipUri,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl RouteEntry {
    /// Parses a single route value. Bare URIs are accepted; everything after
    /// the scheme then belongs to the URI.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let Some(open) = value.find('<') else {
            return Some(Self {
                display_name: None,
                uri: SipUri::parse(value)?,
                params: BTreeMap::new(),
            });
        };
        let close = value[open..].find('>')? + open;
        let display = value[..open].trim().trim_matches('"').trim();
        let uri = SipUri::parse(&value[open + 1..close])?;

        let mut params = BTreeMap::new();
        for part in value[close + 1..].split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((k, v)) => params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim())),
                ),
                None => params.insert(SmolStr::new(part.to_ascii_lowercase()), None),
            };
        }

        Some(Self {
            display_name: (!display.is_empty()).then(|| SmolStr::new(display)),
            uri,
            params,
        })
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

/// Splits a comma-separated header line into its values, ignoring commas
/// inside `<...>` and quoted strings.
pub fn split_header_values(line: &str) -> Vec<&str> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                let value = line[start..idx].trim();
                if !value.is_empty() {
                    values.push(value);
                }
                start = idx + 1;
            }
            _ => {}
        }
    }
    let tail = line[start..].trim();
    if !tail.is_empty() {
        values.push(tail);
    }
    values
}

/// Returns the topmost value of a multi-valued header such as Route.
pub fn top_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    let line = headers.get(name)?;
    split_header_values(line).into_iter().next()
}

/// Removes the topmost value of a multi-valued header and returns it.
///
/// A comma-joined first line loses only its first value; the line is dropped
/// once empty.
pub fn remove_top_value(headers: &mut Headers, name: &str) -> Option<SmolStr> {
    let index = headers.position(name)?;
    let line = headers.get(name)?.clone();
    let values = split_header_values(&line);
    let (first, rest) = values.split_first()?;
    let first = SmolStr::new(*first);
    if rest.is_empty() {
        headers.remove_first(name);
    } else {
        headers.set_at(index, rest.join(", "));
    }
    Some(first)
}

/// Counts individual values across every line of a multi-valued header.
pub fn count_values(headers: &Headers, name: &str) -> usize {
    headers
        .get_all(name)
        .map(|line| split_header_values(line).len())
        .sum()
}

//! Caller-facing result model: attributes, entries and aggregated search results.

use crate::control::Control;
use crate::error::{LdapError, Result};
use crate::ldap_protocol::{SearchResultEntry, SearchScope};
use std::fmt;

/// Named attribute with its values in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    values: Vec<Vec<u8>>,
}

impl Attribute {
    /// An attribute always carries at least one value.
    pub fn new(name: impl Into<String>, values: Vec<Vec<u8>>) -> Result<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(LdapError::decode(format!("attribute {} has no values", name)));
        }
        Ok(Self { name, values })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    /// True when every byte of every value is printable ASCII.
    pub fn is_print(&self) -> bool {
        self.values.iter().all(|v| is_printable(v))
    }

    /// `name: [v]` for one value, `name: (n)[v1, v2]` otherwise; non-printable values become `binary-data[len]`.
    pub fn to_text(&self) -> String {
        let rendered: Vec<String> = self
            .values
            .iter()
            .map(|v| {
                if is_printable(v) {
                    String::from_utf8_lossy(v).into_owned()
                } else {
                    format!("binary-data[{}]", v.len())
                }
            })
            .collect();
        if rendered.len() > 1 {
            format!("{}: ({})[{}]", self.name, rendered.len(), rendered.join(", "))
        } else {
            format!("{}: [{}]", self.name, rendered.join(", "))
        }
    }
}

fn is_printable(value: &[u8]) -> bool {
    value.iter().all(|&b| (0x20..=0x7E).contains(&b))
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: String,
    attributes: Vec<Attribute>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Result<Self> {
        let dn = dn.into();
        if dn.is_empty() {
            return Err(LdapError::decode("entry without distinguished name"));
        }
        Ok(Self {
            dn,
            attributes: Vec::new(),
        })
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn append(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Values of the first attribute named exactly `name`; empty when absent.
    pub fn get_values_by_name(&self, name: &str) -> &[Vec<u8>] {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_one_value_by_name(&self, name: &str) -> Result<&[u8]> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.values.first())
            .map(Vec::as_slice)
            .ok_or_else(|| LdapError::lookup(name))
    }

    pub fn to_text(&self) -> String {
        let mut txt = format!("dn: {}\n", self.dn);
        for attribute in &self.attributes {
            txt.push_str(&attribute.to_text());
            txt.push('\n');
        }
        txt
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Build an Entry from a decoded SearchResultEntry. Value-less attributes are skipped.
pub(crate) fn decode_entry(raw: SearchResultEntry) -> Result<Entry> {
    let mut entry = Entry::new(raw.object_name)?;
    for attr in raw.attributes {
        if attr.attr_values.is_empty() {
            continue;
        }
        entry.append(Attribute::new(attr.attr_type, attr.attr_values)?);
    }
    Ok(entry)
}

/// Outcome of one search: the request metadata and the entries in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    filter: String,
    base: String,
    scope: SearchScope,
    attributes: Vec<String>,
    entries: Vec<Entry>,
    referrals: Vec<String>,
    controls: Vec<Control>,
}

impl SearchResult {
    pub fn new(
        filter: impl Into<String>,
        base: impl Into<String>,
        scope: SearchScope,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            filter: filter.into(),
            base: base.into(),
            scope,
            attributes,
            entries: Vec::new(),
            referrals: Vec::new(),
            controls: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn scope(&self) -> SearchScope {
        self.scope
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// URLs from search result references.
    pub fn referrals(&self) -> &[String] {
        &self.referrals
    }

    /// Controls returned with SearchResultDone.
    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub(crate) fn push_referrals(&mut self, uris: Vec<String>) {
        self.referrals.extend(uris);
    }

    pub(crate) fn set_controls(&mut self, controls: Vec<Control>) {
        self.controls = controls;
    }

    pub fn to_text(&self) -> String {
        let mut txt = format!("# query : {}\n", self.filter);
        txt.push_str(&format!("# num results : {}\n", self.count()));
        txt.push_str(&format!("# search : {}\n", self.filter));
        txt.push_str(&format!("# base : {}\n", self.base));
        txt.push_str(&format!("# attributes : [{}]\n", self.attributes.join(", ")));
        for entry in &self.entries {
            txt.push_str(&entry.to_text());
            txt.push('\n');
        }
        txt
    }
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

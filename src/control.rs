//! Request controls attached to a search (RFC 4511 section 4.1.11).

use crate::error::{LdapError, Result};

/// LDAP control: OID, criticality and an opaque value.
///
/// The OID and criticality given by the caller are sent exactly as supplied;
/// an empty value is omitted on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    oid: String,
    critical: bool,
    value: Vec<u8>,
}

impl Control {
    /// Build a control after checking that `oid` is a dotted-numeric object identifier.
    pub fn new(oid: impl Into<String>, critical: bool, value: impl Into<Vec<u8>>) -> Result<Self> {
        let oid = oid.into();
        validate_oid(&oid)?;
        Ok(Self {
            oid,
            critical,
            value: value.into(),
        })
    }

    /// Non-critical control without a value.
    pub fn with_oid(oid: impl Into<String>) -> Result<Self> {
        Self::new(oid, false, Vec::new())
    }

    /// Controls parsed from a server response are kept as received.
    pub(crate) fn from_wire(oid: String, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid,
            critical,
            value: value.unwrap_or_default(),
        }
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// numericoid = number 1*( DOT number ), number = DIGIT / ( LDIGIT 1*DIGIT )  (RFC 4512)
fn validate_oid(oid: &str) -> Result<()> {
    if oid.is_empty() {
        return Err(LdapError::control(oid, "empty OID"));
    }
    let mut arcs = 0usize;
    for arc in oid.split('.') {
        if arc.is_empty() {
            return Err(LdapError::control(oid, "empty arc"));
        }
        if !arc.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LdapError::control(oid, format!("non-numeric arc {:?}", arc)));
        }
        if arc.len() > 1 && arc.starts_with('0') {
            return Err(LdapError::control(oid, format!("leading zero in arc {:?}", arc)));
        }
        arcs += 1;
    }
    if arcs < 2 {
        return Err(LdapError::control(oid, "an OID needs at least two arcs"));
    }
    Ok(())
}

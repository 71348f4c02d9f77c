// LDAP protocol handling with BER encoding/decoding
// Client side of LDAP v3: requests are encoded, responses are parsed

use crate::control::Control;
use anyhow::{Context, Result, bail};
use ldap3::asn1::{ASNTag, StructureTag, TagClass, PL};
use std::io::{Cursor, Read};

/// StartTLS extended operation (RFC 4511 section 4.14)
pub const START_TLS_OID: &str = "1.3.6.1.4.1.1466.20037";

/// Unsolicited Notice of Disconnection (RFC 4511 section 4.4.1)
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

// LDAP Message structure
#[derive(Debug, Clone)]
pub struct LdapMessage {
    pub message_id: i32,
    pub protocol_op: ProtocolOp,
    pub controls: Option<Vec<Control>>,
}

#[derive(Debug, Clone)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(LdapResult),
    SearchRequest(SearchRequest),
    SearchResultEntry(SearchResultEntry),
    SearchResultReference(Vec<String>),
    SearchResultDone(LdapResult),
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
    IntermediateResponse(IntermediateResponse),
    AbandonRequest(i32),
    UnbindRequest,
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub version: i32,
    pub name: String,
    /// Simple authentication password; empty for anonymous bind.
    pub password: Vec<u8>,
}

/// LDAPResult components shared by every final response.
#[derive(Debug, Clone, Default)]
pub struct LdapResult {
    pub result_code: i32,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub referrals: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_object: String,
    pub scope: SearchScope,
    pub deref_aliases: i32,
    pub size_limit: i32,
    pub time_limit: i32,
    pub types_only: bool,
    /// Filter already in BER form (see `encode_filter`).
    pub filter: Vec<u8>,
    pub attributes: Vec<String>,
}

/// Search breadth, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Base = 0,
    OneLevel = 1,
    Subtree = 2,
}

impl TryFrom<i32> for SearchScope {
    type Error = anyhow::Error;
    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SearchScope::Base),
            1 => Ok(SearchScope::OneLevel),
            2 => Ok(SearchScope::Subtree),
            _ => bail!("Invalid search scope: {}", value),
        }
    }
}

impl std::str::FromStr for SearchScope {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(SearchScope::Base),
            "one" | "onelevel" | "one_level" => Ok(SearchScope::OneLevel),
            "sub" | "subtree" => Ok(SearchScope::Subtree),
            _ => bail!("Invalid search scope: {}", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResultEntry {
    pub object_name: String,
    pub attributes: Vec<PartialAttribute>,
}

#[derive(Debug, Clone)]
pub struct PartialAttribute {
    pub attr_type: String,
    pub attr_values: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ExtendedRequest {
    pub request_name: String,
    pub request_value: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub response_name: Option<String>,
    pub response_value: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct IntermediateResponse {
    pub response_name: Option<String>,
    pub response_value: Option<Vec<u8>>,
}

// BER parsing utilities
pub(crate) struct BerReader<'a> {
    pub(crate) cursor: Cursor<&'a [u8]>,
}

impl<'a> BerReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub(crate) fn read_tag(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.cursor.read_exact(&mut buf).context("BER truncated: missing tag")?;
        Ok(buf[0])
    }

    pub(crate) fn peek_tag(&self) -> Option<u8> {
        let pos = self.cursor.position() as usize;
        self.cursor.get_ref().get(pos).copied()
    }

    pub(crate) fn read_length(&mut self) -> Result<usize> {
        let mut buf = [0u8; 1];
        self.cursor.read_exact(&mut buf).context("BER truncated: missing length")?;
        let first_byte = buf[0];

        if (first_byte & 0x80) == 0 {
            // Short form
            Ok(first_byte as usize)
        } else {
            // Long form
            let length_bytes = (first_byte & 0x7F) as usize;
            if length_bytes == 0 {
                bail!("Indefinite length not supported");
            }
            if length_bytes > 4 {
                bail!("Length too large: {} bytes", length_bytes);
            }
            if self.remaining() < length_bytes {
                bail!("BER truncated: length encoding needs {} bytes, {} remaining", length_bytes, self.remaining());
            }
            let mut length = 0u32;
            for _ in 0..length_bytes {
                self.cursor.read_exact(&mut buf)?;
                length = (length << 8) | buf[0] as u32;
            }
            Ok(length as usize)
        }
    }

    /// Read one TLV and return its tag and a borrowed view of the content.
    pub(crate) fn read_tlv(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = self.read_tag()?;
        let length = self.read_length()?;
        if self.remaining() < length {
            bail!("BER truncated: tag 0x{:02X} needs {} bytes, {} remaining", tag, length, self.remaining());
        }
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        self.cursor.set_position((start + length) as u64);
        Ok((tag, &data[start..start + length]))
    }

    /// Read a TLV that must carry `expected` as its tag.
    pub(crate) fn read_expected(&mut self, expected: u8, what: &str) -> Result<&'a [u8]> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            bail!("Expected {} tag (0x{:02X}), got: 0x{:02X}", what, expected, tag);
        }
        Ok(content)
    }

    /// Enter a constructed element: returns a reader over its content.
    pub(crate) fn read_constructed(&mut self, expected: u8, what: &str) -> Result<BerReader<'a>> {
        Ok(BerReader::new(self.read_expected(expected, what)?))
    }

    pub(crate) fn read_sequence(&mut self) -> Result<BerReader<'a>> {
        self.read_constructed(0x30, "SEQUENCE")
    }

    pub(crate) fn read_integer(&mut self) -> Result<i32> {
        let content = self.read_expected(0x02, "INTEGER")?;
        decode_integer(content)
    }

    pub(crate) fn read_enumerated(&mut self) -> Result<i32> {
        let content = self.read_expected(0x0A, "ENUMERATED")?;
        decode_integer(content)
    }

    pub(crate) fn read_boolean(&mut self) -> Result<bool> {
        let content = self.read_expected(0x01, "BOOLEAN")?;
        if content.len() != 1 {
            bail!("Boolean value must be 1 byte, got: {}", content.len());
        }
        Ok(content[0] != 0)
    }

    pub(crate) fn read_octet_string(&mut self) -> Result<Vec<u8>> {
        Ok(self.read_expected(0x04, "OCTET STRING")?.to_vec())
    }

    pub(crate) fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_octet_string()?;
        String::from_utf8(bytes).context("Invalid UTF-8 string")
    }

    pub(crate) fn remaining(&self) -> usize {
        let pos = self.cursor.position() as usize;
        let len = self.cursor.get_ref().len();
        len.saturating_sub(pos)
    }
}

pub(crate) fn decode_integer(content: &[u8]) -> Result<i32> {
    if content.is_empty() {
        bail!("Integer with zero length");
    }
    if content.len() > 4 {
        bail!("Integer too large: {} bytes", content.len());
    }
    let mut value = 0i32;
    for &byte in content {
        value = (value << 8) | (byte as i32);
    }

    // Sign extension for negative numbers
    if content.len() < 4 && (content[0] & 0x80) != 0 {
        value |= !0 << (content.len() * 8);
    }

    Ok(value)
}

// BER encoding utilities
pub struct BerWriter {
    buffer: Vec<u8>,
}

impl BerWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
        }
    }

    pub fn write_tag(&mut self, tag: u8) {
        self.buffer.push(tag);
    }

    fn write_length(&mut self, length: usize) {
        let encoded = encode_length(length);
        self.buffer.extend_from_slice(&encoded);
    }

    /// Primitive TLV with an arbitrary tag.
    pub fn write_primitive(&mut self, tag: u8, content: &[u8]) {
        self.write_tag(tag);
        self.write_length(content.len());
        self.buffer.extend_from_slice(content);
    }

    pub fn write_integer_tagged(&mut self, tag: u8, value: i32) {
        let bytes = value.to_be_bytes();
        // Drop leading bytes that only repeat the sign
        let mut start = 0;
        while start < 3 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        self.write_primitive(tag, &bytes[start..]);
    }

    pub fn write_integer(&mut self, value: i32) {
        self.write_integer_tagged(0x02, value);
    }

    pub fn write_octet_string(&mut self, data: &[u8]) {
        self.write_primitive(0x04, data);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_octet_string(s.as_bytes());
    }

    pub fn write_boolean(&mut self, value: bool) {
        self.write_primitive(0x01, &[if value { 0xFF } else { 0x00 }]);
    }

    pub fn write_enumerated(&mut self, value: i32) {
        self.write_integer_tagged(0x0A, value);
    }

    pub fn write_raw(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Open a constructed element with `tag`; returns the position to pass to `end_sequence`.
    pub fn start_constructed(&mut self, tag: u8) -> usize {
        self.write_tag(tag);
        let length_pos = self.buffer.len();
        self.buffer.push(0); // Placeholder for length
        length_pos
    }

    pub fn start_sequence(&mut self) -> usize {
        self.start_constructed(0x30)
    }

    /// Back-patch the length placeholder at `length_pos` (short or long form).
    pub fn end_sequence(&mut self, length_pos: usize) {
        let content_len = self.buffer.len() - (length_pos + 1);
        let encoded = encode_length(content_len);
        self.buffer.splice(length_pos..length_pos + 1, encoded);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for BerWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_length(length: usize) -> Vec<u8> {
    if length < 128 {
        // Short form
        vec![length as u8]
    } else {
        // Long form
        let mut bytes = Vec::new();
        let mut len = length;
        while len > 0 {
            bytes.push((len & 0xFF) as u8);
            len >>= 8;
        }
        bytes.reverse();
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
        out
    }
}

// LDAP protocol tag constants
pub const LDAP_TAG_BIND_REQUEST: u8 = 0x60;
pub const LDAP_TAG_BIND_RESPONSE: u8 = 0x61;
pub const LDAP_TAG_UNBIND_REQUEST: u8 = 0x42;
pub const LDAP_TAG_SEARCH_REQUEST: u8 = 0x63;
pub const LDAP_TAG_SEARCH_RESULT_ENTRY: u8 = 0x64;
pub const LDAP_TAG_SEARCH_RESULT_DONE: u8 = 0x65;
pub const LDAP_TAG_ABANDON_REQUEST: u8 = 0x50;
pub const LDAP_TAG_SEARCH_RESULT_REFERENCE: u8 = 0x73;
pub const LDAP_TAG_EXTENDED_REQUEST: u8 = 0x77;
pub const LDAP_TAG_EXTENDED_RESPONSE: u8 = 0x78;
/// [APPLICATION 25] intermediate response
pub const LDAP_TAG_INTERMEDIATE_RESPONSE: u8 = 0x79;

/// Context [0] IMPLICIT SEQUENCE OF control
pub(crate) const LDAP_CONTEXT_CONTROLS: u8 = 0xA0;
/// Simple authentication [0] IMPLICIT OCTET STRING
pub(crate) const LDAP_CONTEXT_SIMPLE_AUTH: u8 = 0x80;
/// LDAPResult referral [3] IMPLICIT SEQUENCE OF URI
const LDAP_CONTEXT_REFERRAL: u8 = 0xA3;
/// ExtendedRequest requestName [0] / requestValue [1]
pub(crate) const LDAP_CONTEXT_EXT_REQUEST_NAME: u8 = 0x80;
pub(crate) const LDAP_CONTEXT_EXT_REQUEST_VALUE: u8 = 0x81;
/// ExtendedResponse responseName [10] / responseValue [11]
const LDAP_CONTEXT_EXT_RESPONSE_NAME: u8 = 0x8A;
const LDAP_CONTEXT_EXT_RESPONSE_VALUE: u8 = 0x8B;
/// IntermediateResponse responseName [0] / responseValue [1]
const LDAP_CONTEXT_INTERMEDIATE_NAME: u8 = 0x80;
const LDAP_CONTEXT_INTERMEDIATE_VALUE: u8 = 0x81;

/// Convert an RFC 4515 filter string to its BER encoding.
pub fn encode_filter(filter: &str) -> Result<Vec<u8>> {
    let tag = ldap3::parse_filter(filter)
        .map_err(|_| anyhow::anyhow!("Invalid search filter: {}", filter))?
        .into_structure();
    let mut writer = BerWriter::new();
    write_structure_tag(&mut writer, &tag)?;
    Ok(writer.into_vec())
}

fn write_structure_tag(writer: &mut BerWriter, tag: &StructureTag) -> Result<()> {
    if tag.id > 30 {
        bail!("Multi-byte tag numbers not supported: {}", tag.id);
    }
    let class_bits: u8 = match tag.class {
        TagClass::Universal => 0x00,
        TagClass::Application => 0x40,
        TagClass::Context => 0x80,
        TagClass::Private => 0xC0,
    };
    match &tag.payload {
        PL::P(bytes) => writer.write_primitive(class_bits | tag.id as u8, bytes),
        PL::C(children) => {
            let pos = writer.start_constructed(class_bits | 0x20 | tag.id as u8);
            for child in children {
                write_structure_tag(writer, child)?;
            }
            writer.end_sequence(pos);
        }
    }
    Ok(())
}

pub fn encode_ldap_message(message: &LdapMessage) -> Result<Vec<u8>> {
    let mut writer = BerWriter::new();
    let seq_start = writer.start_sequence();

    writer.write_integer(message.message_id);

    match &message.protocol_op {
        ProtocolOp::BindRequest(req) => encode_bind_request(&mut writer, req),
        ProtocolOp::SearchRequest(req) => encode_search_request(&mut writer, req),
        ProtocolOp::ExtendedRequest(req) => encode_extended_request(&mut writer, req),
        ProtocolOp::AbandonRequest(id) => writer.write_integer_tagged(LDAP_TAG_ABANDON_REQUEST, *id),
        ProtocolOp::UnbindRequest => writer.write_primitive(LDAP_TAG_UNBIND_REQUEST, &[]),
        _ => bail!("Cannot encode operation type"),
    }

    if let Some(controls) = &message.controls {
        if !controls.is_empty() {
            encode_controls(&mut writer, controls);
        }
    }

    writer.end_sequence(seq_start);
    Ok(writer.into_vec())
}

fn encode_bind_request(writer: &mut BerWriter, req: &BindRequest) {
    let pos = writer.start_constructed(LDAP_TAG_BIND_REQUEST);
    writer.write_integer(req.version);
    writer.write_string(&req.name);
    writer.write_primitive(LDAP_CONTEXT_SIMPLE_AUTH, &req.password);
    writer.end_sequence(pos);
}

fn encode_search_request(writer: &mut BerWriter, req: &SearchRequest) {
    let pos = writer.start_constructed(LDAP_TAG_SEARCH_REQUEST);
    writer.write_string(&req.base_object);
    writer.write_enumerated(req.scope as i32);
    writer.write_enumerated(req.deref_aliases);
    writer.write_integer(req.size_limit);
    writer.write_integer(req.time_limit);
    writer.write_boolean(req.types_only);
    writer.write_raw(&req.filter);
    let attrs = writer.start_sequence();
    for attr in &req.attributes {
        writer.write_string(attr);
    }
    writer.end_sequence(attrs);
    writer.end_sequence(pos);
}

fn encode_extended_request(writer: &mut BerWriter, req: &ExtendedRequest) {
    let pos = writer.start_constructed(LDAP_TAG_EXTENDED_REQUEST);
    writer.write_primitive(LDAP_CONTEXT_EXT_REQUEST_NAME, req.request_name.as_bytes());
    if let Some(value) = &req.request_value {
        writer.write_primitive(LDAP_CONTEXT_EXT_REQUEST_VALUE, value);
    }
    writer.end_sequence(pos);
}

/// Controls ::= [0] SEQUENCE OF Control; Control ::= SEQUENCE { type, criticality DEFAULT FALSE, value OPTIONAL }
fn encode_controls(writer: &mut BerWriter, controls: &[Control]) {
    let pos = writer.start_constructed(LDAP_CONTEXT_CONTROLS);
    for ctrl in controls {
        let ctrl_pos = writer.start_sequence();
        writer.write_string(ctrl.oid());
        if ctrl.is_critical() {
            writer.write_boolean(true);
        }
        if !ctrl.value().is_empty() {
            writer.write_octet_string(ctrl.value());
        }
        writer.end_sequence(ctrl_pos);
    }
    writer.end_sequence(pos);
}

/// Parse only the LDAP message header (SEQUENCE, messageID, protocolOp tag).
pub fn parse_ldap_message_header(data: &[u8]) -> Result<(i32, u8)> {
    let mut outer = BerReader::new(data);
    let mut reader = outer.read_sequence()?;
    let message_id = reader.read_integer()?;
    let tag = reader.peek_tag().ok_or_else(|| anyhow::anyhow!("LDAP message without protocolOp"))?;
    Ok((message_id, tag))
}

pub fn parse_ldap_message(data: &[u8]) -> Result<LdapMessage> {
    let mut outer = BerReader::new(data);

    // LDAPMessage ::= SEQUENCE { messageID, protocolOp, controls [0] OPTIONAL }
    let mut reader = outer.read_sequence()?;

    let message_id = reader.read_integer()?;

    let (tag, body) = reader.read_tlv()?;
    let protocol_op = match tag {
        LDAP_TAG_BIND_RESPONSE => ProtocolOp::BindResponse(
            parse_ldap_result(&mut BerReader::new(body)).context("BindResponse")?,
        ),
        LDAP_TAG_SEARCH_RESULT_ENTRY => ProtocolOp::SearchResultEntry(parse_search_result_entry(body)?),
        LDAP_TAG_SEARCH_RESULT_REFERENCE => ProtocolOp::SearchResultReference(parse_uri_list(body)?),
        LDAP_TAG_SEARCH_RESULT_DONE => ProtocolOp::SearchResultDone(
            parse_ldap_result(&mut BerReader::new(body)).context("SearchResultDone")?,
        ),
        LDAP_TAG_EXTENDED_RESPONSE => ProtocolOp::ExtendedResponse(parse_extended_response(body)?),
        LDAP_TAG_INTERMEDIATE_RESPONSE => ProtocolOp::IntermediateResponse(parse_intermediate_response(body)?),
        _ => bail!("Unsupported LDAP response tag: 0x{:02X}", tag),
    };

    let controls = if reader.remaining() > 0 {
        let (next_tag, body) = reader.read_tlv()?;
        if next_tag == LDAP_CONTEXT_CONTROLS {
            Some(parse_controls(body)?)
        } else {
            bail!("Unexpected trailing element 0x{:02X} in LDAP message", next_tag);
        }
    } else {
        None
    };

    Ok(LdapMessage {
        message_id,
        protocol_op,
        controls,
    })
}

/// LDAPResult ::= SEQUENCE { resultCode, matchedDN, diagnosticMessage, referral [3] OPTIONAL }
fn parse_ldap_result(reader: &mut BerReader) -> Result<LdapResult> {
    let result_code = reader.read_enumerated()?;
    let matched_dn = reader.read_string()?;
    let diagnostic_message = String::from_utf8_lossy(&reader.read_octet_string()?).to_string();
    let referrals = if reader.peek_tag() == Some(LDAP_CONTEXT_REFERRAL) {
        let (_, body) = reader.read_tlv()?;
        parse_uri_list(body)?
    } else {
        Vec::new()
    };
    Ok(LdapResult {
        result_code,
        matched_dn,
        diagnostic_message,
        referrals,
    })
}

fn parse_uri_list(body: &[u8]) -> Result<Vec<String>> {
    let mut reader = BerReader::new(body);
    let mut uris = Vec::new();
    while reader.remaining() > 0 {
        uris.push(reader.read_string()?);
    }
    Ok(uris)
}

/// SearchResultEntry ::= [APPLICATION 4] SEQUENCE { objectName, attributes PartialAttributeList }
fn parse_search_result_entry(body: &[u8]) -> Result<SearchResultEntry> {
    let mut reader = BerReader::new(body);
    let object_name = reader.read_string().context("SearchResultEntry objectName")?;
    let mut attrs = reader.read_sequence().context("SearchResultEntry attributes")?;
    let mut attributes = Vec::new();
    while attrs.remaining() > 0 {
        attributes.push(parse_partial_attribute(&mut attrs)?);
    }
    Ok(SearchResultEntry {
        object_name,
        attributes,
    })
}

/// PartialAttribute ::= SEQUENCE { type, vals SET OF value }
fn parse_partial_attribute(reader: &mut BerReader) -> Result<PartialAttribute> {
    let mut seq = reader.read_sequence()?;
    let attr_type = seq.read_string()?;
    let mut vals = seq.read_constructed(0x31, "SET")?;
    let mut attr_values = Vec::new();
    while vals.remaining() > 0 {
        attr_values.push(vals.read_octet_string()?);
    }
    Ok(PartialAttribute {
        attr_type,
        attr_values,
    })
}

fn parse_extended_response(body: &[u8]) -> Result<ExtendedResponse> {
    let mut reader = BerReader::new(body);
    let result = parse_ldap_result(&mut reader).context("ExtendedResponse")?;
    let mut response_name = None;
    let mut response_value = None;
    while reader.remaining() > 0 {
        let (tag, content) = reader.read_tlv()?;
        match tag {
            LDAP_CONTEXT_EXT_RESPONSE_NAME => {
                response_name = Some(String::from_utf8(content.to_vec()).context("Invalid responseName")?)
            }
            LDAP_CONTEXT_EXT_RESPONSE_VALUE => response_value = Some(content.to_vec()),
            _ => bail!("Unexpected ExtendedResponse element 0x{:02X}", tag),
        }
    }
    Ok(ExtendedResponse {
        result,
        response_name,
        response_value,
    })
}

fn parse_intermediate_response(body: &[u8]) -> Result<IntermediateResponse> {
    let mut reader = BerReader::new(body);
    let mut response_name = None;
    let mut response_value = None;
    while reader.remaining() > 0 {
        let (tag, content) = reader.read_tlv()?;
        match tag {
            LDAP_CONTEXT_INTERMEDIATE_NAME => {
                response_name = Some(String::from_utf8(content.to_vec()).context("Invalid responseName")?)
            }
            LDAP_CONTEXT_INTERMEDIATE_VALUE => response_value = Some(content.to_vec()),
            _ => bail!("Unexpected IntermediateResponse element 0x{:02X}", tag),
        }
    }
    Ok(IntermediateResponse {
        response_name,
        response_value,
    })
}

/// Parse controls: SEQUENCE OF Control, each Control ::= SEQUENCE { type, critical DEFAULT FALSE, value OPTIONAL }
pub(crate) fn parse_controls(body: &[u8]) -> Result<Vec<Control>> {
    let mut reader = BerReader::new(body);
    let mut controls = Vec::new();
    while reader.remaining() > 0 {
        let mut ctrl = reader.read_sequence()?;
        let ctype = ctrl.read_string()?;
        let critical = if ctrl.peek_tag() == Some(0x01) {
            ctrl.read_boolean()?
        } else {
            false
        };
        let value = if ctrl.remaining() > 0 {
            Some(ctrl.read_octet_string()?)
        } else {
            None
        };
        controls.push(Control::from_wire(ctype, critical, value));
    }
    Ok(controls)
}

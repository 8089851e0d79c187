// Minimal DNS protocol implementation
//
// Implements just enough of RFC 1035 to:
// - Parse inbound queries (header + question section)
// - Build TXT answers with an NS authority record
// - Parse those answers back (used by tests and tooling)

use super::{DnsError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;

/// Largest character-string inside TXT rdata
pub const MAX_CHARACTER_STRING: usize = 255;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const OPCODE_MASK: u16 = 0x7800;
const RCODE_MASK: u16 = 0x000f;

/// DNS message header (12 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,              // Transaction ID
    pub flags: u16,           // Flags
    pub qdcount: u16,         // Question count
    pub ancount: u16,         // Answer count
    pub nscount: u16,         // Authority count
    pub arcount: u16,         // Additional count
}

impl DnsHeader {
    pub const SIZE: usize = 12;

    /// Create a new query header
    pub fn new_query(id: u16) -> Self {
        Self {
            id,
            flags: FLAG_RD,    // Standard query, recursion desired
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }

    /// Create a response header answering `query`
    ///
    /// QR and RA are set, RD is echoed from the query, RCODE is NOERROR.
    pub fn response_to(query: &DnsHeader) -> Self {
        Self {
            id: query.id,
            flags: FLAG_QR | FLAG_RA | (query.flags & FLAG_RD),
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }

    /// Parse header from bytes
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(DnsError::InvalidMessage("Header too short".into()));
        }

        Ok(Self {
            id: buf.get_u16(),
            flags: buf.get_u16(),
            qdcount: buf.get_u16(),
            ancount: buf.get_u16(),
            nscount: buf.get_u16(),
            arcount: buf.get_u16(),
        })
    }

    /// Write header to buffer
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.id);
        buf.put_u16(self.flags);
        buf.put_u16(self.qdcount);
        buf.put_u16(self.ancount);
        buf.put_u16(self.nscount);
        buf.put_u16(self.arcount);
    }

    /// Check if this is a response
    pub fn is_response(&self) -> bool {
        (self.flags & FLAG_QR) != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags & OPCODE_MASK) >> 11) as u8
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    pub fn authoritative(&self) -> bool {
        (self.flags & FLAG_AA) != 0
    }

    pub fn truncated(&self) -> bool {
        (self.flags & FLAG_TC) != 0
    }

    pub fn recursion_desired(&self) -> bool {
        (self.flags & FLAG_RD) != 0
    }

    pub fn recursion_available(&self) -> bool {
        (self.flags & FLAG_RA) != 0
    }

    pub fn set_recursion_desired(&mut self, rd: bool) {
        if rd {
            self.flags |= FLAG_RD;
        } else {
            self.flags &= !FLAG_RD;
        }
    }
}

/// DNS record types this server deals with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    A = 1,
    NS = 2,
    TXT = 16,
}

impl RecordType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::A),
            2 => Some(Self::NS),
            16 => Some(Self::TXT),
            _ => None,
        }
    }
}

/// DNS class IN
pub const CLASS_IN: u16 = 1;

/// DNS question
///
/// `qtype` and `qclass` stay raw so that unsupported types can be seen and
/// dropped by the caller rather than failing the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuestion {
    /// Create a new TXT query
    pub fn new_txt(domain: &str) -> Self {
        Self {
            qname: domain.to_string(),
            qtype: RecordType::TXT as u16,
            qclass: CLASS_IN,
        }
    }

    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_u16(self.qtype)
    }

    /// Parse question from bytes
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        let qname = read_domain_name(buf)?;

        if buf.remaining() < 4 {
            return Err(DnsError::InvalidMessage("Question too short".into()));
        }

        let qtype = buf.get_u16();
        let qclass = buf.get_u16();

        Ok(Self { qname, qtype, qclass })
    }

    /// Write question to buffer
    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        write_domain_name(&self.qname, buf)?;
        buf.put_u16(self.qtype);
        buf.put_u16(self.qclass);
        Ok(())
    }
}

/// DNS resource record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsRecord {
    /// Create a TXT record
    ///
    /// Text longer than one character-string is split into consecutive
    /// 255-byte character-strings inside the same record.
    pub fn new_txt(domain: &str, text: &[u8], ttl: u32) -> Self {
        let mut rdata = Vec::with_capacity(text.len() + text.len() / MAX_CHARACTER_STRING + 1);

        if text.is_empty() {
            rdata.push(0);
        }
        for piece in text.chunks(MAX_CHARACTER_STRING) {
            rdata.push(piece.len() as u8);
            rdata.extend_from_slice(piece);
        }

        Self {
            name: domain.to_string(),
            rtype: RecordType::TXT as u16,
            rclass: CLASS_IN,
            ttl,
            rdata,
        }
    }

    /// Create an NS record pointing `domain` at `nameserver`
    pub fn new_ns(domain: &str, nameserver: &str, ttl: u32) -> Result<Self> {
        let mut rdata = BytesMut::with_capacity(nameserver.len() + 2);
        write_domain_name(nameserver, &mut rdata)?;

        Ok(Self {
            name: domain.to_string(),
            rtype: RecordType::NS as u16,
            rclass: CLASS_IN,
            ttl,
            rdata: rdata.to_vec(),
        })
    }

    /// Parse record from bytes
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        let name = read_domain_name(buf)?;

        if buf.remaining() < 10 {
            return Err(DnsError::InvalidMessage("Record too short".into()));
        }

        let rtype = buf.get_u16();
        let rclass = buf.get_u16();
        let ttl = buf.get_u32();
        let rdlen = buf.get_u16() as usize;

        if buf.remaining() < rdlen {
            return Err(DnsError::InvalidMessage("Truncated record data".into()));
        }

        let mut rdata = vec![0u8; rdlen];
        buf.copy_to_slice(&mut rdata);

        Ok(Self { name, rtype, rclass, ttl, rdata })
    }

    /// Write record to buffer
    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        if self.rdata.len() > u16::MAX as usize {
            return Err(DnsError::PacketTooLarge(self.rdata.len(), u16::MAX as usize));
        }

        write_domain_name(&self.name, buf)?;
        buf.put_u16(self.rtype);
        buf.put_u16(self.rclass);
        buf.put_u32(self.ttl);
        buf.put_u16(self.rdata.len() as u16);
        buf.put_slice(&self.rdata);
        Ok(())
    }

    /// Get TXT record data (strips length bytes, concatenates strings)
    pub fn get_txt_data(&self) -> Result<Vec<u8>> {
        if self.rtype != RecordType::TXT as u16 {
            return Err(DnsError::DecodingError("Not a TXT record".into()));
        }

        let mut result = Vec::with_capacity(self.rdata.len());
        let mut cursor = Cursor::new(&self.rdata[..]);

        while cursor.has_remaining() {
            let len = cursor.get_u8() as usize;

            if cursor.remaining() < len {
                return Err(DnsError::DecodingError("Truncated TXT data".into()));
            }

            let mut chunk = vec![0u8; len];
            cursor.copy_to_slice(&mut chunk);
            result.extend_from_slice(&chunk);
        }

        Ok(result)
    }

    /// Get the target name of an NS record
    pub fn get_ns_name(&self) -> Result<String> {
        if self.rtype != RecordType::NS as u16 {
            return Err(DnsError::DecodingError("Not an NS record".into()));
        }

        let mut cursor = Cursor::new(&self.rdata[..]);
        read_domain_name(&mut cursor)
    }
}

/// DNS message (complete query or response)
///
/// The additional section is neither parsed nor emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
}

impl DnsMessage {
    /// Create a new TXT query
    pub fn new_query(domain: &str, id: u16) -> Self {
        Self {
            header: DnsHeader::new_query(id),
            questions: vec![DnsQuestion::new_txt(domain)],
            answers: Vec::new(),
            authorities: Vec::new(),
        }
    }

    /// Parse DNS message from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let header = DnsHeader::parse(&mut cursor)?;

        let mut questions = Vec::new();
        for _ in 0..header.qdcount {
            questions.push(DnsQuestion::parse(&mut cursor)?);
        }

        let mut answers = Vec::new();
        for _ in 0..header.ancount {
            answers.push(DnsRecord::parse(&mut cursor)?);
        }

        let mut authorities = Vec::new();
        for _ in 0..header.nscount {
            authorities.push(DnsRecord::parse(&mut cursor)?);
        }

        Ok(Self { header, questions, answers, authorities })
    }

    /// Parse only the header and question section of a query
    ///
    /// Anything after the questions (e.g. an EDNS0 OPT record) is ignored.
    pub fn parse_query(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let header = DnsHeader::parse(&mut cursor)?;
        if header.is_response() {
            return Err(DnsError::InvalidMessage("Not a query".into()));
        }

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(DnsQuestion::parse(&mut cursor)?);
        }

        Ok(Self {
            header,
            questions,
            answers: Vec::new(),
            authorities: Vec::new(),
        })
    }

    /// Serialize DNS message to bytes
    ///
    /// Section counts are taken from the section contents, not the header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(512);

        let mut header = self.header.clone();
        header.qdcount = section_count(self.questions.len())?;
        header.ancount = section_count(self.answers.len())?;
        header.nscount = section_count(self.authorities.len())?;
        header.arcount = 0;
        header.write(&mut buf);

        for q in &self.questions {
            q.write(&mut buf)?;
        }

        for a in &self.answers {
            a.write(&mut buf)?;
        }

        for ns in &self.authorities {
            ns.write(&mut buf)?;
        }

        Ok(buf.to_vec())
    }

    /// Get the first question
    pub fn question(&self) -> Result<&DnsQuestion> {
        self.questions
            .first()
            .ok_or_else(|| DnsError::InvalidMessage("No questions in message".into()))
    }

    /// Get TXT data from first answer
    pub fn get_txt_answer(&self) -> Result<Vec<u8>> {
        self.answers
            .first()
            .ok_or_else(|| DnsError::InvalidMessage("No answers in message".into()))?
            .get_txt_data()
    }
}

fn section_count(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| DnsError::InvalidMessage("Too many records".into()))
}

/// Read an uncompressed domain name (no trailing dot)
///
/// Compression pointers are rejected: queries never carry them in the
/// question section and responses built here never emit them.
fn read_domain_name(buf: &mut Cursor<&[u8]>) -> Result<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut total = 0usize;

    loop {
        if !buf.has_remaining() {
            return Err(DnsError::InvalidMessage("Truncated domain name".into()));
        }

        let len = buf.get_u8();

        // End of name
        if len == 0 {
            break;
        }

        if (len & 0xC0) != 0 {
            return Err(DnsError::InvalidMessage("Compressed names are not supported".into()));
        }

        let label_len = len as usize;
        if buf.remaining() < label_len {
            return Err(DnsError::InvalidMessage("Truncated label".into()));
        }

        total += label_len + 1;
        if total > 255 {
            return Err(DnsError::InvalidMessage("Domain name too long".into()));
        }

        let mut label = vec![0u8; label_len];
        buf.copy_to_slice(&mut label);

        if label.contains(&b'.') {
            return Err(DnsError::InvalidMessage("Dot inside label".into()));
        }

        labels.push(
            String::from_utf8(label)
                .map_err(|_| DnsError::InvalidMessage("Invalid UTF-8 in domain name".into()))?,
        );
    }

    Ok(labels.join("."))
}

/// Write a domain name to DNS message
///
/// A trailing dot is accepted; the root name is `""` or `"."`.
fn write_domain_name(domain: &str, buf: &mut BytesMut) -> Result<()> {
    let domain = domain.strip_suffix('.').unwrap_or(domain);

    if !domain.is_empty() {
        for label in domain.split('.') {
            let bytes = label.as_bytes();
            if bytes.is_empty() || bytes.len() > 63 {
                return Err(DnsError::EncodingError(format!(
                    "Invalid label length {} in {:?}",
                    bytes.len(),
                    domain
                )));
            }
            buf.put_u8(bytes.len() as u8);
            buf.put_slice(bytes);
        }
    }
    buf.put_u8(0); // End of name
    Ok(())
}

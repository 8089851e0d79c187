// DNS wire handling
//
// Parses inbound TXT queries and builds the spoofed TXT + NS answers

pub mod protocol;
pub mod response;

pub use protocol::{DnsHeader, DnsMessage, DnsQuestion, DnsRecord, RecordType};
pub use response::{build_response, ANSWER_TTL, AUTHORITY_TTL};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Packet too large: {0} bytes (max: {1})")]
    PacketTooLarge(usize, usize),

    #[error("Invalid DNS message: {0}")]
    InvalidMessage(String),
}

pub type Result<T> = std::result::Result<T, DnsError>;

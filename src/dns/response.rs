//! Spoofed TXT answer construction
//!
//! Every answer carries exactly one TXT record for the queried name and one NS
//! record in the authority section naming the configured nameserver for the
//! zone.

use super::protocol::{DnsHeader, DnsMessage, DnsQuestion, DnsRecord};
use super::Result;

/// TTL of the TXT answer. Kept at 1 rather than 0 because some resolvers
/// refuse zero-TTL answers; every chunk must still be re-queried.
pub const ANSWER_TTL: u32 = 1;

/// TTL of the authority NS record
pub const AUTHORITY_TTL: u32 = 60;

/// Build the wire response for `query`
///
/// The question is echoed exactly as received (including letter case) and
/// the TXT owner is the queried name.
pub fn build_response(
    query: &DnsMessage,
    question: &DnsQuestion,
    rdata: &str,
    zone: &str,
    nameserver: &str,
) -> Result<Vec<u8>> {
    let response = DnsMessage {
        header: DnsHeader::response_to(&query.header),
        questions: vec![question.clone()],
        answers: vec![DnsRecord::new_txt(
            &question.qname,
            rdata.as_bytes(),
            ANSWER_TTL,
        )],
        authorities: vec![DnsRecord::new_ns(zone, nameserver, AUTHORITY_TTL)?],
    };

    response.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::RecordType;

    #[test]
    fn test_response_mirrors_query() {
        let query = DnsMessage::new_query("Payload-Bin.1.Example.com", 0x4242);
        let question = query.question().unwrap().clone();

        let bytes = build_response(&query, &question, "3q2+", "example.com", "ns1.example.com")
            .unwrap();
        let parsed = DnsMessage::parse(&bytes).unwrap();

        assert_eq!(parsed.header.id, 0x4242);
        assert!(parsed.header.is_response());
        assert!(parsed.header.recursion_desired());
        assert!(parsed.header.recursion_available());
        assert_eq!(parsed.header.rcode(), 0);
        assert_eq!(parsed.header.qdcount, 1);
        assert_eq!(parsed.header.ancount, 1);
        assert_eq!(parsed.header.nscount, 1);
        assert_eq!(parsed.header.arcount, 0);

        assert_eq!(parsed.questions, vec![question]);

        let answer = &parsed.answers[0];
        assert_eq!(answer.name, "Payload-Bin.1.Example.com");
        assert_eq!(answer.rtype, RecordType::TXT as u16);
        assert_eq!(answer.ttl, ANSWER_TTL);
        assert_eq!(parsed.get_txt_answer().unwrap(), b"3q2+");

        let authority = &parsed.authorities[0];
        assert_eq!(authority.name, "example.com");
        assert_eq!(authority.rtype, RecordType::NS as u16);
        assert_eq!(authority.ttl, AUTHORITY_TTL);
        assert_eq!(authority.get_ns_name().unwrap(), "ns1.example.com");
    }

    #[test]
    fn test_bad_nameserver_is_an_error() {
        let query = DnsMessage::new_query("a.example.com", 1);
        let question = query.question().unwrap().clone();

        assert!(build_response(&query, &question, "x", "example.com", "bad..name").is_err());
    }
}

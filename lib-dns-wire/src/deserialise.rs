//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.
//!
//! Decoding is total: any input either produces a `Message` or an
//! `Error`.  Nothing here panics, loops unboundedly, or reads out of
//! range, no matter how adversarial the datagram.

use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

/// The header as it appears on the wire: the `Header` fields plus the
/// four section counts.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    pub header: Header,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::HeaderUnreadable)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from(flags2 & HEADER_MASK_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer
            .next_u16()
            .map(QueryType::from)
            .ok_or(Error::QuestionTooShort(id))?;
        let qclass = buffer
            .next_u16()
            .map(QueryClass::from)
            .ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = buffer
            .next_u16()
            .map(RecordType::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let rclass = buffer
            .next_u16()
            .map(RecordClass::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position;

        let mut raw_rdata = || {
            if let Some(octets) = buffer.take(rdlength as usize) {
                Ok(Bytes::copy_from_slice(octets))
            } else {
                Err(Error::ResourceRecordTooShort(id))
            }
        };

        // types whose RDATA embeds a domain name are deserialised
        // here, while the whole message is still at hand to expand
        // compression pointers against.
        let rdata = match rtype {
            RecordType::A => RecordData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                refresh: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                retry: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                expire: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                minimum: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
            },
            RecordType::PTR => RecordData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::MX => RecordData::MX {
                preference: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                exchange: DomainName::deserialise(id, buffer)?,
            },
            RecordType::TXT => RecordData::TXT {
                octets: raw_rdata()?,
            },
            RecordType::AAAA => {
                let mut segments = [0u16; 8];
                for segment in &mut segments {
                    *segment = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
                }
                RecordData::AAAA {
                    address: Ipv6Addr::new(
                        segments[0],
                        segments[1],
                        segments[2],
                        segments[3],
                        segments[4],
                        segments[5],
                        segments[6],
                        segments[7],
                    ),
                }
            }
            RecordType::Unknown(tag) => RecordData::Unknown {
                tag,
                octets: raw_rdata()?,
            },
        };

        let rdata_stop = buffer.position;

        if rdata_stop == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                rdata,
                rclass,
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

impl DomainName {
    /// Decode a domain name, expanding compression pointers.
    ///
    /// Termination is guaranteed by two rules, each of which is a
    /// `FormatError` when violated: the accumulated name may not
    /// exceed 255 octets, and a pointer may only target an offset
    /// strictly below the offset the pointer itself was read at
    /// (RFC 1035 section 4.1.4: "a pointer to a prior occurance").
    ///
    /// On return the buffer is positioned just after the name: after
    /// the terminating zero octet, or after the first pointer.
    ///
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    #[allow(clippy::missing_panics_doc)]
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Label>::with_capacity(5);

        'outer: loop {
            let size_offset = buffer.position;
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                if size == 0 {
                    labels.push(Label::new());
                    break 'outer;
                }

                if let Some(os) = buffer.take(size as usize) {
                    // safe because of the bounds check above
                    let label = Label::try_from(os).unwrap();
                    octets.extend_from_slice(label.octets());
                    labels.push(label);
                } else {
                    return Err(Error::DomainTooShort(id));
                }

                if octets.len() > DOMAINNAME_MAX_LEN {
                    return Err(Error::DomainTooLong(id));
                }
            } else if size & 0b1100_0000 == 0b1100_0000 {
                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = usize::from(u16::from_be_bytes([hi, lo]));

                // a pointer may only go backwards, which both rules
                // out cycles and bounds the work at one pass over the
                // message.
                if ptr >= size_offset {
                    return Err(Error::DomainPointerInvalid { id, offset: size_offset });
                }

                let mut other = DomainName::deserialise(id, &mut buffer.at_offset(ptr))?;
                octets.append(&mut other.octets);
                labels.append(&mut other.labels);
                break 'outer;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if octets.len() <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { octets, labels })
        } else {
            Err(Error::DomainTooLong(id))
        }
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header - so
/// that an error response can be sent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't contain
    /// a valid ID.  An error cannot be sent back to the client in
    /// this case as, without an ID, it cannot be linked with the
    /// correct query.
    HeaderUnreadable,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record's RDATA does not fill its RDLENGTH.
    ResourceRecordInvalid(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 255 octets in size.
    DomainTooLong(u16),

    /// A domain pointer does not point strictly backwards.  `offset`
    /// is where in the buffer the pointer was read.
    DomainPointerInvalid { id: u16, offset: usize },

    /// A label length octet has the reserved `01` or `10` high bits.
    DomainLabelInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::HeaderUnreadable => None,
            Error::HeaderTooShort(id) => Some(id),
            Error::QuestionTooShort(id) => Some(id),
            Error::ResourceRecordTooShort(id) => Some(id),
            Error::ResourceRecordInvalid(id) => Some(id),
            Error::DomainTooShort(id) => Some(id),
            Error::DomainTooLong(id) => Some(id),
            Error::DomainPointerInvalid { id, .. } => Some(id),
            Error::DomainLabelInvalid(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::HeaderUnreadable => write!(f, "datagram too short to carry an id"),
            Error::HeaderTooShort(_) => write!(f, "header too short"),
            Error::QuestionTooShort(_) => write!(f, "question too short"),
            Error::ResourceRecordTooShort(_) => write!(f, "resource record too short"),
            Error::ResourceRecordInvalid(_) => write!(f, "resource record does not match rdlength"),
            Error::DomainTooShort(_) => write!(f, "domain name incomplete"),
            Error::DomainTooLong(_) => write!(f, "domain name over 255 octets"),
            Error::DomainPointerInvalid { offset, .. } => {
                write!(f, "domain pointer at offset {offset} does not point backwards")
            }
            Error::DomainLabelInvalid(_) => write!(f, "domain label has reserved high bits"),
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    pub position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() > self.position + 3 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            let c = self.octets[self.position + 2];
            let d = self.octets[self.position + 3];
            self.position += 4;
            Some(u32::from_be_bytes([a, b, c, d]))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_util::*;

    #[test]
    fn header_only_message_is_empty() {
        let octets = [
            0x12, 0x34, // id
            0x00, 0x00, // flags
            0x00, 0x00, // qdcount
            0x00, 0x00, // ancount
            0x00, 0x00, // nscount
            0x00, 0x00, // arcount
        ];

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(0x1234, message.header.id);
        assert!(message.questions.is_empty());
        assert!(message.answers.is_empty());
        assert!(message.authority.is_empty());
        assert!(message.additional.is_empty());
    }

    #[test]
    fn message_shorter_than_header_fails() {
        assert_eq!(Err(Error::HeaderUnreadable), Message::from_octets(&[0x12]));
        assert_eq!(
            Err(Error::HeaderTooShort(0x1234)),
            Message::from_octets(&[0x12, 0x34, 0x00, 0x00])
        );
    }

    #[test]
    fn counts_must_be_satisfied() {
        let octets = [
            0x12, 0x34, // id
            0x00, 0x00, // flags
            0x00, 0x01, // qdcount: 1, but no question follows
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        assert_eq!(
            Err(Error::DomainTooShort(0x1234)),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn label_of_63_octets_decodes() {
        let mut octets = vec![63];
        octets.extend_from_slice(&[b'x'; 63]);
        octets.push(0);

        let name = DomainName::deserialise(0, &mut ConsumableBuffer::new(&octets)).unwrap();
        assert_eq!(octets, name.octets);
    }

    #[test]
    fn label_of_64_octets_fails() {
        // 64 has the `01` high bits, which is exactly why 63 is the
        // label limit
        let mut octets = vec![64];
        octets.extend_from_slice(&[b'x'; 64]);
        octets.push(0);

        assert_eq!(
            Err(Error::DomainLabelInvalid(0)),
            DomainName::deserialise(0, &mut ConsumableBuffer::new(&octets))
        );
    }

    #[test]
    fn name_of_255_octets_decodes() {
        // four 62-octet labels plus one of 2: 4*63 + 3 = 255 octets
        let mut octets = Vec::new();
        for _ in 0..4 {
            octets.push(62);
            octets.extend_from_slice(&[b'x'; 62]);
        }
        octets.push(1);
        octets.push(b'x');
        octets.push(0);
        assert_eq!(255, octets.len());

        let name = DomainName::deserialise(0, &mut ConsumableBuffer::new(&octets)).unwrap();
        assert_eq!(255, name.octets.len());
    }

    #[test]
    fn name_of_256_octets_fails() {
        let mut octets = Vec::new();
        for _ in 0..4 {
            octets.push(62);
            octets.extend_from_slice(&[b'x'; 62]);
        }
        octets.push(2);
        octets.extend_from_slice(&[b'x'; 2]);
        octets.push(0);
        assert_eq!(256, octets.len());

        assert_eq!(
            Err(Error::DomainTooLong(0)),
            DomainName::deserialise(0, &mut ConsumableBuffer::new(&octets))
        );
    }

    #[test]
    fn pointer_to_earlier_offset_decodes() {
        let mut octets = Vec::new();
        octets.extend_from_slice(&[7]);
        octets.extend_from_slice(b"example");
        octets.extend_from_slice(&[3]);
        octets.extend_from_slice(b"com");
        octets.push(0);
        while octets.len() < 40 {
            octets.push(0xff); // filler the parser never touches
        }
        octets.extend_from_slice(&[3]);
        octets.extend_from_slice(b"www");
        octets.extend_from_slice(&[0b1100_0000, 0]); // pointer to offset 0

        let mut buffer = ConsumableBuffer::new(&octets);
        buffer.position = 40;
        let name = DomainName::deserialise(0, &mut buffer).unwrap();

        assert_eq!(domain("www.example.com"), name);
        // resumes just after the pointer
        assert_eq!(46, buffer.position);
    }

    #[test]
    fn pointer_to_own_offset_fails() {
        let mut octets = vec![0xff; 40];
        octets.extend_from_slice(&[0b1100_0000, 40]); // pointer to offset 40, read at offset 40

        let mut buffer = ConsumableBuffer::new(&octets);
        buffer.position = 40;
        assert_eq!(
            Err(Error::DomainPointerInvalid { id: 0, offset: 40 }),
            DomainName::deserialise(0, &mut buffer)
        );
    }

    #[test]
    fn pointer_forwards_fails() {
        let mut octets = vec![0xff; 40];
        octets.extend_from_slice(&[0b1100_0000, 50]);
        octets.resize(64, 0);

        let mut buffer = ConsumableBuffer::new(&octets);
        buffer.position = 40;
        assert_eq!(
            Err(Error::DomainPointerInvalid { id: 0, offset: 40 }),
            DomainName::deserialise(0, &mut buffer)
        );
    }

    #[test]
    fn pointer_cycle_fails_within_bounded_work() {
        // two pointers at offsets 0 and 2 referring to each other
        // would loop forever if chasing them were allowed; the
        // backwards-only rule cuts the chain at the second hop.
        let octets = [0b1100_0000, 2, 0b1100_0000, 0];

        let mut buffer = ConsumableBuffer::new(&octets);
        assert_eq!(
            Err(Error::DomainPointerInvalid { id: 0, offset: 0 }),
            DomainName::deserialise(0, &mut buffer)
        );
    }

    #[test]
    fn reserved_label_bits_fail() {
        for size in [0b0100_0000u8, 0b1000_0000] {
            let octets = [size, 0];
            assert_eq!(
                Err(Error::DomainLabelInvalid(0)),
                DomainName::deserialise(0, &mut ConsumableBuffer::new(&octets))
            );
        }
    }

    #[test]
    fn names_are_lowercased_on_decode() {
        let mut octets = vec![7];
        octets.extend_from_slice(b"EXAMPLE");
        octets.extend_from_slice(&[3]);
        octets.extend_from_slice(b"CoM");
        octets.push(0);

        let name = DomainName::deserialise(0, &mut ConsumableBuffer::new(&octets)).unwrap();
        assert_eq!("example.com", name.to_dotted_string());
    }

    #[test]
    fn rdata_shorter_than_rdlength_fails() {
        let mut octets = Vec::new();
        octets.extend_from_slice(&[
            0x12, 0x34, // id
            0x80, 0x00, // response
            0x00, 0x00, // qdcount
            0x00, 0x01, // ancount
            0x00, 0x00, // nscount
            0x00, 0x00, // arcount
        ]);
        octets.extend_from_slice(&[3, b'w', b'w', b'w', 0]); // name
        octets.extend_from_slice(&[0, 1]); // type A
        octets.extend_from_slice(&[0, 1]); // class IN
        octets.extend_from_slice(&[0, 0, 1, 44]); // ttl
        octets.extend_from_slice(&[0, 4]); // rdlength
        octets.extend_from_slice(&[93, 184]); // truncated rdata

        assert_eq!(
            Err(Error::ResourceRecordTooShort(0x1234)),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn rdlength_mismatch_fails() {
        let mut octets = Vec::new();
        octets.extend_from_slice(&[
            0x12, 0x34, 0x80, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ]);
        octets.extend_from_slice(&[3, b'w', b'w', b'w', 0]);
        octets.extend_from_slice(&[0, 1]); // type A
        octets.extend_from_slice(&[0, 1]);
        octets.extend_from_slice(&[0, 0, 1, 44]);
        octets.extend_from_slice(&[0, 6]); // rdlength says 6, A reads 4
        octets.extend_from_slice(&[93, 184, 216, 34, 0, 0]);

        assert_eq!(
            Err(Error::ResourceRecordInvalid(0x1234)),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn ns_rdata_expands_pointers() {
        let mut octets = Vec::new();
        octets.extend_from_slice(&[
            0x12, 0x34, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
        ]);
        // authority: "example.com" NS "ns1.example.com", with the NS
        // target compressed against the owner name at offset 12
        octets.extend_from_slice(&[7]);
        octets.extend_from_slice(b"example");
        octets.extend_from_slice(&[3]);
        octets.extend_from_slice(b"com");
        octets.push(0);
        octets.extend_from_slice(&[0, 2]); // type NS
        octets.extend_from_slice(&[0, 1]); // class IN
        octets.extend_from_slice(&[0, 0, 1, 44]); // ttl
        octets.extend_from_slice(&[0, 6]); // rdlength
        octets.extend_from_slice(&[3]);
        octets.extend_from_slice(b"ns1");
        octets.extend_from_slice(&[0b1100_0000, 12]);

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(
            RecordData::NS {
                nsdname: domain("ns1.example.com"),
            },
            message.authority[0].rdata
        );
    }
}

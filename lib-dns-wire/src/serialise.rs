//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.

use crate::types::*;

impl Message {
    /// Serialise with no size limit.  Used for outbound queries,
    /// which are always small.
    ///
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn into_octets(self) -> Result<Vec<u8>, Error> {
        self.into_octets_limited(usize::MAX)
    }

    /// Serialise for a UDP response: if the full message would exceed
    /// 512 octets, stop at the last whole record that fits, set the
    /// TC flag, and emit counts matching what was actually written.
    ///
    /// # Errors
    ///
    /// If the message is invalid.
    pub fn into_octets_for_udp(self) -> Result<Vec<u8>, Error> {
        self.into_octets_limited(UDP_PAYLOAD_LIMIT)
    }

    /// Serialise, dropping whole records from the tail to fit within
    /// `limit` octets.  Questions are never dropped.
    ///
    /// # Errors
    ///
    /// If the message is invalid.
    pub fn into_octets_limited(self, limit: usize) -> Result<Vec<u8>, Error> {
        let mut buffer = WritableBuffer::default();

        let qdcount = usize_to_u16(self.questions.len())?;
        self.header.serialise(&mut buffer);
        buffer.write_u16(qdcount);
        // section counts, patched below once it is known how many
        // records fit
        buffer.write_u16(0);
        buffer.write_u16(0);
        buffer.write_u16(0);

        for question in self.questions {
            question.serialise(&mut buffer);
        }

        let mut truncated = false;
        let mut counts = [0u16; 3];
        'sections: for (i, section) in [self.answers, self.authority, self.additional]
            .into_iter()
            .enumerate()
        {
            for rr in section {
                let boundary = buffer.index();
                rr.serialise(&mut buffer)?;
                if buffer.index() > limit {
                    buffer.octets.truncate(boundary);
                    truncated = true;
                    break 'sections;
                }
                counts[i] += 1;
            }
        }

        buffer.patch_u16(6, counts[0]);
        buffer.patch_u16(8, counts[1]);
        buffer.patch_u16(10, counts[2]);
        if truncated {
            buffer.octets[2] |= HEADER_MASK_TC;
        }

        Ok(buffer.octets)
    }
}

impl Header {
    /// Serialises the first four octets of the wire header; the
    /// section counts are the caller's problem.
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        // octet 1
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        // octet 2 - the Z bits stay zero
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & u8::from(self.rcode);

        buffer.write_u16(self.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
    }
}

impl Question {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        self.name.serialise(buffer);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        self.name.serialise(buffer);
        buffer.write_u16(self.rdata.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        // filled in below
        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        match self.rdata {
            RecordData::A { address } => buffer.write_octets(&address.octets()),
            RecordData::NS { nsdname } => nsdname.serialise(buffer),
            RecordData::CNAME { cname } => cname.serialise(buffer),
            RecordData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.serialise(buffer);
                rname.serialise(buffer);
                buffer.write_u32(serial);
                buffer.write_u32(refresh);
                buffer.write_u32(retry);
                buffer.write_u32(expire);
                buffer.write_u32(minimum);
            }
            RecordData::PTR { ptrdname } => ptrdname.serialise(buffer),
            RecordData::MX {
                preference,
                exchange,
            } => {
                buffer.write_u16(preference);
                exchange.serialise(buffer);
            }
            RecordData::TXT { octets } => buffer.write_octets(&octets),
            RecordData::AAAA { address } => buffer.write_octets(&address.octets()),
            RecordData::Unknown { octets, .. } => buffer.write_octets(&octets),
        };

        // -2 so we don't also include the 2 octets for the rdlength
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        buffer.patch_u16(rdlength_index, rdlength);

        Ok(())
    }
}

impl DomainName {
    /// Emit as uncompressed labels.  Compression on output is
    /// optional in RFC 1035 and a non-compressing encoder is
    /// interoperable, at the cost of some response bytes.
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        buffer.write_octets(&self.octets);
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which can be written to, for serialisation purposes.
pub struct WritableBuffer {
    pub octets: Vec<u8>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: Vec::with_capacity(UDP_PAYLOAD_LIMIT),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.push(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.extend_from_slice(octets);
    }

    /// Overwrite a previously-written u16 in place.
    pub fn patch_u16(&mut self, index: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.octets[index] = hi;
        self.octets[index + 1] = lo;
    }
}

/// Helper function to convert a `usize` into a `u16` (or return an error).
fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    if let Ok(t) = u16::try_from(counter) {
        Ok(t)
    } else {
        Err(Error::CounterTooLarge {
            counter,
            bits: u16::BITS,
        })
    }
}

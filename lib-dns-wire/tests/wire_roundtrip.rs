use bytes::Bytes;
use fake::{Fake, Faker};

use dns_wire::types::*;

#[test]
fn roundtrip_message() {
    for _ in 0..100 {
        let original = arbitrary_message();
        let octets = original.clone().into_octets().unwrap();
        let deserialised = Message::from_octets(&octets);

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_is_a_fixed_point() {
    // serialising a decoded message and decoding it again changes
    // nothing, whatever compression the original used
    for _ in 0..100 {
        let original = arbitrary_message();
        let octets = original.into_octets().unwrap();

        let once = Message::from_octets(&octets).unwrap();
        let twice = Message::from_octets(&once.clone().into_octets().unwrap()).unwrap();

        assert_eq!(once, twice);
    }
}

fn arbitrary_message() -> Message {
    let qdcount = (0..4).fake::<usize>();
    let ancount = (0..4).fake::<usize>();
    let nscount = (0..4).fake::<usize>();
    let arcount = (0..4).fake::<usize>();

    Message {
        header: arbitrary_header(),
        questions: (0..qdcount).map(|_| arbitrary_question()).collect(),
        answers: (0..ancount).map(|_| arbitrary_resourcerecord()).collect(),
        authority: (0..nscount).map(|_| arbitrary_resourcerecord()).collect(),
        additional: (0..arcount).map(|_| arbitrary_resourcerecord()).collect(),
    }
}

fn arbitrary_header() -> Header {
    Header {
        id: Faker.fake(),
        is_response: Faker.fake(),
        // opcode and rcode are 4-bit fields
        opcode: Opcode::from((Faker.fake::<u8>()) & 0b0000_1111),
        is_authoritative: Faker.fake(),
        is_truncated: Faker.fake(),
        recursion_desired: Faker.fake(),
        recursion_available: Faker.fake(),
        rcode: Rcode::from((Faker.fake::<u8>()) & 0b0000_1111),
    }
}

fn arbitrary_question() -> Question {
    Question {
        name: arbitrary_domainname(),
        qtype: QueryType::from(Faker.fake::<u16>()),
        qclass: QueryClass::from(Faker.fake::<u16>()),
    }
}

fn arbitrary_resourcerecord() -> ResourceRecord {
    // this should match the `RecordData` deserialisation
    let rdata = match RecordType::from(Faker.fake::<u16>()) {
        RecordType::A => RecordData::A {
            address: Faker.fake::<u32>().into(),
        },
        RecordType::NS => RecordData::NS {
            nsdname: arbitrary_domainname(),
        },
        RecordType::CNAME => RecordData::CNAME {
            cname: arbitrary_domainname(),
        },
        RecordType::SOA => RecordData::SOA {
            mname: arbitrary_domainname(),
            rname: arbitrary_domainname(),
            serial: Faker.fake(),
            refresh: Faker.fake(),
            retry: Faker.fake(),
            expire: Faker.fake(),
            minimum: Faker.fake(),
        },
        RecordType::PTR => RecordData::PTR {
            ptrdname: arbitrary_domainname(),
        },
        RecordType::MX => RecordData::MX {
            preference: Faker.fake(),
            exchange: arbitrary_domainname(),
        },
        RecordType::TXT => RecordData::TXT {
            octets: arbitrary_octets((0..64).fake()),
        },
        RecordType::AAAA => RecordData::AAAA {
            address: Faker.fake::<u128>().into(),
        },
        RecordType::Unknown(tag) => RecordData::Unknown {
            tag,
            octets: arbitrary_octets((0..64).fake()),
        },
    };

    ResourceRecord {
        name: arbitrary_domainname(),
        rdata,
        rclass: RecordClass::from(Faker.fake::<u16>()),
        ttl: Faker.fake(),
    }
}

fn arbitrary_domainname() -> DomainName {
    let num_labels = (1..5).fake::<usize>();
    let mut labels = Vec::with_capacity(num_labels + 1);

    for _ in 0..num_labels {
        let label_len = (1..63).fake::<usize>();
        let mut label = Vec::with_capacity(label_len);

        for _ in 0..label_len {
            label.push((b'a'..=b'z').fake::<u8>());
        }

        labels.push(Label::try_from(&label[..]).unwrap());
    }

    labels.push(Label::new());

    DomainName::from_labels(labels).unwrap()
}

fn arbitrary_octets(len: usize) -> Bytes {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(Faker.fake());
    }
    Bytes::from(out)
}

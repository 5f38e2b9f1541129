//! The RFC 1035 wire format: message types and a total
//! deserialiser/serialiser pair.
//!
//! Decoding never panics and never reads out of bounds, whatever the
//! input; encoding produces messages whose section counts always
//! match their sections, truncating at record boundaries when a UDP
//! size limit is in force.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

pub mod deserialise;
pub mod serialise;
pub mod types;

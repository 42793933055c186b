//! SOPAS binary telegram framing and decoding.

pub mod framer;
pub mod parser;

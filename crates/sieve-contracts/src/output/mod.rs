mod parser;

pub use parser::{parse_payload, ParseError, ParseReason, ParsedPayload, PayloadSource};

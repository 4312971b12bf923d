use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RLPDecodeError {
    #[error("Invalid compression")]
    InvalidCompression,
    #[error("Malformed data")]
    MalformedData,
    #[error("Unexpected list")]
    UnexpectedList,
    #[error("Unexpected string")]
    UnexpectedString,
    #[error("Field '{0}' of type {1} could not be decoded: {2}")]
    Field(String, &'static str, Box<RLPDecodeError>),
    #[error("Payload reached the end but more elements were expected")]
    InvalidLength,
    #[error("Unable to read payload length")]
    InvalidLengthPrefix,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RLPEncodeError {
    #[error("Invalid compression")]
    InvalidCompression,
}

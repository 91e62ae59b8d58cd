use thiserror::Error;

use crate::sip::invite::SessionParseError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid SIP message: {0}")]
    InvalidMessage(String),

    #[error("Invalid session invite: {0}")]
    InvalidSession(#[from] SessionParseError),

    #[error("MANSCDP XML error: {0}")]
    Xml(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

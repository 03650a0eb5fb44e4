use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid type: {0}")]
    InvalidType(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] http_range_client::HttpError),
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid maintenance interval \"{value}\"")]
    InvalidInterval {
        value: String,
        #[source]
        source: gatehouse_common::Error,
    },

    #[error(transparent)]
    Lane(#[from] gatehouse_lanes::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

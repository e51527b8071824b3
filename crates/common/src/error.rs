use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid duration \"{input}\": {reason}")]
    InvalidDuration { input: String, reason: &'static str },
}

impl Error {
    #[must_use]
    pub fn invalid_duration(input: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidDuration {
            input: input.into(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_duration_display() {
        let err = Error::invalid_duration("10x", "unknown unit");
        assert_eq!(err.to_string(), "invalid duration \"10x\": unknown unit");
    }
}

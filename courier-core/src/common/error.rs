use std::{error::Error as StdError, fmt};

pub type Result<T> = std::result::Result<T, Error>;
type Cause = Box<dyn StdError + Send + Sync>;

pub struct Error {
    inner: Box<ErrorImpl>,
    description: Option<String>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Indicates an input violates a size limit
    Validation,

    /// Indicates an append would overflow the owning file's cap
    Capacity,

    /// Indicates an offset or slot at or past the current end; readers
    /// treat this as "caught up"
    EndOfStream,

    /// Indicates an entry index outside the stored range
    OutOfRange,

    /// Indicates a topic or consumer unknown to the registry
    NotFound,

    /// Indicates a file operation failure
    File,

    /// Indicates a memory mapping failure
    Memory,

    /// Indicates decode error
    Decode,

    General,
}

impl Error {
    pub fn new(kind: Kind, description: Option<String>, cause: Option<Cause>) -> Self {
        Self {
            description,
            inner: Box::new(ErrorImpl { kind, cause }),
        }
    }

    pub fn new_validation(description: &str) -> Self {
        Error::new(Kind::Validation, Some(description.to_owned()), None)
    }

    pub fn new_capacity(description: &str) -> Self {
        Error::new(Kind::Capacity, Some(description.to_owned()), None)
    }

    pub fn new_end_of_stream(description: &str) -> Self {
        Error::new(Kind::EndOfStream, Some(description.to_owned()), None)
    }

    pub fn new_out_of_range(description: &str) -> Self {
        Error::new(Kind::OutOfRange, Some(description.to_owned()), None)
    }

    pub fn new_not_found(description: &str) -> Self {
        Error::new(Kind::NotFound, Some(description.to_owned()), None)
    }

    pub fn new_file(cause: Option<Cause>, description: Option<String>) -> Self {
        Error::new(Kind::File, description, cause)
    }

    pub fn new_memory(cause: Option<Cause>, description: Option<String>) -> Self {
        Error::new(Kind::Memory, description, cause)
    }

    pub fn new_decode(description: &str) -> Self {
        Error::new(Kind::Decode, Some(description.to_owned()), None)
    }

    pub fn new_general(description: &str) -> Self {
        Error::new(Kind::General, Some(description.to_owned()), None)
    }

    pub fn get_kind(&self) -> Kind {
        self.inner.kind
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.inner.kind, Kind::Validation)
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self.inner.kind, Kind::Capacity)
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.inner.kind, Kind::EndOfStream)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.inner.kind, Kind::NotFound)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("courier_core::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        if let Some(ref description) = self.description {
            f.field(description);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(description) = &self.description {
            f.write_str(description)?
        } else {
            f.write_str(&format!("{:?}", self.inner.kind))?
        }

        if let Some(ref cause) = self.inner.cause {
            f.write_str(&format!(": {}", cause))?
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

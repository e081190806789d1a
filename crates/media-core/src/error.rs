use thiserror::Error;

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("shm_open({name:?}) failed: {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ftruncate on {name:?} failed: {source}")]
    Truncate {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mmap of {name:?} failed: {source}")]
    Mmap {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shared region {name:?} has wrong size ({actual} bytes, expected {expected})")]
    SizeMismatch {
        name: String,
        actual: u64,
        expected: u64,
    },
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("found no file with that name")]
    NotFound,
    #[error("a file with that name already exists")]
    AlreadyExists,
    #[error("not enough free sectors on disk")]
    InsufficientSpace,
    #[error("file exceeds the double indirect capacity")]
    FileTooLarge,
    #[error("directory table is full")]
    DirectoryFull,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("not a directory")]
    NotADirectory,
    #[error("file is already open in another process")]
    AlreadyOpenElsewhere,
    #[error("file is open")]
    Busy,
    #[error("descriptor {0} does not refer to an open file")]
    InvalidDescriptor(usize),
    #[error("open file table is full")]
    OpenTableFull,
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("corrupt file header at sector {0}")]
    Corrupt(usize),
    #[error("disk access failed")]
    Io(#[from] std::io::Error),
}

//! Error types for the VFS layer.

use serde::{Deserialize, Serialize};

/// Errors from VFS operations.
///
/// All of these are non-fatal from the VM's point of view: the syscall
/// gateway maps them to a -1 result on the calling process's stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VfsError {
    /// Path not found
    NotFound,
    /// A node with that name already exists
    AlreadyExists,
    /// Descriptor is not open
    BadDescriptor,
    /// The node table is at capacity
    TooManyFiles,
    /// The descriptor table is at capacity
    TooManyHandles,
    /// A write would grow the file past the size cap
    FileTooLarge,
    /// The name exceeds the name-length cap
    NameTooLong,
    /// The operation needs a file but found a directory
    NotAFile,
    /// The operation needs a directory but found a file
    NotADirectory,
    /// The descriptor was opened without write access
    NotWritable,
    /// The descriptor was opened without read access
    NotReadable,
    /// A seek resolved to a negative offset
    BadOffset,
}

impl core::fmt::Display for VfsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            VfsError::NotFound => "path not found",
            VfsError::AlreadyExists => "already exists",
            VfsError::BadDescriptor => "bad descriptor",
            VfsError::TooManyFiles => "too many files",
            VfsError::TooManyHandles => "too many open descriptors",
            VfsError::FileTooLarge => "file too large",
            VfsError::NameTooLong => "name too long",
            VfsError::NotAFile => "not a file",
            VfsError::NotADirectory => "not a directory",
            VfsError::NotWritable => "descriptor not writable",
            VfsError::NotReadable => "descriptor not readable",
            VfsError::BadOffset => "offset resolves before start of file",
        };
        write!(f, "{}", msg)
    }
}

//! The user-program interface: one entry point that runs a file system call on
//! behalf of a process and reports the outcome as an integer.

use crate::fs::FileSystem;
use crate::io::SectorStorage;
use crate::process::{Fd, Process};

/// A file system call and its arguments.
#[derive(Debug)]
pub enum Syscall<'a> {
    /// Returns the new descriptor.
    Open {
        name: &'a str,
        create: bool,
        size: usize,
    },
    /// Returns the number of bytes read into `buf`.
    Read { fd: Fd, buf: &'a mut [u8] },
    /// Returns the number of bytes written.
    Write { fd: Fd, buf: &'a [u8] },
    Close { fd: Fd },
    Lseek { fd: Fd, offset: usize },
    Mkdir { name: &'a str },
    Cd { name: &'a str },
    Rm { name: &'a str },
    /// Logs the names in the current directory.
    Ls,
    /// Logs everything the file system knows.
    Dump,
}

/// Runs `call` for `process`. Failures are logged and come back as -1; calls
/// without a result return 0.
pub fn dispatch<T: SectorStorage>(
    fs: &mut FileSystem<T>,
    process: &mut Process,
    call: Syscall<'_>,
) -> isize {
    let result = match call {
        Syscall::Open { name, create, size } => fs
            .open_syscall(process, name, create, size)
            .map(|fd| fd as isize),
        Syscall::Read { fd, buf } => fs.read_syscall(process, fd, buf).map(|n| n as isize),
        Syscall::Write { fd, buf } => fs.write_syscall(process, fd, buf).map(|n| n as isize),
        Syscall::Close { fd } => fs.close_syscall(process, fd).map(|_| 0),
        Syscall::Lseek { fd, offset } => fs.lseek_syscall(process, fd, offset).map(|_| 0),
        Syscall::Mkdir { name } => fs.make_directory_syscall(name).map(|_| 0),
        Syscall::Cd { name } => fs.change_directory_syscall(name).map(|_| 0),
        Syscall::Rm { name } => fs.remove_syscall(name).map(|_| 0),
        Syscall::Ls => fs.list().map(|names| {
            info!("{}", names.join(" "));
            0
        }),
        Syscall::Dump => fs.print().map(|report| {
            info!("{}", report);
            0
        }),
    };
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!("file system call from process {} failed: {}", process.pid(), err);
            -1
        }
    }
}

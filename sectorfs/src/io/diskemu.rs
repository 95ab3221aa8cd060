use crate::header::{MAX_SECTOR_SIZE, MIN_SECTOR_SIZE};
use crate::io::{SectorNumber, SectorStorage};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};

/// Sector size of the simulated disk unless configured otherwise.
pub const SECTOR_SIZE: usize = 128;
/// Number of sectors on the simulated disk unless configured otherwise.
pub const NUM_SECTORS: usize = 1024;

/// Emulates a sectored disk in userspace using a host file as backing storage.
/// This is only meant to be used for file system development and testing.
pub struct DiskEmulator {
    /// The file must be a fixed-size file some exact multiple of the sector size.
    fd: File,
    sector_size: usize,
    /// The total number of sectors available in the file store.
    sector_count: usize,
}

impl DiskEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, sector: SectorNumber) -> std::io::Result<()> {
        if sector >= self.sector_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector out of range",
            ));
        }
        Ok(())
    }
}

impl SectorStorage for DiskEmulator {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn num_sectors(&self) -> usize {
        self.sector_count
    }

    fn read_sector(&mut self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(sector)?;
        if buf.len() < self.sector_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read sector",
            ));
        }
        self.fd
            .seek(SeekFrom::Start((sector * self.sector_size) as u64))?;
        // Limit the read to just the sector specified.
        self.fd.read_exact(&mut buf[..self.sector_size])?;
        Ok(())
    }

    /// This method truncates writes that exceed the sector size.
    fn write_sector(&mut self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(sector)?;
        self.fd
            .seek(SeekFrom::Start((sector * self.sector_size) as u64))?;

        let max = self.sector_size.min(buf.len());
        self.fd.write_all(&buf[..max])?;
        Ok(())
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct DiskEmulatorBuilder {
    fd: File,
    sector_size: usize,
    sector_count: usize,
    clear: bool,
}

impl From<File> for DiskEmulatorBuilder {
    fn from(fd: File) -> Self {
        DiskEmulatorBuilder {
            fd,
            sector_size: SECTOR_SIZE,
            sector_count: NUM_SECTORS,
            clear: true,
        }
    }
}

impl DiskEmulatorBuilder {
    /// Sets the size in bytes of each sector.
    pub fn with_sector_size(mut self, bytes: usize) -> Self {
        self.sector_size = bytes;
        self
    }

    /// Sets the number of sectors on the device.
    pub fn with_sectors(mut self, sectors: usize) -> Self {
        self.sector_count = sectors;
        self
    }

    /// Whether to zero the whole medium when building. Defaults to true; turn it
    /// off to reopen a disk that already holds a file system.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless told
    /// otherwise, does destructive things to prepare the file for use.
    pub fn build(mut self) -> std::io::Result<DiskEmulator> {
        if self.sector_size < MIN_SECTOR_SIZE
            || self.sector_size > MAX_SECTOR_SIZE
            || self.sector_size % 4 != 0
        {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector size must be a multiple of 4 between 16 and 4096 bytes",
            ));
        }
        // Sector numbers are stored on disk as u32.
        if self.sector_count == 0 || self.sector_count > u32::MAX as usize {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector count must fit in 32 bits",
            ));
        }
        if self.clear {
            self.zero_medium()?;
        } else {
            let expected = (self.sector_count * self.sector_size) as u64;
            if self.fd.metadata()?.len() < expected {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "backing file is smaller than the configured disk",
                ));
            }
        }
        Ok(DiskEmulator {
            fd: self.fd,
            sector_size: self.sector_size,
            sector_count: self.sector_count,
        })
    }

    fn zero_medium(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk", buffering each write to prevent excessive syscalls.
        let zeroes = vec![0x00; self.sector_size];
        for _ in 0..self.sector_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()?;
        Ok(())
    }
}

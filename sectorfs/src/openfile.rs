use crate::error::FsError;
use crate::header::FileHeader;
use crate::io::{SectorNumber, SectorStorage};

/// A handle on an open file: the sector of its header and a seek position.
///
/// The header is fetched from disk for every access, so a handle never holds a
/// stale view of the file. Files never grow: reads stop at the end of the file
/// and writes past it are cut short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    sector: SectorNumber,
    position: usize,
}

impl OpenFile {
    pub fn new(sector: SectorNumber) -> Self {
        Self {
            sector,
            position: 0,
        }
    }

    /// Sector holding this file's header.
    pub fn sector(&self) -> SectorNumber {
        self.sector
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn length<T: SectorStorage>(&self, dev: &mut T) -> Result<usize, FsError> {
        Ok(FileHeader::fetch_from(dev, self.sector)?.file_length())
    }

    /// Reads from the current position and advances it by the bytes read.
    pub fn read<T: SectorStorage>(&mut self, dev: &mut T, buf: &mut [u8]) -> Result<usize, FsError> {
        let read = self.read_at(dev, buf, self.position)?;
        self.position += read;
        Ok(read)
    }

    /// Writes at the current position and advances it by the bytes written.
    pub fn write<T: SectorStorage>(&mut self, dev: &mut T, buf: &[u8]) -> Result<usize, FsError> {
        let written = self.write_at(dev, buf, self.position)?;
        self.position += written;
        Ok(written)
    }

    pub fn read_at<T: SectorStorage>(
        &self,
        dev: &mut T,
        buf: &mut [u8],
        position: usize,
    ) -> Result<usize, FsError> {
        let header = FileHeader::fetch_from(dev, self.sector)?;
        let length = header.file_length();
        if buf.is_empty() || position >= length {
            return Ok(0);
        }
        let count = buf.len().min(length - position);
        let sector_size = dev.sector_size();
        let mut sector_buf = vec![0; sector_size];

        let mut done = 0;
        for index in position / sector_size..=(position + count - 1) / sector_size {
            let base = index * sector_size;
            let start = (position + done) - base;
            let end = (position + count - base).min(sector_size);
            let sector = header.byte_to_sector(dev, base)?;
            dev.read_sector(sector, &mut sector_buf)?;
            buf[done..done + end - start].copy_from_slice(&sector_buf[start..end]);
            done += end - start;
        }
        debug!("read {} bytes at {} from file {}", count, position, self.sector);
        Ok(count)
    }

    pub fn write_at<T: SectorStorage>(
        &self,
        dev: &mut T,
        buf: &[u8],
        position: usize,
    ) -> Result<usize, FsError> {
        let header = FileHeader::fetch_from(dev, self.sector)?;
        let length = header.file_length();
        if buf.is_empty() || position >= length {
            return Ok(0);
        }
        let count = buf.len().min(length - position);
        let sector_size = dev.sector_size();
        let mut sector_buf = vec![0; sector_size];

        let mut done = 0;
        for index in position / sector_size..=(position + count - 1) / sector_size {
            let base = index * sector_size;
            let start = (position + done) - base;
            let end = (position + count - base).min(sector_size);
            let sector = header.byte_to_sector(dev, base)?;
            // Partially covered sectors keep the bytes outside the write.
            if start != 0 || end != sector_size {
                dev.read_sector(sector, &mut sector_buf)?;
            }
            sector_buf[start..end].copy_from_slice(&buf[done..done + end - start]);
            dev.write_sector(sector, &sector_buf)?;
            done += end - start;
        }
        debug!("wrote {} bytes at {} to file {}", count, position, self.sector);
        Ok(count)
    }
}

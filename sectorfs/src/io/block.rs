/// The sector number to access ranging from 0 (the first sector) to n - 1 (the last
/// sector) where n is number of sectors available.
pub type SectorNumber = usize;

/// A raw device addressed in fixed-size sectors. Sector size and count are fixed
/// when the device is built and never change afterwards.
pub trait SectorStorage {
    /// Size in bytes of every sector on the device.
    fn sector_size(&self) -> usize;
    /// Total number of sectors on the device.
    fn num_sectors(&self) -> usize;
    /// Reads disk sector number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a sector out of range, or into a buffer smaller than a
    /// sector, will return an error.
    fn read_sector(&mut self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified sector number. Buffers longer than
    /// a sector are truncated to the sector size.
    ///
    /// # Errors
    ///
    /// Attempting to write a sector out of range will return an error.
    fn write_sector(&mut self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}

//! Raw device nodes (and plain files, for tests) as [`BlockDevice`]s.
//!
//! Discards use `BLKDISCARD` on block devices and punch holes in regular
//! files. Only a filesystem without hole punching falls back to overwriting
//! the range with zeroes, and it warns when it does.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::path::{Path, PathBuf};

use crate::error::{io_err, StoreError};
use crate::store::{BlockDevice, DeviceOpener};

/// `_IO(0x12, 119)` from `linux/fs.h`.
#[cfg(target_os = "linux")]
const BLKDISCARD: libc::c_ulong = 0x1277;

const ZERO_CHUNK: usize = 1 << 20;

/// Opens device nodes with `O_WRONLY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDeviceOpener;

impl DeviceOpener for FileDeviceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn BlockDevice>, StoreError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        let is_block = file
            .metadata()
            .map_err(|e| io_err(path, e))?
            .file_type()
            .is_block_device();
        Ok(Box::new(FileDevice {
            path: path.to_path_buf(),
            file,
            is_block,
        }))
    }
}

/// An open device node or file.
pub struct FileDevice {
    path: PathBuf,
    file: File,
    is_block: bool,
}

impl FileDevice {
    #[cfg(target_os = "linux")]
    fn try_discard(&self, offset: u64, length: u64) -> std::io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let fd = self.file.as_raw_fd();
        let rc = if self.is_block {
            let range: [u64; 2] = [offset, length];
            // SAFETY: BLKDISCARD reads two u64 values from the pointer.
            unsafe { libc::ioctl(fd, BLKDISCARD as _, range.as_ptr()) }
        } else {
            let (off, len) = match (i64::try_from(offset), i64::try_from(length)) {
                (Ok(off), Ok(len)) => (off, len),
                _ => return Err(std::io::Error::from_raw_os_error(libc::EINVAL)),
            };
            // SAFETY: plain syscall on an owned descriptor.
            unsafe {
                libc::fallocate(
                    fd,
                    libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                    off,
                    len,
                )
            }
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn try_discard(&self, _offset: u64, _length: u64) -> std::io::Result<()> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
    }

    fn write_zeroes(&self, offset: u64, length: u64) -> Result<(), StoreError> {
        let zeroes = vec![0u8; ZERO_CHUNK.min(length as usize)];
        let mut done = 0u64;
        while done < length {
            let n = (length - done).min(zeroes.len() as u64) as usize;
            self.file
                .write_all_at(&zeroes[..n], offset + done)
                .map_err(|e| io_err(&self.path, e))?;
            done += n as u64;
        }
        Ok(())
    }
}

fn punch_unsupported(err: &std::io::Error) -> bool {
    #[cfg(target_os = "linux")]
    if err.raw_os_error() == Some(libc::EOPNOTSUPP) {
        return true;
    }
    err.kind() == std::io::ErrorKind::Unsupported
}

impl BlockDevice for FileDevice {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StoreError> {
        self.file
            .write_all_at(data, offset)
            .map_err(|e| io_err(&self.path, e))
    }

    fn discard(&mut self, offset: u64, length: u64) -> Result<(), StoreError> {
        match self.try_discard(offset, length) {
            Ok(()) => Ok(()),
            Err(err) if !self.is_block && punch_unsupported(&err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset,
                    length,
                    error = %err,
                    "hole punch unsupported, writing zeroes"
                );
                self.write_zeroes(offset, length)
            }
            Err(err) => Err(io_err(&self.path, err)),
        }
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        self.file.sync_all().map_err(|e| io_err(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writes_and_discards_in_a_file() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0xAB; 64 * 1024]).expect("fill");
        tmp.flush().expect("flush");

        let mut dev = FileDeviceOpener.open(tmp.path()).expect("open");
        dev.write_at(0, b"hello").expect("write");
        dev.discard(8192, 8192).expect("discard");
        dev.close().expect("close");

        let bytes = std::fs::read(tmp.path()).expect("read");
        assert_eq!(bytes.len(), 64 * 1024);
        assert_eq!(&bytes[..5], b"hello");
        assert_eq!(bytes[5], 0xAB);
        assert!(bytes[8192..16384].iter().all(|b| *b == 0));
        assert_eq!(bytes[16384], 0xAB);
    }

    #[test]
    fn failed_discard_is_reported_not_zeroed() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0xAB; 8192]).expect("fill");
        tmp.flush().expect("flush");

        let mut dev = FileDeviceOpener.open(tmp.path()).expect("open");
        let err = dev.discard(u64::MAX - 1, 2).err().expect("error");
        assert!(matches!(err, StoreError::Io { .. }), "{err}");
        dev.close().expect("close");

        let bytes = std::fs::read(tmp.path()).expect("read");
        assert_eq!(bytes.len(), 8192);
        assert!(bytes.iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn missing_device_is_an_io_error() {
        let err = FileDeviceOpener
            .open(Path::new("/dev/zvol/does/not/exist"))
            .err()
            .expect("error");
        assert!(matches!(err, StoreError::Io { .. }));
    }
}

//! Read + Seek over the ordered concatenation of archive volumes

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Presents a list of volume files as one continuous byte stream
///
/// Only one volume file is open at a time. Seeking re-opens the volume that
/// holds the target offset.
#[derive(Debug)]
pub struct SegmentedReader {
    volumes: Vec<Volume>,
    total_len: u64,
    position: u64,
    current: Option<(usize, File)>,
}

#[derive(Debug)]
struct Volume {
    path: PathBuf,
    start: u64,
    len: u64,
}

impl SegmentedReader {
    /// Open a reader over `paths`, in order
    pub fn open(paths: &[PathBuf]) -> io::Result<Self> {
        let mut volumes = Vec::with_capacity(paths.len());
        let mut start = 0u64;
        for path in paths {
            let len = std::fs::metadata(path)?.len();
            volumes.push(Volume {
                path: path.clone(),
                start,
                len,
            });
            start += len;
        }

        Ok(Self {
            volumes,
            total_len: start,
            position: 0,
            current: None,
        })
    }

    /// Open a reader over a single file
    pub fn single(path: &Path) -> io::Result<Self> {
        Self::open(&[path.to_path_buf()])
    }

    /// Combined length of every volume
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Offset of volume `index` within the combined stream
    pub fn volume_start(&self, index: usize) -> Option<u64> {
        self.volumes.get(index).map(|v| v.start)
    }

    /// Length of volume `index`
    pub fn volume_len(&self, index: usize) -> Option<u64> {
        self.volumes.get(index).map(|v| v.len)
    }

    /// Number of volumes
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    fn volume_at(&self, offset: u64) -> Option<usize> {
        self.volumes
            .iter()
            .position(|v| offset >= v.start && offset < v.start + v.len)
    }
}

impl Read for SegmentedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.total_len {
            return Ok(0);
        }

        let Some(index) = self.volume_at(self.position) else {
            return Ok(0);
        };
        let volume = &self.volumes[index];
        let offset_in_volume = self.position - volume.start;
        let remaining_in_volume = volume.len - offset_in_volume;

        if !matches!(&self.current, Some((open_index, _)) if *open_index == index) {
            let mut file = File::open(&volume.path)?;
            file.seek(SeekFrom::Start(offset_in_volume))?;
            self.current = Some((index, file));
        }
        let Some((_, file)) = self.current.as_mut() else {
            return Ok(0);
        };

        let want = buf.len().min(remaining_in_volume as usize);
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("volume {} shrank while reading", volume.path.display()),
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SegmentedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.total_len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;

        if target != self.position {
            self.current = None;
            self.position = target;
        }
        Ok(self.position)
    }
}

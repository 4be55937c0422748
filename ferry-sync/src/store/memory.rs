//! In-memory source and destination stores.
//!
//! Both sides keep volume contents as sparse page maps, so a 10 GiB volume
//! with a few written pages costs a few pages. Every read, write, discard
//! and snapshot operation is appended to a shared [`Journal`] that tests
//! can inspect.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_core::{ClusterConfig, Side, Snapshot};
use parking_lot::Mutex;

use crate::error::{io_err, StoreError};
use crate::store::{
    BlockDevice, DestinationStore, DestinationVolume, DeviceOpener, Extent, SourceConnector,
    SourcePool, SourceVolume,
};

/// Page size of [`SparseImage`].
pub const PAGE: u64 = 4096;

const DEVICE_PREFIX: &str = "/dev/zvol/";

// ---------------------------------------------------------------------------
// Sparse image
// ---------------------------------------------------------------------------

/// Volume contents as a map of non-empty pages. Absent pages read as zeroes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseImage {
    pages: BTreeMap<u64, Vec<u8>>,
}

impl SparseImage {
    pub fn write(&mut self, offset: u64, data: &[u8]) {
        let mut pos = 0usize;
        while pos < data.len() {
            let abs = offset + pos as u64;
            let (index, within) = (abs / PAGE, (abs % PAGE) as usize);
            let n = (PAGE as usize - within).min(data.len() - pos);
            let page = self
                .pages
                .entry(index)
                .or_insert_with(|| vec![0u8; PAGE as usize]);
            page[within..within + n].copy_from_slice(&data[pos..pos + n]);
            pos += n;
        }
    }

    /// Zero a range; fully covered pages are released.
    pub fn discard(&mut self, offset: u64, length: u64) {
        let end = offset + length;
        let mut abs = offset;
        while abs < end {
            let (index, within) = (abs / PAGE, abs % PAGE);
            let n = (PAGE - within).min(end - abs);
            if within == 0 && n == PAGE {
                self.pages.remove(&index);
            } else if let Some(page) = self.pages.get_mut(&index) {
                page[within as usize..(within + n) as usize].fill(0);
            }
            abs += n;
        }
    }

    pub fn read(&self, offset: u64, length: u64) -> Vec<u8> {
        let mut out = vec![0u8; length as usize];
        let end = offset + length;
        let mut abs = offset;
        while abs < end {
            let (index, within) = (abs / PAGE, abs % PAGE);
            let n = (PAGE - within).min(end - abs);
            if let Some(page) = self.pages.get(&index) {
                let dst = (abs - offset) as usize;
                out[dst..dst + n as usize]
                    .copy_from_slice(&page[within as usize..(within + n) as usize]);
            }
            abs += n;
        }
        out
    }

    /// Bytes held in allocated pages.
    pub fn allocated_bytes(&self) -> u64 {
        self.pages.len() as u64 * PAGE
    }

    /// Extents that turn `base` (or an empty image) into `self`, coalesced.
    pub fn diff(&self, base: Option<&SparseImage>) -> Vec<Extent> {
        let empty = SparseImage::default();
        let base = base.unwrap_or(&empty);

        let mut changed: BTreeMap<u64, bool> = BTreeMap::new();
        for (index, page) in &self.pages {
            if base.pages.get(index) != Some(page) {
                changed.insert(*index, true);
            }
        }
        for index in base.pages.keys() {
            if !self.pages.contains_key(index) {
                changed.insert(*index, false);
            }
        }

        let mut extents: Vec<Extent> = Vec::new();
        for (index, has_data) in changed {
            let offset = index * PAGE;
            match extents.last_mut() {
                Some(last) if last.has_data == has_data && last.offset + last.length == offset => {
                    last.length += PAGE;
                }
                _ => extents.push(Extent {
                    offset,
                    length: PAGE,
                    has_data,
                }),
            }
        }
        extents
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// One recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Read { volume: String, offset: u64, length: u64 },
    Write { device: PathBuf, offset: u64, length: u64 },
    Discard { device: PathBuf, offset: u64, length: u64 },
    Close { device: PathBuf },
    Rollback { volume: String, snapshot: String },
    CreateSnapshot { side: Side, volume: String, name: String },
    DeleteSnapshot { side: Side, volume: String, name: String },
}

/// Shared, append-only call log.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn record(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug, Clone)]
struct StoredSnapshot {
    name: String,
    timestamp: DateTime<Utc>,
    image: SparseImage,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SourceVolumeState {
    size: u64,
    head: SparseImage,
    snapshots: Vec<StoredSnapshot>,
}

#[derive(Debug, Default)]
struct SourceState {
    pools: BTreeMap<String, BTreeMap<String, SourceVolumeState>>,
    unreachable: bool,
}

/// An in-memory source cluster. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
    journal: Journal,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a journal with another store.
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Arc::default(),
            journal,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn add_pool(&self, pool: &str) {
        self.state.lock().pools.entry(pool.to_string()).or_default();
    }

    pub fn add_volume(&self, pool: &str, name: &str, size: u64) {
        self.state
            .lock()
            .pools
            .entry(pool.to_string())
            .or_default()
            .insert(
                name.to_string(),
                SourceVolumeState {
                    size,
                    ..Default::default()
                },
            );
    }

    pub fn remove_volume(&self, pool: &str, name: &str) {
        if let Some(p) = self.state.lock().pools.get_mut(pool) {
            p.remove(name);
        }
    }

    /// Write to the live (unsnapshotted) image.
    pub fn write(&self, pool: &str, name: &str, offset: u64, data: &[u8]) {
        self.with_volume(pool, name, |v| v.head.write(offset, data));
    }

    /// Trim a range of the live image.
    pub fn discard(&self, pool: &str, name: &str, offset: u64, length: u64) {
        self.with_volume(pool, name, |v| v.head.discard(offset, length));
    }

    pub fn resize(&self, pool: &str, name: &str, size: u64) {
        self.with_volume(pool, name, |v| v.size = size);
    }

    /// Snapshot the live image with an explicit timestamp.
    pub fn add_snapshot(&self, pool: &str, name: &str, snapshot: &str, at: DateTime<Utc>) {
        self.with_volume(pool, name, |v| {
            let image = v.head.clone();
            v.snapshots.push(StoredSnapshot {
                name: snapshot.to_string(),
                timestamp: at,
                image,
            });
        });
    }

    pub fn snapshot_names(&self, pool: &str, name: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .pools
            .get(pool)
            .and_then(|p| p.get(name))
            .map(|v| v.snapshots.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Make `connect` fail as if the cluster were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    fn with_volume(&self, pool: &str, name: &str, f: impl FnOnce(&mut SourceVolumeState)) {
        if let Some(v) = self
            .state
            .lock()
            .pools
            .get_mut(pool)
            .and_then(|p| p.get_mut(name))
        {
            f(v);
        }
    }
}

impl SourceConnector for MemorySource {
    fn connect(
        &self,
        cluster: &ClusterConfig,
        pool: &str,
    ) -> Result<Box<dyn SourcePool>, StoreError> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(StoreError::NotFound(format!(
                "cluster {}",
                cluster.cluster_name
            )));
        }
        if !state.pools.contains_key(pool) {
            return Err(StoreError::NotFound(format!("pool {pool}")));
        }
        Ok(Box::new(MemoryPool {
            state: Arc::clone(&self.state),
            journal: self.journal.clone(),
            pool: pool.to_string(),
        }))
    }
}

struct MemoryPool {
    state: Arc<Mutex<SourceState>>,
    journal: Journal,
    pool: String,
}

impl SourcePool for MemoryPool {
    fn volume_names(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        let pool = state
            .pools
            .get(&self.pool)
            .ok_or_else(|| StoreError::NotFound(format!("pool {}", self.pool)))?;
        Ok(pool.keys().cloned().collect())
    }

    fn open_volume(&self, name: &str) -> Result<Box<dyn SourceVolume>, StoreError> {
        let state = self.state.lock();
        let exists = state
            .pools
            .get(&self.pool)
            .is_some_and(|p| p.contains_key(name));
        if !exists {
            return Err(StoreError::NotFound(format!("volume {}/{name}", self.pool)));
        }
        Ok(Box::new(MemoryVolume {
            state: Arc::clone(&self.state),
            journal: self.journal.clone(),
            pool: self.pool.clone(),
            name: name.to_string(),
            active: None,
        }))
    }
}

struct MemoryVolume {
    state: Arc<Mutex<SourceState>>,
    journal: Journal,
    pool: String,
    name: String,
    active: Option<String>,
}

impl MemoryVolume {
    fn with<T>(
        &self,
        f: impl FnOnce(&mut SourceVolumeState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock();
        let vol = state
            .pools
            .get_mut(&self.pool)
            .and_then(|p| p.get_mut(&self.name))
            .ok_or_else(|| StoreError::NotFound(format!("volume {}/{}", self.pool, self.name)))?;
        f(vol)
    }

    fn active_name(&self) -> Result<&str, StoreError> {
        self.active
            .as_deref()
            .ok_or_else(|| StoreError::NotFound(format!("active snapshot of {}", self.name)))
    }
}

fn find_snapshot<'a>(
    snaps: &'a [StoredSnapshot],
    name: &str,
) -> Result<&'a StoredSnapshot, StoreError> {
    snaps
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| StoreError::NotFound(format!("snapshot {name}")))
}

impl SourceVolume for MemoryVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Result<u64, StoreError> {
        self.with(|v| Ok(v.size))
    }

    fn snapshot_names(&self) -> Result<Vec<String>, StoreError> {
        self.with(|v| Ok(v.snapshots.iter().map(|s| s.name.clone()).collect()))
    }

    fn snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        self.with(|v| {
            Ok(v.snapshots
                .iter()
                .map(|s| Snapshot::new(s.name.clone(), s.timestamp, Side::Source))
                .collect())
        })
    }

    fn create_and_activate_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        self.with(|v| {
            if v.snapshots.iter().any(|s| s.name == name) {
                return Err(StoreError::AlreadyExists(format!("snapshot {name}")));
            }
            let image = v.head.clone();
            v.snapshots.push(StoredSnapshot {
                name: name.to_string(),
                timestamp: Utc::now(),
                image,
            });
            Ok(())
        })?;
        self.journal.record(Call::CreateSnapshot {
            side: Side::Source,
            volume: self.name.clone(),
            name: name.to_string(),
        });
        self.active = Some(name.to_string());
        Ok(())
    }

    fn diff_extents(
        &self,
        from: Option<&str>,
        visit: &mut dyn FnMut(Extent) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let active = self.active_name()?;
        let extents = self.with(|v| {
            let target = find_snapshot(&v.snapshots, active)?;
            let base = match from {
                Some(from) => Some(&find_snapshot(&v.snapshots, from)?.image),
                None => None,
            };
            Ok(target.image.diff(base))
        })?;
        for extent in extents {
            if visit(extent).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>, StoreError> {
        let active = self.active_name()?;
        let data = self.with(|v| {
            if offset.saturating_add(length) > v.size {
                return Err(StoreError::OutOfRange {
                    volume: self.name.clone(),
                    offset,
                    length,
                    size: v.size,
                });
            }
            Ok(find_snapshot(&v.snapshots, active)?.image.read(offset, length))
        })?;
        self.journal.record(Call::Read {
            volume: self.name.clone(),
            offset,
            length,
        });
        Ok(data)
    }

    fn delete_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        self.with(|v| {
            let before = v.snapshots.len();
            v.snapshots.retain(|s| s.name != name);
            if v.snapshots.len() == before {
                return Err(StoreError::NotFound(format!("snapshot {name}")));
            }
            Ok(())
        })?;
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        self.journal.record(Call::DeleteSnapshot {
            side: Side::Source,
            volume: self.name.clone(),
            name: name.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Destination
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DestVolumeState {
    size: u64,
    image: SparseImage,
    snapshots: Vec<StoredSnapshot>,
    writer_open: bool,
}

#[derive(Debug, Default)]
struct DestState {
    volumes: BTreeMap<String, DestVolumeState>,
    failing_opens: u32,
    failing_close: bool,
}

/// An in-memory destination that also acts as its own [`DeviceOpener`].
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<DestState>>,
    journal: Journal,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Arc::default(),
            journal,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.state.lock().volumes.keys().cloned().collect()
    }

    pub fn volume_size(&self, path: &str) -> Option<u64> {
        self.state.lock().volumes.get(path).map(|v| v.size)
    }

    pub fn image(&self, path: &str) -> Option<SparseImage> {
        self.state.lock().volumes.get(path).map(|v| v.image.clone())
    }

    pub fn snapshot_names(&self, path: &str) -> Vec<String> {
        self.state
            .lock()
            .volumes
            .get(path)
            .map(|v| v.snapshots.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Create a volume directly, bypassing provisioning.
    pub fn add_volume(&self, path: &str, size: u64) {
        self.state.lock().volumes.insert(
            path.to_string(),
            DestVolumeState {
                size,
                ..Default::default()
            },
        );
    }

    /// Snapshot the current image with an explicit timestamp.
    pub fn add_snapshot(&self, path: &str, snapshot: &str, at: DateTime<Utc>) {
        if let Some(v) = self.state.lock().volumes.get_mut(path) {
            let image = v.image.clone();
            v.snapshots.push(StoredSnapshot {
                name: snapshot.to_string(),
                timestamp: at,
                image,
            });
        }
    }

    /// Write straight into a volume, e.g. to simulate divergent state.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) {
        if let Some(v) = self.state.lock().volumes.get_mut(path) {
            v.image.write(offset, data);
        }
    }

    /// The next `n` device opens fail with "not found".
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().failing_opens = n;
    }

    /// The next device close fails as if the flush hit an I/O error.
    pub fn fail_next_close(&self) {
        self.state.lock().failing_close = true;
    }
}

impl DestinationStore for MemoryDestination {
    fn open_or_create_volume(
        &self,
        base: &str,
        name: &str,
        min_size: u64,
    ) -> Result<Box<dyn DestinationVolume>, StoreError> {
        let path = format!("{base}/{name}");
        {
            let mut state = self.state.lock();
            let vol = state.volumes.entry(path.clone()).or_default();
            if vol.size < min_size {
                vol.size = min_size;
            }
        }
        Ok(Box::new(MemoryDestVolume {
            state: Arc::clone(&self.state),
            journal: self.journal.clone(),
            path,
        }))
    }
}

impl DeviceOpener for MemoryDestination {
    fn open(&self, path: &Path) -> Result<Box<dyn BlockDevice>, StoreError> {
        let mut state = self.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(io_err(path, std::io::ErrorKind::NotFound.into()));
        }
        let volume = path
            .to_str()
            .and_then(|p| p.strip_prefix(DEVICE_PREFIX))
            .ok_or_else(|| StoreError::NotFound(format!("device {}", path.display())))?
            .to_string();
        let vol = state
            .volumes
            .get_mut(&volume)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", path.display())))?;
        if vol.writer_open {
            return Err(StoreError::Busy(format!("device {}", path.display())));
        }
        vol.writer_open = true;
        Ok(Box::new(MemoryDevice {
            state: Arc::clone(&self.state),
            journal: self.journal.clone(),
            device: path.to_path_buf(),
            volume,
        }))
    }
}

struct MemoryDestVolume {
    state: Arc<Mutex<DestState>>,
    journal: Journal,
    path: String,
}

impl MemoryDestVolume {
    fn with<T>(
        &self,
        f: impl FnOnce(&mut DestVolumeState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock();
        let vol = state
            .volumes
            .get_mut(&self.path)
            .ok_or_else(|| StoreError::NotFound(format!("volume {}", self.path)))?;
        f(vol)
    }
}

impl DestinationVolume for MemoryDestVolume {
    fn name(&self) -> &str {
        &self.path
    }

    fn snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        self.with(|v| {
            Ok(v.snapshots
                .iter()
                .map(|s| Snapshot::new(s.name.clone(), s.timestamp, Side::Destination))
                .collect())
        })
    }

    fn rollback_to(&mut self, snapshot: &str) -> Result<(), StoreError> {
        self.with(|v| {
            let index = v
                .snapshots
                .iter()
                .position(|s| s.name == snapshot)
                .ok_or_else(|| StoreError::NotFound(format!("snapshot {snapshot}")))?;
            v.image = v.snapshots[index].image.clone();
            v.snapshots.truncate(index + 1);
            Ok(())
        })?;
        self.journal.record(Call::Rollback {
            volume: self.path.clone(),
            snapshot: snapshot.to_string(),
        });
        Ok(())
    }

    fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("{DEVICE_PREFIX}{}", self.path))
    }

    fn create_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        self.with(|v| {
            if v.writer_open {
                return Err(StoreError::Busy(format!("volume {}", self.path)));
            }
            if v.snapshots.iter().any(|s| s.name == name) {
                return Err(StoreError::AlreadyExists(format!("snapshot {name}")));
            }
            let image = v.image.clone();
            v.snapshots.push(StoredSnapshot {
                name: name.to_string(),
                timestamp: Utc::now(),
                image,
            });
            Ok(())
        })?;
        self.journal.record(Call::CreateSnapshot {
            side: Side::Destination,
            volume: self.path.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn delete_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        self.with(|v| {
            let before = v.snapshots.len();
            v.snapshots.retain(|s| s.name != name);
            if v.snapshots.len() == before {
                return Err(StoreError::NotFound(format!("snapshot {name}")));
            }
            Ok(())
        })?;
        self.journal.record(Call::DeleteSnapshot {
            side: Side::Destination,
            volume: self.path.clone(),
            name: name.to_string(),
        });
        Ok(())
    }
}

struct MemoryDevice {
    state: Arc<Mutex<DestState>>,
    journal: Journal,
    device: PathBuf,
    volume: String,
}

impl MemoryDevice {
    fn with(
        &self,
        offset: u64,
        length: u64,
        f: impl FnOnce(&mut SparseImage),
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let vol = state
            .volumes
            .get_mut(&self.volume)
            .ok_or_else(|| StoreError::NotFound(format!("volume {}", self.volume)))?;
        if offset.saturating_add(length) > vol.size {
            return Err(StoreError::OutOfRange {
                volume: self.volume.clone(),
                offset,
                length,
                size: vol.size,
            });
        }
        f(&mut vol.image);
        Ok(())
    }
}

impl BlockDevice for MemoryDevice {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StoreError> {
        let length = data.len() as u64;
        self.with(offset, length, |img| img.write(offset, data))?;
        self.journal.record(Call::Write {
            device: self.device.clone(),
            offset,
            length,
        });
        Ok(())
    }

    fn discard(&mut self, offset: u64, length: u64) -> Result<(), StoreError> {
        self.with(offset, length, |img| img.discard(offset, length))?;
        self.journal.record(Call::Discard {
            device: self.device.clone(),
            offset,
            length,
        });
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock();
            if std::mem::take(&mut state.failing_close) {
                return Err(io_err(&self.device, std::io::ErrorKind::Other.into()));
            }
            if let Some(v) = state.volumes.get_mut(&self.volume) {
                v.writer_open = false;
            }
        }
        self.journal.record(Call::Close {
            device: self.device.clone(),
        });
        Ok(())
    }
}

impl Drop for MemoryDevice {
    fn drop(&mut self) {
        if let Some(v) = self.state.lock().volumes.get_mut(&self.volume) {
            v.writer_open = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_image_reads_back_writes_and_zeroes() {
        let mut img = SparseImage::default();
        img.write(PAGE - 2, b"abcd");
        assert_eq!(img.read(PAGE - 2, 4), b"abcd".to_vec());
        assert_eq!(img.allocated_bytes(), 2 * PAGE);
        img.discard(PAGE, PAGE);
        assert_eq!(img.read(PAGE - 2, 4), b"ab\0\0".to_vec());
        assert_eq!(img.allocated_bytes(), PAGE);
    }

    #[test]
    fn diff_coalesces_pages_and_reports_holes() {
        let mut base = SparseImage::default();
        base.write(0, &[1u8; (3 * PAGE) as usize]);
        let mut next = base.clone();
        next.discard(PAGE, PAGE);
        next.write(5 * PAGE, &[2u8; (2 * PAGE) as usize]);

        assert_eq!(
            next.diff(Some(&base)),
            vec![Extent::hole(PAGE, PAGE), Extent::data(5 * PAGE, 2 * PAGE)]
        );
        assert_eq!(
            next.diff(None),
            vec![
                Extent::data(0, PAGE),
                Extent::data(2 * PAGE, PAGE),
                Extent::data(5 * PAGE, 2 * PAGE),
            ]
        );
    }

    #[test]
    fn device_open_is_exclusive() {
        let dest = MemoryDestination::new();
        let vol = dest.open_or_create_volume("tank", "v", PAGE).expect("volume");
        let first = dest.open(&vol.device_path()).expect("open");
        assert!(matches!(
            dest.open(&vol.device_path()),
            Err(StoreError::Busy(_))
        ));
        first.close().expect("close");
        assert!(dest.open(&vol.device_path()).is_ok());
    }

    #[test]
    fn rollback_drops_newer_snapshots() {
        let dest = MemoryDestination::new();
        let mut vol = dest.open_or_create_volume("tank", "v", 4 * PAGE).expect("volume");
        dest.write("tank/v", 0, b"one");
        vol.create_snapshot("a").expect("snap a");
        dest.write("tank/v", 0, b"two");
        vol.create_snapshot("b").expect("snap b");

        vol.rollback_to("a").expect("rollback");
        assert_eq!(dest.snapshot_names("tank/v"), vec!["a"]);
        let img = dest.image("tank/v").expect("image");
        assert_eq!(img.read(0, 3), b"one".to_vec());
    }
}

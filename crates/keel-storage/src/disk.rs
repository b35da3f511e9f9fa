//! Disk manager for page-level file I/O.

use keel_common::config::StorageConfig;
use keel_common::page::{PAGE_SIZE, PageId};
use keel_common::{KeelError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages named data files and page-level reads and writes to them.
///
/// Each file lives at `data_dir/<name>`, with page `n` stored at byte
/// offset `n * PAGE_SIZE`. Opening a file hands out a numeric file id used
/// for every page operation. The id stays bound to the name until the file
/// is destroyed, so pages cached under it remain addressable across
/// close/open cycles.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    state: Mutex<DiskState>,
}

struct DiskState {
    /// Open file handles keyed by file_id.
    files: HashMap<u32, FileHandle>,
    /// Name to file_id bindings, kept after close.
    ids: HashMap<String, u32>,
    next_file_id: u32,
}

/// Handle for an open data file.
struct FileHandle {
    file: File,
    name: String,
    /// Number of pages in the file.
    num_pages: u32,
    /// Number of outstanding `open_file` calls.
    open_count: u32,
}

impl DiskManager {
    /// Creates a new disk manager, creating the data directory if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            state: Mutex::new(DiskState {
                files: HashMap::new(),
                ids: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Creates a new, empty data file.
    pub fn create_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                if self.config.fsync_enabled {
                    file.sync_all()?;
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(KeelError::FileExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Opens an existing data file and returns its file id.
    ///
    /// Opening a file that is already open returns the same id and must be
    /// balanced by an extra `close_file`.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        let mut state = self.state.lock();

        if let Some(file_id) = state.ids.get(name).copied() {
            if let Some(handle) = state.files.get_mut(&file_id) {
                handle.open_count += 1;
                return Ok(file_id);
            }
        }

        let path = self.file_path(name);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeelError::FileNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let file_id = match state.ids.get(name).copied() {
            Some(file_id) => file_id,
            None => {
                let file_id = state.next_file_id;
                state.next_file_id += 1;
                state.ids.insert(name.to_string(), file_id);
                file_id
            }
        };

        state.files.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
                open_count: 1,
            },
        );

        Ok(file_id)
    }

    /// Closes one open reference to a file. The OS handle is synced and
    /// released when the last reference goes away.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut state = self.state.lock();
        let handle = state
            .files
            .get_mut(&file_id)
            .ok_or(KeelError::FileNotOpen { file_id })?;

        handle.open_count -= 1;
        if handle.open_count == 0 {
            if let Some(handle) = state.files.remove(&file_id) {
                handle.file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Removes a data file from disk.
    pub fn destroy_file(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(file_id) = state.ids.get(name) {
            if state.files.contains_key(file_id) {
                return Err(KeelError::FileOpen(name.to_string()));
            }
        }

        match std::fs::remove_file(self.file_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeelError::FileNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        state.ids.remove(name);
        Ok(())
    }

    /// Returns true if the named file is currently open.
    pub fn is_open(&self, name: &str) -> bool {
        let state = self.state.lock();
        state
            .ids
            .get(name)
            .is_some_and(|file_id| state.files.contains_key(file_id))
    }

    /// Returns the name an open file was opened under.
    pub fn file_name(&self, file_id: u32) -> Result<String> {
        let state = self.state.lock();
        let handle = state
            .files
            .get(&file_id)
            .ok_or(KeelError::FileNotOpen { file_id })?;
        Ok(handle.name.clone())
    }

    /// Returns the first page of a file, which holds the file's header.
    pub fn first_page(&self, file_id: u32) -> Result<u32> {
        if self.num_pages(file_id)? == 0 {
            return Err(KeelError::PageNotFound {
                page_id: PageId::new(file_id, 0).as_u64(),
            });
        }
        Ok(0)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut state = self.state.lock();
        let handle = state.files.get_mut(&page_id.file_id).ok_or(KeelError::FileNotOpen {
            file_id: page_id.file_id,
        })?;

        if page_id.page_num >= handle.num_pages {
            return Err(KeelError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = Box::new([0u8; PAGE_SIZE]);
        handle.file.read_exact(&mut buffer[..])?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut state = self.state.lock();
        let handle = state.files.get_mut(&page_id.file_id).ok_or(KeelError::FileNotOpen {
            file_id: page_id.file_id,
        })?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_data()?;
        }

        // Update page count if we extended the file
        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Appends a zeroed page to a file and returns its page number.
    pub fn allocate_page(&self, file_id: u32) -> Result<u32> {
        let mut state = self.state.lock();
        let handle = state
            .files
            .get_mut(&file_id)
            .ok_or(KeelError::FileNotOpen { file_id })?;

        let page_num = handle.num_pages;

        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_data()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_num)
    }

    /// Returns the number of pages in an open file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let state = self.state.lock();
        let handle = state
            .files
            .get(&file_id)
            .ok_or(KeelError::FileNotOpen { file_id })?;

        Ok(handle.num_pages)
    }

    /// Syncs every open file to stable storage.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        for handle in state.files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

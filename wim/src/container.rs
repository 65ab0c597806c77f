//! The container handle: `open`/`create`, the image-level
//! getters, `add_image`/`delete_image`, `extract_image`/`iterate_dir_tree`,
//! and the write entry points (`write`/`write_to_fd`/`overwrite`), which
//! delegate to [`crate::write`].

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sync_file::RandomAccessFile;
use tracing::{debug, trace_span};
use uuid::Uuid;

use wim_format::blob::{BlobHashState, BlobTableEntry};
use wim_format::{BlobDescriptor, BlobLocation, BlobTable, CompressionType, OpenContainer, ResourceHeader, WimHeader, DEFAULT_COMPRESSION};

use crate::error::{Error, Result};
use crate::flags::{OpenFlags, WriteFlags};
use crate::lock::ExclusiveLock;
use crate::metadata::{Dentry, FileAttributes, ImageMetadata, SecurityDescriptorTable, StreamEntry, NO_SECURITY_ID};
use crate::progress::{ProgressCallback, ProgressMsg};
use crate::scanner::{CaptureConfig, ScannerSource};

/// The concrete file type this crate operates on.
pub type WimFile = RandomAccessFile<File>;

/// Identifies an image within a container, by 1-based index or by name.
#[derive(Clone, Debug)]
pub enum ImageSelector {
    /// 1-based image index.
    Index(u32),
    /// Image name, matched case-sensitively against `NAME`.
    Name(String),
    /// Every image in the container (used by `write`'s whole-container
    /// path).
    All,
}

/// One physical resource already on disk, as resolved from the blob
/// table on open.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ArenaEntry {
    pub header: ResourceHeader,
}

/// An open or freshly created WIM container.
pub struct Wim {
    pub(crate) file: Option<WimFile>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) lock_handle: Option<File>,
    pub(crate) header: WimHeader,
    pub(crate) blob_table: BlobTable,
    pub(crate) xml: wim_format::xml::WimXmlData,
    pub(crate) images: Vec<ImageMetadata>,
    pub(crate) arena: Vec<ArenaEntry>,
    pub(crate) open_flags: OpenFlags,
    pub(crate) dirty: bool,
}

impl Wim {
    /// Builds a fresh, empty, unbacked container.
    /// The handle has no file until the first [`Wim::write`] or
    /// [`Wim::write_to_fd`] call.
    pub fn create(compression: CompressionType) -> Self {
        Self {
            file: None,
            path: None,
            lock_handle: None,
            header: WimHeader::new_empty(compression),
            blob_table: BlobTable::new(),
            xml: wim_format::xml::WimXmlData::default(),
            images: Vec::new(),
            arena: Vec::new(),
            open_flags: OpenFlags::WRITE_ACCESS,
            dirty: true,
        }
    }

    /// Opens an existing container at `path`.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
        let _span = trace_span!("Wim::open").entered();
        flags.validate()?;

        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true).write(flags.contains(OpenFlags::WRITE_ACCESS));
        let std_file = options.open(path).map_err(Error::Io)?;
        let lock_handle = std_file.try_clone().map_err(Error::Io)?;
        let file = RandomAccessFile::from(std_file);

        let opened = OpenContainer::open(&file).map_err(Error::classify)?;

        if flags.contains(OpenFlags::CHECK_INTEGRITY) {
            opened.verify_integrity(&file).map_err(Error::classify)?;
        }

        if opened.header.total_parts != 1 && !flags.contains(OpenFlags::SPLIT_OK) {
            return Err(Error::SplitUnsupported.into());
        }

        let (arena, blob_table) = resolve_blob_table(&opened.blob_table_entries);

        let mut images = Vec::with_capacity(opened.xml.images.len());
        for entry in opened.blob_table_entries.iter().filter(|e| e.is_metadata()) {
            let header = entry.resource_header;
            let reader = wim_format::ResourceReader::open(&file, header, opened.header.compression_type(), opened.header.chunk_size)
                .map_err(Error::classify)?;
            let bytes = reader.read_all().map_err(Error::classify)?;
            images.push(ImageMetadata::parse(&bytes)?);
        }

        debug!(images = images.len(), "opened WIM container");

        Ok(Self {
            file: Some(file),
            path: Some(path.to_path_buf()),
            lock_handle: Some(lock_handle),
            header: opened.header,
            blob_table,
            xml: opened.xml,
            images,
            arena,
            open_flags: flags,
            dirty: false,
        })
    }

    /// Number of images currently in the container.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// 1-based index of the boot image, or 0 if none.
    pub fn boot_index(&self) -> u32 {
        self.header.boot_index
    }

    /// Sets the boot image index (0 clears it).
    pub fn set_boot_index(&mut self, index: u32) -> Result<()> {
        if index > self.image_count() {
            return Err(Error::InvalidImage.into());
        }
        self.header.boot_index = index;
        self.dirty = true;
        Ok(())
    }

    /// The container's GUID (shared by every part of a spanned set).
    pub fn guid(&self) -> Uuid {
        self.header.guid
    }

    /// The compression algorithm this container uses.
    pub fn compression_type(&self) -> CompressionType {
        self.header.compression_type()
    }

    fn resolve_index(&self, selector: &ImageSelector) -> Result<u32> {
        match selector {
            ImageSelector::Index(i) => {
                if *i == 0 || *i as usize > self.images.len() {
                    Err(Error::InvalidImage.into())
                } else {
                    Ok(*i)
                }
            }
            ImageSelector::Name(name) => self
                .xml
                .images
                .iter()
                .find(|img| img.name.as_deref() == Some(name.as_str()))
                .map(|img| img.index)
                .ok_or_else(|| Error::InvalidImage.into()),
            ImageSelector::All => Err(Error::InvalidParam("ImageSelector::All is not a single image".into()).into()),
        }
    }

    /// Borrows one image's metadata tree.
    pub fn image(&self, selector: &ImageSelector) -> Result<&ImageMetadata> {
        let idx = self.resolve_index(selector)?;
        Ok(&self.images[idx as usize - 1])
    }

    /// Borrows one image's XML record.
    pub fn image_xml(&self, selector: &ImageSelector) -> Result<&wim_format::xml::ImageXmlInfo> {
        let idx = self.resolve_index(selector)?;
        self.xml.images.iter().find(|i| i.index == idx).ok_or_else(|| Error::InvalidImage.into())
    }

    /// Walks an image's directory tree from `path` downward, calling `cb`
    /// with each entry's full path and dentry.
    pub fn iterate_dir_tree(&self, selector: &ImageSelector, path: &[String], mut cb: impl FnMut(&[String], &Dentry)) -> Result<()> {
        let image = self.image(selector)?;
        let start = image.lookup(path).ok_or(Error::NotFound)?;
        let mut full_path = path.to_vec();
        walk(start, &mut full_path, &mut cb);
        Ok(())
    }

    /// Adds a new image captured from `scanner`.
    /// Returns the new image's 1-based index.
    pub fn add_image(
        &mut self,
        scanner: &mut dyn ScannerSource,
        name: Option<String>,
        config: &CaptureConfig,
        mut progress: impl ProgressCallback,
    ) -> Result<u32> {
        let _span = trace_span!("Wim::add_image").entered();

        if let Some(name) = &name {
            if self.xml.images.iter().any(|i| i.name.as_deref() == Some(name.as_str())) {
                return Err(Error::ImageNameCollision.into());
            }
        }

        progress.on_progress(&ProgressMsg::ScanBegin {
            source: name.clone().unwrap_or_default(),
        });
        let entries = scanner.scan(config).map_err(Error::Io)?;
        let count = entries.len() as u64;

        let mut root = Dentry::new_root();
        let mut security = SecurityDescriptorTable::new();
        let mut dir_count = 0u64;
        let mut file_count = 0u64;
        let mut total_bytes = 0u64;

        for entry in entries {
            progress.on_progress(&ProgressMsg::ScanDentry {
                path: entry.path.join("/"),
            });
            if entry.path.is_empty() {
                continue;
            }
            if entry.is_directory() {
                dir_count += 1;
            } else {
                file_count += 1;
            }

            let (parent_path, name_component) = entry.path.split_at(entry.path.len() - 1);
            let parent = navigate_mut(&mut root, parent_path).ok_or_else(|| {
                Error::InvalidParam(format!("scanner produced {:?} before its parent directory", entry.path))
            })?;

            let security_id = match entry.security_descriptor {
                Some(sd) => security.push(sd),
                None => NO_SECURITY_ID,
            };

            let mut streams = Vec::with_capacity(entry.streams.len());
            for s in entry.streams {
                let bytes_if_needed = match (s.source.len_hint(), s.source.known_hash()) {
                    (Some(0), _) => None,
                    (_, Some(_)) => None,
                    _ => Some(s.source.read_all().map_err(Error::Io)?),
                };

                let hash = if let Some(bytes) = &bytes_if_needed {
                    if bytes.is_empty() {
                        wim_format::ZERO_HASH
                    } else {
                        let h = wim_format::sha1_hash(bytes);
                        ensure_blob(&mut self.blob_table, h, bytes.clone());
                        total_bytes += bytes.len() as u64;
                        h
                    }
                } else if let Some(h) = s.source.known_hash() {
                    if h != wim_format::ZERO_HASH && !self.blob_table.contains(&h) {
                        let bytes = s.source.read_all().map_err(Error::Io)?;
                        total_bytes += bytes.len() as u64;
                        ensure_blob(&mut self.blob_table, h, bytes);
                    }
                    h
                } else {
                    wim_format::ZERO_HASH
                };

                streams.push(StreamEntry { name: s.name, hash });
            }

            parent.children.push(Dentry {
                file_name: name_component[0].clone(),
                short_name: None,
                attributes: entry.attributes,
                security_id,
                creation_time: entry.creation_time,
                last_access_time: entry.last_access_time,
                last_write_time: entry.last_write_time,
                reparse_tag: entry.reparse_tag,
                streams,
                children: Vec::new(),
            });
        }

        let metadata = ImageMetadata { root, security };
        metadata.validate()?;

        let index = self.images.len() as u32 + 1;
        self.images.push(metadata);
        self.xml.images.push(wim_format::xml::ImageXmlInfo {
            index,
            name,
            description: None,
            display_name: None,
            dir_count,
            file_count,
            total_bytes,
            hard_link_bytes: 0,
            creation_time: wim_format::xml::WimTimestamp::default(),
            last_modification_time: wim_format::xml::WimTimestamp::default(),
        });
        self.dirty = true;

        progress.on_progress(&ProgressMsg::ScanEnd { count });
        Ok(index)
    }

    /// Removes an image. The container must
    /// keep at least... actually a container may legitimately reach zero
    /// images (an empty container is valid), so only an out-of-range
    /// selector is rejected.
    pub fn delete_image(&mut self, selector: &ImageSelector) -> Result<()> {
        let idx = self.resolve_index(selector)?;
        self.images.remove(idx as usize - 1);
        self.xml.images.retain(|i| i.index != idx);
        for img in self.xml.images.iter_mut() {
            if img.index > idx {
                img.index -= 1;
            }
        }
        if self.header.boot_index == idx {
            self.header.boot_index = 0;
        } else if self.header.boot_index > idx {
            self.header.boot_index -= 1;
        }
        self.dirty = true;
        Ok(())
    }

    /// Extracts an image's directory tree and stream contents under
    /// `target`.
    pub fn extract_image(&self, selector: &ImageSelector, target: impl AsRef<Path>, mut progress: impl ProgressCallback) -> Result<()> {
        let target = target.as_ref();
        progress.on_progress(&ProgressMsg::ExtractBegin {
            target: target.display().to_string(),
        });

        let image = self.image(selector)?;
        let file = self.file.as_ref().ok_or(Error::InvalidParam("container has no backing file to extract from".into()))?;

        std::fs::create_dir_all(target).map_err(Error::Io)?;
        let mut total_bytes = 0u64;
        let mut completed_bytes = 0u64;
        image.iterate(|_path, dentry| {
            total_bytes += dentry.unnamed_stream_hash_size(&self.blob_table);
        });

        self.extract_dentry(&image.root, target, &mut completed_bytes, total_bytes, file, &mut progress)?;

        progress.on_progress(&ProgressMsg::ExtractTimestamps);
        progress.on_progress(&ProgressMsg::ExtractEnd {
            target: target.display().to_string(),
        });
        Ok(())
    }

    fn extract_dentry(
        &self,
        dentry: &Dentry,
        dir: &Path,
        completed_bytes: &mut u64,
        total_bytes: u64,
        file: &WimFile,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        for child in &dentry.children {
            let child_path = dir.join(&child.file_name);
            progress.on_progress(&ProgressMsg::ExtractDentry {
                path: child_path.display().to_string(),
            });
            if child.is_directory() {
                std::fs::create_dir_all(&child_path).map_err(Error::Io)?;
                self.extract_dentry(child, &child_path, completed_bytes, total_bytes, file, progress)?;
            } else {
                let hash = child.unnamed_stream_hash();
                let data = if hash == wim_format::ZERO_HASH {
                    Vec::new()
                } else {
                    self.read_blob(hash, file)?
                };
                std::fs::write(&child_path, &data).map_err(Error::Io)?;
                *completed_bytes += data.len() as u64;
                progress.on_progress(&ProgressMsg::ExtractStreams {
                    completed_bytes: *completed_bytes,
                    total_bytes,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn read_blob(&self, hash: wim_format::Hash, file: &WimFile) -> Result<Vec<u8>> {
        let blob = self.blob_table.get(&hash).ok_or(Error::NotFound)?;
        match &blob.location {
            BlobLocation::InWim { resource, offset_in_res } => {
                let arena_entry = self.arena.get(*resource).ok_or(Error::NotFound)?;
                let reader =
                    wim_format::ResourceReader::open(file, arena_entry.header, self.header.compression_type(), self.header.chunk_size)
                        .map_err(Error::classify)?;
                reader
                    .read_and_verify_blob(*offset_in_res, blob.uncompressed_size, hash)
                    .map_err(Error::classify)
            }
            BlobLocation::InMemoryBuffer(buf) => Ok(buf.to_vec()),
            BlobLocation::OnDiskFile(path) => std::fs::read(path).map_err(|e| Error::Io(e).into()),
            BlobLocation::InStagingFile { path, offset } => {
                use std::io::{Read, Seek, SeekFrom};
                let mut f = File::open(path).map_err(Error::Io)?;
                f.seek(SeekFrom::Start(*offset)).map_err(Error::Io)?;
                let mut buf = vec![0u8; blob.uncompressed_size as usize];
                f.read_exact(&mut buf).map_err(Error::Io)?;
                Ok(buf)
            }
            BlobLocation::InAttachedBuffer(source) => source.read_all().map_err(|e| Error::Io(e).into()),
        }
    }

    /// Writes this container to a fresh file at `path`. For a handle that already has a backing file, this
    /// always behaves like the rebuild strategy against the new path; use
    /// [`Wim::overwrite`] to update the existing file in place.
    pub fn write(&mut self, path: impl AsRef<Path>, flags: WriteFlags, num_threads: usize, progress: impl ProgressCallback) -> Result<()> {
        flags.validate()?;
        crate::write::write_to_new_path(self, path.as_ref(), flags.normalize(), num_threads, progress)
    }

    /// Writes this container to an already-open file descriptor; `pipable` must be set in `flags` if `file` is a
    /// pipe.
    pub fn write_to_fd(&mut self, file: File, flags: WriteFlags, num_threads: usize, progress: impl ProgressCallback) -> Result<()> {
        flags.validate()?;
        crate::write::write_to_fd(self, file, flags.normalize(), num_threads, progress)
    }

    /// Rewrites this container's existing backing file, choosing among the three write strategies.
    pub fn overwrite(&mut self, flags: WriteFlags, num_threads: usize, progress: impl ProgressCallback) -> Result<()> {
        flags.validate()?;
        if !self.open_flags.contains(OpenFlags::WRITE_ACCESS) {
            return Err(Error::WimIsReadonly.into());
        }
        crate::write::overwrite(self, flags.normalize(), num_threads, progress)
    }

    pub(crate) fn acquire_lock(&mut self) -> Result<Option<ExclusiveLock<'_>>> {
        match &self.lock_handle {
            Some(f) => Ok(Some(ExclusiveLock::try_acquire(f)?)),
            None => Ok(None),
        }
    }
}

impl Dentry {
    fn unnamed_stream_hash_size(&self, blob_table: &BlobTable) -> u64 {
        let hash = self.unnamed_stream_hash();
        if hash == wim_format::ZERO_HASH {
            0
        } else {
            blob_table.get(&hash).map(|b| b.uncompressed_size).unwrap_or(0)
        }
    }
}

fn navigate_mut<'a>(root: &'a mut Dentry, path: &[String]) -> Option<&'a mut Dentry> {
    let mut current = root;
    for component in path {
        let idx = current.children.iter().position(|c| c.file_name.eq_ignore_ascii_case(component))?;
        current = &mut current.children[idx];
    }
    Some(current)
}

fn walk(dentry: &Dentry, path: &mut Vec<String>, cb: &mut impl FnMut(&[String], &Dentry)) {
    cb(path, dentry);
    for child in &dentry.children {
        path.push(child.file_name.clone());
        walk(child, path, cb);
        path.pop();
    }
}

/// Interns a freshly materialized blob's bytes into `blob_table` under
/// `hash`, unless a blob with that hash is already present. Shared by image capture and by [`crate::export`]/[`crate::join`]
/// when they bring a blob into a container it wasn't previously part of.
pub(crate) fn ensure_blob(blob_table: &mut BlobTable, hash: wim_format::Hash, bytes: Vec<u8>) {
    if blob_table.contains(&hash) {
        return;
    }
    blob_table.insert(BlobDescriptor {
        hash_state: BlobHashState::Known(hash),
        uncompressed_size: bytes.len() as u64,
        refcnt: 0,
        out_refcnt: 0,
        location: BlobLocation::InMemoryBuffer(Arc::from(bytes)),
    });
}

/// Resolves the on-disk blob table into a resource arena plus a live
/// [`BlobTable`].
///
/// Solid-resource membership is recovered from a documented convention
/// this crate establishes (not claimed to be Microsoft's own on-disk
/// scheme, which this crate does not reproduce bit-for-bit): entries
/// backed by the same physical resource appear contiguously
/// in the blob table, each entry's `uncompressed_size` is that blob's own
/// size, and a blob's `offset_in_res` is the running sum of its solid
/// siblings' sizes in table order. [`crate::write`] preserves this
/// invariant when assembling solid resources.
pub(crate) fn resolve_blob_table(entries: &[BlobTableEntry]) -> (Vec<ArenaEntry>, BlobTable) {
    let mut arena = Vec::new();
    let mut blob_table = BlobTable::new();
    let mut current_solid_key: Option<(u64, u64)> = None;
    let mut current_solid_idx = 0usize;
    let mut cumulative = 0u64;

    for entry in entries {
        if entry.resource_header.is_solid() {
            let key = (entry.resource_header.offset_in_wim, entry.resource_header.size_in_wim);
            if current_solid_key != Some(key) {
                arena.push(ArenaEntry { header: entry.resource_header });
                current_solid_idx = arena.len() - 1;
                current_solid_key = Some(key);
                cumulative = 0;
            }
            let offset_in_res = cumulative;
            cumulative += entry.resource_header.uncompressed_size;
            blob_table.insert(BlobDescriptor {
                hash_state: BlobHashState::Known(entry.hash),
                uncompressed_size: entry.resource_header.uncompressed_size,
                refcnt: entry.ref_count as u64,
                out_refcnt: 0,
                location: BlobLocation::InWim {
                    resource: current_solid_idx,
                    offset_in_res,
                },
            });
        } else {
            current_solid_key = None;
            let idx = arena.len();
            arena.push(ArenaEntry { header: entry.resource_header });
            blob_table.insert(BlobDescriptor {
                hash_state: BlobHashState::Known(entry.hash),
                uncompressed_size: entry.resource_header.uncompressed_size,
                refcnt: entry.ref_count as u64,
                out_refcnt: 0,
                location: BlobLocation::InWim { resource: idx, offset_in_res: 0 },
            });
        }
    }

    (arena, blob_table)
}

/// Returns the set of hashes currently backed by a resource already on
/// disk in this container (the APPEND filter's "already present" set).
pub(crate) fn existing_hashes(blob_table: &BlobTable) -> HashSet<wim_format::Hash> {
    blob_table
        .iter()
        .filter(|(_, b)| matches!(b.location, BlobLocation::InWim { .. }))
        .map(|(h, _)| *h)
        .collect()
}

pub(crate) const DEFAULT_WRITE_COMPRESSION: CompressionType = DEFAULT_COMPRESSION;

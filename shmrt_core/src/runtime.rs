//! Segment and mutex factory
//!
//! `ShmRuntime` holds only its configuration. Everything needed to find a
//! segment by name lives in the OS shm namespace (see [`crate::generation`]),
//! so independent processes each build their own runtime and still meet on
//! the same objects.

use crate::error::{ShmError, ShmResult};
use crate::generation::{MappedRecord, NAME_RECORD_SIZE, ObjectNames};
use crate::lifecycle::{SegmentMetadata, registry};
use crate::mutex::{MUTEX_STATE_SIZE, ShmMutex};
use crate::platform::{
    LinuxMemoryConfig, create_object, get_current_pid, is_process_alive, map_object,
    object_len, open_object, open_or_create_object, unlink_object,
};
use crate::segment::Segment;
use nix::errno::Errno;
use serde::Serialize;
use shmrt_common::config::ShmConfig;
use shmrt_common::consts::SHM_MAX_SIZE;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Read-only description of a live segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    /// Logical segment name
    pub name: String,
    /// OS name of the live backing object
    pub object: String,
    /// Live generation
    pub generation: u64,
    /// Size in bytes
    pub size: usize,
    /// Creator process ID
    pub creator_pid: u32,
    /// Whether the creator process still exists
    pub creator_alive: bool,
}

/// Factory for named segments and the mutexes inside them.
#[derive(Debug, Clone)]
pub struct ShmRuntime {
    config: ShmConfig,
    memory: LinuxMemoryConfig,
}

impl Default for ShmRuntime {
    fn default() -> Self {
        let config = ShmConfig::default();
        let memory = LinuxMemoryConfig {
            populate: config.populate,
        };
        Self { config, memory }
    }
}

impl ShmRuntime {
    /// Build a runtime from validated configuration.
    pub fn new(config: ShmConfig) -> ShmResult<Self> {
        config.validate()?;
        let memory = LinuxMemoryConfig {
            populate: config.populate,
        };
        Ok(Self { config, memory })
    }

    /// Configuration this runtime was built with
    pub fn config(&self) -> &ShmConfig {
        &self.config
    }

    /// Bytes of segment space one mutex occupies.
    pub fn mutex_size(&self) -> usize {
        MUTEX_STATE_SIZE
    }

    /// Create a new zero-filled segment of exactly `size` bytes.
    ///
    /// Creating a name that already has a live segment is allowed: the new
    /// segment becomes the one [`attach_segment`](Self::attach_segment)
    /// resolves, while handles to the old one keep working on their own,
    /// unaliased memory.
    pub fn create_segment(&self, name: &str, size: usize) -> ShmResult<Segment> {
        if size == 0 || size > SHM_MAX_SIZE {
            return Err(ShmError::InvalidSize { size });
        }
        let names = self.names(name)?;
        let creator_pid = get_current_pid();

        let (record, created_record) = self.open_record(&names)?;
        let generation = record.record().allocate();
        let object = names.backing(generation);

        let file = match create_object(&object, size, self.config.mode) {
            Err(Errno::EEXIST) => {
                // Leftover from a run that lost its name record.
                warn!(object = %object, "replacing stale backing object");
                if let Err(e) = unlink_object(&object) {
                    warn!(object = %object, "failed to unlink stale backing object: {e}");
                }
                create_object(&object, size, self.config.mode)
            }
            other => other,
        };
        let file = match file {
            Ok(file) => file,
            Err(e) => {
                self.release_unused_record(&names, &record, created_record);
                return Err(ShmError::resource(&object, e));
            }
        };

        let mmap = match map_object(&object, &file, size, &self.memory) {
            Ok(mmap) => mmap,
            Err(e) => {
                if let Err(unlink) = unlink_object(&object) {
                    warn!(object = %object, "failed to unlink unmappable backing object: {unlink}");
                }
                self.release_unused_record(&names, &record, created_record);
                return Err(e);
            }
        };

        if let Some(previous) = record.record().publish(generation, size, creator_pid) {
            let stale = names.backing(previous);
            debug!(segment = name, previous, "superseding live generation");
            if let Err(e) = unlink_object(&stale) {
                if e != Errno::ENOENT {
                    warn!(object = %stale, "failed to unlink superseded generation: {e}");
                }
            }
        }

        registry().register(SegmentMetadata {
            prefix: self.config.name_prefix.clone(),
            name: name.to_string(),
            generation,
            size,
            creator_pid,
            created_at: SystemTime::now(),
        });

        info!(segment = name, generation, size, "created segment");
        Ok(Segment::new(name.to_string(), generation, size, mmap))
    }

    /// Map the live segment under `name`, which must be `size` bytes.
    pub fn attach_segment(&self, name: &str, size: usize) -> ShmResult<Segment> {
        let names = self.names(name)?;
        let not_found = || ShmError::NotFound {
            name: name.to_string(),
        };

        let record = self.existing_record(&names)?.ok_or_else(not_found)?;
        let live = record.record().live().ok_or_else(not_found)?;
        let object = names.backing(live.generation);

        let file = match open_object(&object) {
            Ok(file) => file,
            // Destroyed or superseded between reading the record and opening.
            Err(Errno::ENOENT) => return Err(not_found()),
            Err(e) => return Err(ShmError::resource(&object, e)),
        };

        let actual = object_len(&file).map_err(|e| ShmError::resource(&object, e))?;
        if actual != size {
            return Err(ShmError::SizeMismatch {
                name: name.to_string(),
                expected: size,
                actual,
            });
        }

        let mmap = map_object(&object, &file, size, &self.memory)?;
        debug!(segment = name, generation = live.generation, size, "attached segment");
        Ok(Segment::new(name.to_string(), live.generation, size, mmap))
    }

    /// Release the live backing object and the name record for `name`.
    ///
    /// Handles already mapped stay usable by their holders, but nothing can
    /// attach any more. Destroying a name with nothing live is a no-op.
    ///
    /// The registry entry is only dropped once every OS object is gone, so a
    /// failed destroy can be retried through
    /// [`destroy_owned`](Self::destroy_owned).
    pub fn destroy_segment(&self, name: &str) -> ShmResult<()> {
        let names = self.names(name)?;

        let Some(record) = self.existing_record(&names)? else {
            registry().unregister(&self.config.name_prefix, name);
            debug!(segment = name, "destroy: no such segment");
            return Ok(());
        };

        if let Some(generation) = record.record().retire() {
            let object = names.backing(generation);
            match unlink_object(&object) {
                Ok(()) | Err(Errno::ENOENT) => {}
                Err(e) => return Err(ShmError::resource(&object, e)),
            }
            info!(segment = name, generation, "destroyed segment");
        } else {
            debug!(segment = name, "destroy: nothing live");
        }

        let record_name = names.record();
        match unlink_object(&record_name) {
            Ok(()) | Err(Errno::ENOENT) => {}
            Err(e) => return Err(ShmError::resource(&record_name, e)),
        }

        registry().unregister(&self.config.name_prefix, name);
        Ok(())
    }

    /// Destroy every segment this process created under this runtime's
    /// prefix and has not destroyed yet. Returns how many were destroyed.
    pub fn destroy_owned(&self) -> ShmResult<usize> {
        let owned = registry().owned(&self.config.name_prefix);
        let mut destroyed = 0;
        for metadata in owned {
            self.destroy_segment(&metadata.name)?;
            destroyed += 1;
        }
        Ok(destroyed)
    }

    /// Describe the live segment under `name`.
    pub fn describe(&self, name: &str) -> ShmResult<SegmentInfo> {
        let names = self.names(name)?;
        let not_found = || ShmError::NotFound {
            name: name.to_string(),
        };

        let record = self.existing_record(&names)?.ok_or_else(not_found)?;
        let live = record.record().live().ok_or_else(not_found)?;

        Ok(SegmentInfo {
            name: name.to_string(),
            object: names.backing(live.generation),
            generation: live.generation,
            size: live.size,
            creator_pid: live.creator_pid,
            creator_alive: is_process_alive(live.creator_pid),
        })
    }

    /// Initialize unlocked mutex state at `offset` inside `segment`.
    pub fn create_mutex<'seg>(
        &self,
        segment: &'seg Segment,
        offset: usize,
    ) -> ShmResult<ShmMutex<'seg>> {
        let mutex = ShmMutex::create(segment, offset)?;
        debug!(segment = segment.name(), offset, "created mutex");
        Ok(mutex)
    }

    /// Bind to mutex state already initialized at `offset`.
    pub fn attach_mutex<'seg>(
        &self,
        segment: &'seg Segment,
        offset: usize,
    ) -> ShmResult<ShmMutex<'seg>> {
        ShmMutex::attach(segment, offset)
    }

    fn names(&self, name: &str) -> ShmResult<ObjectNames> {
        ObjectNames::new(&self.config.name_prefix, name)
    }

    /// Map the name record, creating it if needed. The flag tells whether
    /// this call created it.
    fn open_record(&self, names: &ObjectNames) -> ShmResult<(MappedRecord, bool)> {
        let record_name = names.record();
        let (file, created) = match create_object(&record_name, NAME_RECORD_SIZE, self.config.mode)
        {
            Ok(file) => (file, true),
            Err(Errno::EEXIST) => (
                open_or_create_object(&record_name, NAME_RECORD_SIZE, self.config.mode)?,
                false,
            ),
            Err(e) => return Err(ShmError::resource(&record_name, e)),
        };

        let mmap = match map_object(&record_name, &file, NAME_RECORD_SIZE, &LinuxMemoryConfig::default()) {
            Ok(mmap) => mmap,
            Err(e) => {
                if created {
                    if let Err(unlink) = unlink_object(&record_name) {
                        warn!(object = %record_name, "failed to unlink unmappable name record: {unlink}");
                    }
                }
                return Err(e);
            }
        };
        Ok((MappedRecord::new(mmap), created))
    }

    /// Undo a record created by a create that then failed, unless some
    /// generation went live meanwhile.
    fn release_unused_record(&self, names: &ObjectNames, record: &MappedRecord, created: bool) {
        if !created || record.record().live().is_some() {
            return;
        }
        let record_name = names.record();
        match unlink_object(&record_name) {
            Ok(()) | Err(Errno::ENOENT) => {
                debug!(object = %record_name, "released unused name record")
            }
            Err(e) => warn!(object = %record_name, "failed to unlink unused name record: {e}"),
        }
    }

    fn existing_record(&self, names: &ObjectNames) -> ShmResult<Option<MappedRecord>> {
        let record_name = names.record();
        let file = match open_object(&record_name) {
            Ok(file) => file,
            Err(Errno::ENOENT) => return Ok(None),
            Err(e) => return Err(ShmError::resource(&record_name, e)),
        };

        // A record created a moment ago may not be sized yet.
        if object_len(&file).map_err(|e| ShmError::resource(&record_name, e))? < NAME_RECORD_SIZE {
            return Ok(None);
        }

        let mmap = map_object(&record_name, &file, NAME_RECORD_SIZE, &LinuxMemoryConfig::default())?;
        Ok(Some(MappedRecord::new(mmap)))
    }
}

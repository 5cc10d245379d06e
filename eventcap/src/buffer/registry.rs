//! Startup-time registry of capture buffers
//!
//! Every destination buffer is created exactly once, through
//! [`RegistryBuilder`], before any execution unit starts reporting. The built
//! [`BufferRegistry`] is immutable: contexts resolve their buffer from it and
//! the drainer obtains its handle from it, with no locking on lookup.
//!
//! A process that wants a single shared registry installs it with
//! [`install_global`] and reads it back with [`global`].

use log::info;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::ring_buffer::{OverflowStrategy, RingBuffer};
use crate::config::RuntimeConfig;
use crate::domain::{BufferId, RegistryError};

static GLOBAL_REGISTRY: OnceLock<Arc<BufferRegistry>> = OnceLock::new();

/// Read-only mapping from buffer names to shared ring buffers
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: BTreeMap<BufferId, Arc<RingBuffer>>,
}

impl BufferRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry holding a single [`BufferId::DEFAULT`] buffer shaped by `config`
    ///
    /// # Errors
    ///
    /// Fails when the configured capacity is not a power of two.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RegistryError> {
        Ok(Self::builder()
            .buffer_with_timeout(
                BufferId::default_buffer(),
                config.buffer_capacity,
                config.default_overflow_strategy,
                config.block_timeout(),
            )?
            .build())
    }

    /// Shared handle to a registered buffer
    #[must_use]
    pub fn get(&self, id: &BufferId) -> Option<Arc<RingBuffer>> {
        self.buffers.get(id).map(Arc::clone)
    }

    /// Like [`BufferRegistry::get`], but reports a missing buffer as an error
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownBuffer`] when `id` was never registered.
    pub fn require(&self, id: &BufferId) -> Result<Arc<RingBuffer>, RegistryError> {
        self.get(id).ok_or_else(|| RegistryError::UnknownBuffer(id.clone()))
    }

    /// The [`BufferId::DEFAULT`] buffer, if registered
    #[must_use]
    pub fn default_buffer(&self) -> Option<Arc<RingBuffer>> {
        self.get(&BufferId::default_buffer())
    }

    /// Registered names in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &BufferId> {
        self.buffers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BufferId, &Arc<RingBuffer>)> {
        self.buffers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Collects buffer definitions before the registry is frozen
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    buffers: BTreeMap<BufferId, Arc<RingBuffer>>,
}

impl RegistryBuilder {
    /// Create and register a buffer
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateBuffer`] if `id` is taken, or a wrapped
    /// [`crate::domain::BufferError`] for an invalid capacity.
    pub fn buffer(
        self,
        id: impl Into<BufferId>,
        capacity: usize,
        overflow_strategy: OverflowStrategy,
    ) -> Result<Self, RegistryError> {
        self.buffer_with_timeout(id, capacity, overflow_strategy, None)
    }

    /// Create and register a buffer whose `Block` writers give up after `block_timeout`
    ///
    /// # Errors
    ///
    /// Same as [`RegistryBuilder::buffer`].
    pub fn buffer_with_timeout(
        mut self,
        id: impl Into<BufferId>,
        capacity: usize,
        overflow_strategy: OverflowStrategy,
        block_timeout: Option<Duration>,
    ) -> Result<Self, RegistryError> {
        let id = id.into();
        if self.buffers.contains_key(&id) {
            return Err(RegistryError::DuplicateBuffer(id));
        }
        let buffer =
            RingBuffer::new(capacity, overflow_strategy)?.with_block_timeout(block_timeout);
        info!("registered {id}: capacity={capacity} overflow={overflow_strategy}");
        self.buffers.insert(id, Arc::new(buffer));
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> BufferRegistry {
        BufferRegistry { buffers: self.buffers }
    }
}

/// Install the process-wide registry
///
/// # Errors
///
/// [`RegistryError::AlreadyInstalled`] on every call after the first.
pub fn install_global(registry: BufferRegistry) -> Result<Arc<BufferRegistry>, RegistryError> {
    let registry = Arc::new(registry);
    GLOBAL_REGISTRY.set(Arc::clone(&registry)).map_err(|_| RegistryError::AlreadyInstalled)?;
    Ok(registry)
}

/// The process-wide registry, if one was installed
#[must_use]
pub fn global() -> Option<Arc<BufferRegistry>> {
    GLOBAL_REGISTRY.get().map(Arc::clone)
}

//! Resource table: device buffers by stable id.

use crate::error::{DeviceError, InvocationError, Result, SetupError};
use bobbin_core::{ResourceId, ResourceRole};
use futures::channel::oneshot;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Size of the uniform constant buffer. Only the first f32 is meaningful.
const CONSTANT_BUFFER_SIZE: usize = 16;

/// Round a declared size up to the device copy alignment.
pub(crate) fn padded_size(byte_size: u64) -> u64 {
    byte_size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

/// A device buffer with its declared size and role.
#[derive(Debug)]
pub(crate) struct ResourceEntry {
    pub buffer: wgpu::Buffer,
    /// Declared size; the device buffer may be padded past it.
    pub byte_size: u64,
    pub role: ResourceRole,
}

/// Owns every buffer a tape binds, plus the uniform constant.
///
/// Weight buffers are created with their data and without `COPY_DST`, so
/// nothing can write them after setup. Scratch and io buffers are
/// `STORAGE | COPY_SRC | COPY_DST` and are never cleared between calls.
#[derive(Debug)]
pub struct ResourceTable {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    entries: HashMap<ResourceId, ResourceEntry>,
    constant: wgpu::Buffer,
    next_id: usize,
}

impl ResourceTable {
    /// Create an empty table with the uniform constant set to `constant`.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, constant: f32) -> Self {
        let mut contents = [0u8; CONSTANT_BUFFER_SIZE];
        contents[..4].copy_from_slice(&constant.to_le_bytes());

        let constant = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("constant"),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        Self {
            device,
            queue,
            entries: HashMap::new(),
            constant,
            next_id: 0,
        }
    }

    /// Create a scratch or io buffer and return its id.
    ///
    /// # Errors
    /// Fails for a zero size, a size over the device's `max_buffer_size`, or
    /// for the weight role (use [`Self::create_weight`]).
    pub fn create(&mut self, byte_size: u64, role: ResourceRole) -> Result<ResourceId> {
        if role == ResourceRole::Weight {
            return Err(SetupError::WeightWithoutData.into());
        }
        let id = ResourceId(self.next_id);
        self.create_at(id, byte_size, role, None, &id.to_string())?;
        Ok(id)
    }

    /// Create a weight buffer holding `data` and return its id.
    ///
    /// # Errors
    /// Fails for a zero size or if `data.len() != byte_size`.
    pub fn create_weight(&mut self, byte_size: u64, data: &[u8]) -> Result<ResourceId> {
        let id = ResourceId(self.next_id);
        self.create_at(id, byte_size, ResourceRole::Weight, Some(data), &id.to_string())?;
        Ok(id)
    }

    /// Create a buffer under a caller-chosen id.
    pub(crate) fn create_at(
        &mut self,
        id: ResourceId,
        byte_size: u64,
        role: ResourceRole,
        data: Option<&[u8]>,
        label: &str,
    ) -> std::result::Result<(), SetupError> {
        if byte_size == 0 {
            return Err(SetupError::ZeroSize(id));
        }
        if self.entries.contains_key(&id) {
            return Err(SetupError::DuplicateResource(id));
        }
        let max_buffer = u64::from(self.device.limits().max_buffer_size);
        if padded_size(byte_size) > max_buffer {
            return Err(SetupError::DeviceLimit {
                subject: format!("Resource {label}"),
                limit: "max_buffer_size",
                requested: padded_size(byte_size),
                max: max_buffer,
            });
        }

        let buffer = match (role, data) {
            (ResourceRole::Weight, Some(data)) => {
                if data.len() as u64 != byte_size {
                    return Err(SetupError::WeightSize {
                        resource: id,
                        expected: byte_size,
                        found: data.len(),
                    });
                }
                // Padded to the copy alignment by create_buffer_init
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents: data,
                        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    })
            }
            (ResourceRole::Weight, None) => return Err(SetupError::WeightWithoutData),
            (_, _) => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: padded_size(byte_size),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        };

        self.entries.insert(
            id,
            ResourceEntry {
                buffer,
                byte_size,
                role,
            },
        );
        self.next_id = self.next_id.max(id.index() + 1);
        Ok(())
    }

    /// Upload bytes into a scratch or io buffer.
    ///
    /// The write is queued and lands before the next submission.
    ///
    /// # Errors
    /// Fails for unknown ids, weight buffers, or if `data` is not exactly the
    /// declared size. Nothing is written on failure.
    pub fn write(&self, id: ResourceId, data: &[u8]) -> Result<()> {
        let entry = self.check_writable(id, data.len())?;

        let data = if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            Cow::Borrowed(data)
        } else {
            let mut padded = data.to_vec();
            padded.resize(padded_size(entry.byte_size) as usize, 0);
            Cow::Owned(padded)
        };

        self.queue.write_buffer(&entry.buffer, 0, &data);
        Ok(())
    }

    /// Check that `len` bytes may be written to `id`, without writing.
    pub(crate) fn check_writable(
        &self,
        id: ResourceId,
        len: usize,
    ) -> std::result::Result<&ResourceEntry, InvocationError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(InvocationError::UnknownResource(id))?;
        if entry.role == ResourceRole::Weight {
            return Err(InvocationError::ReadOnly(id));
        }
        if len as u64 != entry.byte_size {
            return Err(InvocationError::InputSize {
                resource: id,
                expected: entry.byte_size,
                found: len,
            });
        }
        Ok(entry)
    }

    /// Download the declared bytes of any buffer, including weights.
    ///
    /// # Errors
    /// Fails for unknown ids or if the device fails.
    pub async fn read(&self, id: ResourceId) -> Result<Vec<u8>> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("resource_read"),
            });
        let readback = self.encode_readback(&mut encoder, id)?;
        self.queue.submit(Some(encoder.finish()));

        let mut data = read_back(&self.device, vec![readback]).await?;
        Ok(data.remove(0))
    }

    /// Record a copy of `id` into a fresh staging buffer.
    pub(crate) fn encode_readback(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        id: ResourceId,
    ) -> std::result::Result<Readback, InvocationError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(InvocationError::UnknownResource(id))?;
        let size = padded_size(entry.byte_size);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&entry.buffer, 0, &staging, 0, size);

        Ok(Readback {
            staging,
            byte_size: entry.byte_size,
        })
    }

    /// Device buffer for `id`.
    pub fn buffer(&self, id: ResourceId) -> Option<&wgpu::Buffer> {
        self.entries.get(&id).map(|e| &e.buffer)
    }

    /// Declared size of `id`.
    pub fn byte_size(&self, id: ResourceId) -> Option<u64> {
        self.entries.get(&id).map(|e| e.byte_size)
    }

    /// Role of `id`.
    pub fn role(&self, id: ResourceId) -> Option<ResourceRole> {
        self.entries.get(&id).map(|e| e.role)
    }

    /// The uniform constant buffer bound at binding 0.
    pub fn constant(&self) -> &wgpu::Buffer {
        &self.constant
    }

    /// Total declared bytes held in buffers of `role`.
    pub fn total_bytes(&self, role: ResourceRole) -> u64 {
        self.entries
            .values()
            .filter(|e| e.role == role)
            .map(|e| e.byte_size)
            .sum()
    }

    /// Number of buffers, excluding the constant.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A staging buffer that will hold a copy of a resource once the queue drains.
pub(crate) struct Readback {
    staging: wgpu::Buffer,
    byte_size: u64,
}

/// Map every staging buffer, wait for the device once, and collect the
/// declared bytes of each in order.
pub(crate) async fn read_back(
    device: &wgpu::Device,
    readbacks: Vec<Readback>,
) -> std::result::Result<Vec<Vec<u8>>, DeviceError> {
    let receivers: Vec<_> = readbacks
        .iter()
        .map(|readback| {
            let (sender, receiver) = oneshot::channel();
            readback
                .staging
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = sender.send(result);
                });
            receiver
        })
        .collect();

    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| DeviceError::Poll(format!("{e:?}")))?;

    let mut results = Vec::with_capacity(readbacks.len());
    for (readback, receiver) in readbacks.iter().zip(receivers) {
        receiver.await.map_err(|_| DeviceError::MapCancelled)??;

        let mapped = readback.staging.slice(..).get_mapped_range();
        results.push(mapped[..readback.byte_size as usize].to_vec());
        drop(mapped);
        readback.staging.unmap();
    }

    Ok(results)
}

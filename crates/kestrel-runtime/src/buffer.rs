//! Device memory and host transfers.
//!
//! Host data is always copied; device objects never alias host slices.

use crate::error::{ErrorCode, Result, RuntimeError};
use crate::session::{ContextId, Session};
use bytemuck::Pod;
use std::marker::PhantomData;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// wgpu requires buffer sizes and copies to be multiples of 4 bytes.
const COPY_ALIGN: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// How kernels may access a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Kernels only read.
    ReadOnly,
    /// Kernels only write.
    WriteOnly,
    /// Kernels read and write.
    ReadWrite,
}

/// A typed buffer in device memory.
#[derive(Debug)]
pub struct DeviceBuffer<T: Pod> {
    pub(crate) buffer: Arc<wgpu::Buffer>,
    pub(crate) access: AccessMode,
    pub(crate) context: ContextId,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> DeviceBuffer<T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length buffers.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Access mode.
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Context the buffer belongs to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Size in bytes of the elements (excluding alignment padding).
    pub fn size_bytes(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }
}

/// Texel format of an image. Channels are `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// One channel.
    R32Float,
    /// Four channels.
    Rgba32Float,
}

impl ImageFormat {
    /// Number of `f32` channels per texel.
    pub fn channels(self) -> u32 {
        match self {
            ImageFormat::R32Float => 1,
            ImageFormat::Rgba32Float => 4,
        }
    }

    /// Bytes per texel.
    pub fn texel_bytes(self) -> u32 {
        self.channels() * 4
    }

    pub(crate) fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            ImageFormat::R32Float => wgpu::TextureFormat::R32Float,
            ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }
}

/// A rectangle of texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Top-left texel.
    pub origin: [u32; 2],
    /// Width and height in texels.
    pub extent: [u32; 2],
}

impl Region {
    /// Region starting at `origin` with size `extent`.
    pub fn new(origin: [u32; 2], extent: [u32; 2]) -> Self {
        Self { origin, extent }
    }

    /// Number of texels.
    pub fn texels(&self) -> usize {
        self.extent[0] as usize * self.extent[1] as usize
    }
}

/// A 2-D image in device memory.
#[derive(Debug)]
pub struct DeviceImage {
    pub(crate) texture: Arc<wgpu::Texture>,
    pub(crate) view: Arc<wgpu::TextureView>,
    pub(crate) access: AccessMode,
    pub(crate) format: ImageFormat,
    pub(crate) context: ContextId,
    width: u32,
    height: u32,
}

impl DeviceImage {
    /// Width in texels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texel format.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Access mode.
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Context the image belongs to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The whole image as a region.
    pub fn full_region(&self) -> Region {
        Region::new([0, 0], [self.width, self.height])
    }
}

/// Rows of a texture copy padded to the 256-byte row alignment.
#[derive(Debug, Clone, Copy)]
struct RowLayout {
    unpadded: usize,
    padded: usize,
    rows: usize,
}

/// A read-back that has been enqueued but not yet waited for.
#[must_use = "a pending read does nothing until waited on"]
pub struct PendingRead<T: Pod> {
    gpu: Arc<wgpu::Device>,
    staging: wgpu::Buffer,
    submission: wgpu::SubmissionIndex,
    receiver: futures::channel::oneshot::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
    len: usize,
    rows: Option<RowLayout>,
    _marker: PhantomData<T>,
}

impl<T: Pod> PendingRead<T> {
    /// Block until the data is on the host and return it.
    ///
    /// # Errors
    /// [`RuntimeError::Transfer`] with [`ErrorCode::MapFailed`] if the
    /// staging buffer could not be mapped.
    pub fn wait(self) -> Result<Vec<T>> {
        self.gpu
            .poll(wgpu::Maintain::WaitForSubmissionIndex(self.submission.clone()));

        pollster::block_on(self.receiver)
            .map_err(|_| RuntimeError::transfer(ErrorCode::DeviceLost, "map callback dropped"))?
            .map_err(|e| RuntimeError::transfer(ErrorCode::MapFailed, e.to_string()))?;

        let mut out = vec![T::zeroed(); self.len];
        {
            let mapped = self.staging.slice(..).get_mapped_range();
            let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
            match self.rows {
                None => dst.copy_from_slice(&mapped[..dst.len()]),
                Some(layout) => {
                    let rows = dst.chunks_exact_mut(layout.unpadded).take(layout.rows);
                    for (row, chunk) in rows.enumerate() {
                        let start = row * layout.padded;
                        chunk.copy_from_slice(&mapped[start..start + layout.unpadded]);
                    }
                }
            }
        }
        self.staging.unmap();
        Ok(out)
    }
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn usage() -> wgpu::BufferUsages {
    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
}

impl Session {
    /// Allocate a buffer of `len` elements.
    ///
    /// When `initial` is given it is copied into the buffer before this
    /// returns and must hold exactly `len` elements. Otherwise the buffer is
    /// zeroed.
    ///
    /// # Errors
    /// [`RuntimeError::Transfer`] if `initial` has the wrong length or the
    /// runtime cannot allocate the buffer.
    pub fn allocate<T: Pod>(
        &self,
        access: AccessMode,
        len: usize,
        initial: Option<&[T]>,
    ) -> Result<DeviceBuffer<T>> {
        if let Some(data) = initial {
            if data.len() != len {
                return Err(RuntimeError::transfer(
                    ErrorCode::InvalidArgument,
                    format!("initial data has {} elements, buffer has {len}", data.len()),
                ));
            }
        }

        let size = (len * std::mem::size_of::<T>()) as u64;
        let label = format!("{} buffer", self.config.label);
        let (buffer, error) = self.scoped(|| match initial {
            Some(data) if size > 0 => {
                self.gpu
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(&label),
                        contents: bytemuck::cast_slice(data),
                        usage: usage(),
                    })
            }
            _ => self.gpu.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size: align_to(size.max(COPY_ALIGN), COPY_ALIGN),
                usage: usage(),
                mapped_at_creation: false,
            }),
        });
        if let Some((code, message)) = error {
            return Err(RuntimeError::transfer(code, format!("allocating {size} bytes: {message}")));
        }

        if self.config.verbose {
            tracing::info!(
                bytes = size,
                ?access,
                initialized = initial.is_some(),
                "buffer allocated"
            );
        }
        Ok(DeviceBuffer {
            buffer: Arc::new(buffer),
            access,
            context: self.context_id,
            len,
            _marker: PhantomData,
        })
    }

    /// Allocate a buffer holding a copy of `data`.
    pub fn upload<T: Pod>(&self, access: AccessMode, data: &[T]) -> Result<DeviceBuffer<T>> {
        self.allocate(access, data.len(), Some(data))
    }

    /// Copy `data` into `buffer` starting at element `offset`.
    ///
    /// With `blocking` the call returns once the copy has completed on the
    /// device; otherwise it is ordered before any later submission.
    ///
    /// # Errors
    /// [`RuntimeError::Transfer`] if the range lies outside the buffer or is
    /// not 4-byte aligned.
    pub fn write<T: Pod>(
        &self,
        buffer: &DeviceBuffer<T>,
        offset: usize,
        data: &[T],
        blocking: bool,
    ) -> Result<()> {
        self.check_context(buffer.context);
        check_range(buffer.len, offset, data.len())?;

        let bytes: &[u8] = bytemuck::cast_slice(data);
        let byte_offset = (offset * std::mem::size_of::<T>()) as u64;
        if byte_offset % COPY_ALIGN != 0 || bytes.len() as u64 % COPY_ALIGN != 0 {
            return Err(RuntimeError::transfer(
                ErrorCode::Validation,
                format!(
                    "write of {} bytes at byte offset {byte_offset} is not 4-byte aligned",
                    bytes.len()
                ),
            ));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let ((), error) =
            self.scoped(|| self.queue.write_buffer(&buffer.buffer, byte_offset, bytes));
        if let Some((code, message)) = error {
            return Err(RuntimeError::transfer(code, message));
        }
        if blocking {
            self.finish()?;
        }
        Ok(())
    }

    /// Read `len` elements starting at element `offset`, blocking until all
    /// previously submitted work affecting them has completed.
    pub fn read<T: Pod>(
        &self,
        buffer: &DeviceBuffer<T>,
        offset: usize,
        len: usize,
    ) -> Result<Vec<T>> {
        self.enqueue_read(buffer, offset, len)?.wait()
    }

    /// Read the whole buffer, blocking.
    pub fn read_all<T: Pod>(&self, buffer: &DeviceBuffer<T>) -> Result<Vec<T>> {
        self.read(buffer, 0, buffer.len)
    }

    /// Enqueue a read and return without waiting for it.
    ///
    /// # Errors
    /// [`RuntimeError::Transfer`] if the range lies outside the buffer.
    pub fn enqueue_read<T: Pod>(
        &self,
        buffer: &DeviceBuffer<T>,
        offset: usize,
        len: usize,
    ) -> Result<PendingRead<T>> {
        self.check_context(buffer.context);
        check_range(buffer.len, offset, len)?;

        let elem = std::mem::size_of::<T>() as u64;
        // Empty reads still map a minimal staging buffer; copy from the start.
        let byte_offset = if len == 0 { 0 } else { offset as u64 * elem };
        let byte_len = len as u64 * elem;
        if byte_offset % COPY_ALIGN != 0 {
            return Err(RuntimeError::transfer(
                ErrorCode::Validation,
                format!("read at byte offset {byte_offset} is not 4-byte aligned"),
            ));
        }
        let copy_len = align_to(byte_len.max(COPY_ALIGN), COPY_ALIGN)
            .min(buffer.buffer.size() - byte_offset);

        self.stage_read(copy_len, None, len, |encoder, staging| {
            encoder.copy_buffer_to_buffer(&buffer.buffer, byte_offset, staging, 0, copy_len);
        })
    }

    /// Allocate a `width` x `height` image, optionally initialized from
    /// `initial` (row-major texels, `channels` floats each).
    pub fn allocate_image(
        &self,
        access: AccessMode,
        format: ImageFormat,
        width: u32,
        height: u32,
        initial: Option<&[f32]>,
    ) -> Result<DeviceImage> {
        if width == 0 || height == 0 {
            return Err(RuntimeError::transfer(
                ErrorCode::InvalidArgument,
                format!("image extent {width}x{height} is empty"),
            ));
        }

        let label = format!("{} image", self.config.label);
        let (texture, error) = self.scoped(|| {
            self.gpu.create_texture(&wgpu::TextureDescriptor {
                label: Some(&label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: format.to_wgpu(),
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        });
        if let Some((code, message)) = error {
            return Err(RuntimeError::transfer(
                code,
                format!("allocating {width}x{height} image: {message}"),
            ));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let image = DeviceImage {
            texture: Arc::new(texture),
            view: Arc::new(view),
            access,
            format,
            context: self.context_id,
            width,
            height,
        };
        if let Some(data) = initial {
            self.write_image(&image, image.full_region(), data, true)?;
        }
        Ok(image)
    }

    /// Copy texels into `region` of `image`.
    ///
    /// # Errors
    /// [`RuntimeError::Transfer`] if the region lies outside the image or
    /// `data` does not hold exactly the region's texels.
    pub fn write_image(
        &self,
        image: &DeviceImage,
        region: Region,
        data: &[f32],
        blocking: bool,
    ) -> Result<()> {
        self.check_context(image.context);
        check_region(image, &region)?;

        let expected = region.texels() * image.format.channels() as usize;
        if data.len() != expected {
            return Err(RuntimeError::transfer(
                ErrorCode::InvalidArgument,
                format!("region needs {expected} floats, got {}", data.len()),
            ));
        }

        let ((), error) = self.scoped(|| {
            self.queue.write_texture(
                texel_copy(image, &region),
                bytemuck::cast_slice(data),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(region.extent[0] * image.format.texel_bytes()),
                    rows_per_image: Some(region.extent[1]),
                },
                extent(&region),
            )
        });
        if let Some((code, message)) = error {
            return Err(RuntimeError::transfer(code, message));
        }
        if blocking {
            self.finish()?;
        }
        Ok(())
    }

    /// Read `region` of `image`, blocking.
    pub fn read_image(&self, image: &DeviceImage, region: Region) -> Result<Vec<f32>> {
        self.enqueue_read_image(image, region)?.wait()
    }

    /// Enqueue a read of `region` of `image`.
    pub fn enqueue_read_image(
        &self,
        image: &DeviceImage,
        region: Region,
    ) -> Result<PendingRead<f32>> {
        self.check_context(image.context);
        check_region(image, &region)?;

        let unpadded = region.extent[0] as u64 * image.format.texel_bytes() as u64;
        let padded = align_to(unpadded, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64);
        let rows = region.extent[1] as u64;
        let layout = RowLayout {
            unpadded: unpadded as usize,
            padded: padded as usize,
            rows: rows as usize,
        };
        let len = region.texels() * image.format.channels() as usize;

        self.stage_read(padded * rows, Some(layout), len, |encoder, staging| {
            encoder.copy_texture_to_buffer(
                texel_copy(image, &region),
                wgpu::TexelCopyBufferInfo {
                    buffer: staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded as u32),
                        rows_per_image: Some(region.extent[1]),
                    },
                },
                extent(&region),
            );
        })
    }

    /// Copy into a fresh staging buffer, submit, and start mapping it.
    fn stage_read<T: Pod>(
        &self,
        staging_size: u64,
        rows: Option<RowLayout>,
        len: usize,
        record: impl FnOnce(&mut wgpu::CommandEncoder, &wgpu::Buffer),
    ) -> Result<PendingRead<T>> {
        let ((staging, submission), error) = self.scoped(|| {
            let staging = self.gpu.create_buffer(&wgpu::BufferDescriptor {
                label: Some("staging buffer"),
                size: staging_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .gpu
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("read-back encoder"),
                });
            record(&mut encoder, &staging);
            let submission = self.queue.submit(Some(encoder.finish()));
            (staging, submission)
        });
        if let Some((code, message)) = error {
            return Err(RuntimeError::transfer(code, message));
        }

        let (sender, receiver) = futures::channel::oneshot::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });

        if self.config.verbose {
            tracing::info!(bytes = staging_size, "read-back enqueued");
        }
        Ok(PendingRead {
            gpu: Arc::clone(&self.gpu),
            staging,
            submission,
            receiver,
            len,
            rows,
            _marker: PhantomData,
        })
    }

    pub(crate) fn check_context(&self, context: ContextId) {
        assert_eq!(
            context, self.context_id,
            "device object from {context} used in session {}",
            self.context_id
        );
    }
}

fn check_range(available: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= available => Ok(()),
        _ => Err(RuntimeError::transfer(
            ErrorCode::Validation,
            format!(
                "range {offset}..{} is outside a buffer of {available} elements",
                offset.saturating_add(len)
            ),
        )),
    }
}

fn check_region(image: &DeviceImage, region: &Region) -> Result<()> {
    let inside = |origin: u32, extent: u32, size: u32| {
        extent > 0 && origin.checked_add(extent).is_some_and(|end| end <= size)
    };
    if inside(region.origin[0], region.extent[0], image.width)
        && inside(region.origin[1], region.extent[1], image.height)
    {
        Ok(())
    } else {
        Err(RuntimeError::transfer(
            ErrorCode::Validation,
            format!(
                "region at {:?} of extent {:?} is outside a {}x{} image",
                region.origin, region.extent, image.width, image.height
            ),
        ))
    }
}

fn texel_copy<'a>(image: &'a DeviceImage, region: &Region) -> wgpu::TexelCopyTextureInfo<'a> {
    wgpu::TexelCopyTextureInfo {
        texture: &image.texture,
        mip_level: 0,
        origin: wgpu::Origin3d {
            x: region.origin[0],
            y: region.origin[1],
            z: 0,
        },
        aspect: wgpu::TextureAspect::All,
    }
}

fn extent(region: &Region) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: region.extent[0],
        height: region.extent[1],
        depth_or_array_layers: 1,
    }
}

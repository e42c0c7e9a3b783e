//! Device side collaborators: introspection, the flash image writer, the
//! restart primitive and the update lifecycle notifier.

use anyhow::{Context, Result, bail, ensure};
use log::{error, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tokio::sync::broadcast;

/// First byte of every valid firmware image.
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Signals the device sends to the rest of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceSignal {
    /// Bridge endpoints must release their UDP sockets
    StopListeners,
    Restart,
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DeviceControl: Send {
    /// Bytes available for a new firmware image
    fn free_sketch_space(&self) -> u32;
    fn free_heap(&self) -> u32;
    /// Index into the flash size map table
    fn flash_size_map(&self) -> usize;
    fn flash_chip_id(&self) -> u32;
    fn stop_udp_listeners(&mut self);
    /// Open the image writer for at most `max_size` bytes
    fn begin_image(&mut self, max_size: u32) -> Result<()>;
    /// Append to the open image, returning the number of bytes accepted
    fn write_image(&mut self, data: &[u8]) -> usize;
    /// Close the open image, checking its integrity if `verify` is set
    fn end_image(&mut self, verify: bool) -> Result<()>;
    fn restart(&self);
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait UpdateNotifier: Send {
    fn update_started(&mut self);
    fn update_completed(&mut self);
    fn update_error(&mut self);
}

#[derive(Default)]
pub struct LogUpdateNotifier;

impl UpdateNotifier for LogUpdateNotifier {
    fn update_started(&mut self) {
        info!("firmware update started");
    }

    fn update_completed(&mut self) {
        info!("firmware update completed");
    }

    fn update_error(&mut self) {
        error!("firmware update chunk failed");
    }
}

#[derive(Clone, Debug)]
pub struct HostDeviceConfig {
    pub image_path: PathBuf,
    pub free_sketch_space: u32,
    pub flash_size_map: usize,
    pub flash_chip_id: u32,
}

struct PendingImage {
    file: File,
    path: PathBuf,
    max_size: u32,
    written: u32,
    first_byte: Option<u8>,
}

/// Device implementation for a Linux host
///
/// Firmware images are written next to their final location and renamed
/// into place once verified. Restarts and listener shutdowns are broadcast
/// as [`DeviceSignal`]s.
pub struct HostDevice {
    config: HostDeviceConfig,
    signals: broadcast::Sender<DeviceSignal>,
    image: Option<PendingImage>,
}

impl HostDevice {
    pub fn new(config: HostDeviceConfig, signals: broadcast::Sender<DeviceSignal>) -> Self {
        Self {
            config,
            signals,
            image: None,
        }
    }

    pub fn image_path(&self) -> &Path {
        &self.config.image_path
    }

    fn signal(&self, signal: DeviceSignal) {
        if let Err(e) = self.signals.send(signal) {
            error!("failed to send {signal:?}: {e}");
        }
    }

    fn discard(image: PendingImage) {
        drop(image.file);
        if let Err(e) = fs::remove_file(&image.path) {
            warn!("failed to remove partial image {:?}: {e}", image.path);
        }
    }

    fn verify(image: &PendingImage) -> Result<()> {
        ensure!(image.written > 0, "failed to verify image: empty");
        ensure!(
            image.written <= image.max_size,
            "failed to verify image: {} bytes exceed {}",
            image.written,
            image.max_size
        );
        ensure!(
            image.first_byte == Some(IMAGE_MAGIC),
            "failed to verify image: wrong magic byte {:#04x?}",
            image.first_byte
        );
        Ok(())
    }
}

impl DeviceControl for HostDevice {
    fn free_sketch_space(&self) -> u32 {
        self.config.free_sketch_space
    }

    fn free_heap(&self) -> u32 {
        let Ok(meminfo) = fs::read_to_string("/proc/meminfo") else {
            return 0;
        };

        meminfo
            .lines()
            .find_map(|line| line.strip_prefix("MemAvailable:"))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
            .map(|kib| u32::try_from(kib.saturating_mul(1024)).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    fn flash_size_map(&self) -> usize {
        self.config.flash_size_map
    }

    fn flash_chip_id(&self) -> u32 {
        self.config.flash_chip_id
    }

    fn stop_udp_listeners(&mut self) {
        info!("stopping udp listeners");
        self.signal(DeviceSignal::StopListeners);
    }

    fn begin_image(&mut self, max_size: u32) -> Result<()> {
        if let Some(previous) = self.image.take() {
            warn!("discarding unfinished image");
            Self::discard(previous);
        }

        if max_size == 0 {
            bail!("failed to begin image: no space available");
        }

        if let Some(parent) = self.config.image_path.parent() {
            fs::create_dir_all(parent).context("failed to create image directory")?;
        }

        let path = self.config.image_path.with_extension("part");
        let file = File::create(&path).context(format!("failed to create image file: {path:?}"))?;

        info!("begin image of at most {max_size} bytes");

        self.image = Some(PendingImage {
            file,
            path,
            max_size,
            written: 0,
            first_byte: None,
        });

        Ok(())
    }

    fn write_image(&mut self, data: &[u8]) -> usize {
        let Some(image) = self.image.as_mut() else {
            error!("write_image() without open image");
            return 0;
        };

        let remaining = (image.max_size - image.written) as usize;
        let accepted = &data[..data.len().min(remaining)];

        if let Err(e) = image.file.write_all(accepted) {
            error!("failed to write image: {e}");
            return 0;
        }

        if image.first_byte.is_none() {
            image.first_byte = accepted.first().copied();
        }
        image.written += accepted.len() as u32;

        accepted.len()
    }

    fn end_image(&mut self, verify: bool) -> Result<()> {
        let Some(mut image) = self.image.take() else {
            bail!("failed to end image: no image open");
        };

        let result = (|| -> Result<()> {
            image.file.flush().context("failed to flush image")?;
            image.file.sync_all().context("failed to sync image")?;

            if verify {
                Self::verify(&image)?;
            }

            fs::rename(&image.path, &self.config.image_path)
                .context("failed to move image into place")
        })();

        match result {
            Ok(()) => {
                info!(
                    "image of {} bytes stored at {:?}",
                    image.written, self.config.image_path
                );
                Ok(())
            }
            Err(e) => {
                Self::discard(image);
                Err(e)
            }
        }
    }

    fn restart(&self) {
        info!("restart requested");
        self.signal(DeviceSignal::Restart);
    }
}

//! Firmware update state machine
//!
//! An upload arrives as a sequence of chunk events. Each event is handled
//! on its own so the server keeps serving other requests between chunks.

use crate::device::{DeviceControl, UpdateNotifier};
use anyhow::{Context, Result, bail, ensure};
use log::{debug, error, info};
use std::fmt;

/// Space kept free behind the new image.
const IMAGE_SAFETY_MARGIN: u32 = 0x1000;
/// Images are sized in whole flash sectors.
const IMAGE_ALIGNMENT_MASK: u32 = 0xFFFF_F000;

/// Whether the device restarts once an upload request completes.
pub const UPLOAD_RESTART_POLICY: RestartPolicy = RestartPolicy::Always;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart after failed uploads as well, so the bridge comes back with
    /// its sockets after they were stopped for the upload
    Always,
    OnSuccess,
}

impl RestartPolicy {
    pub fn restart_required(self, success: bool) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnSuccess => success,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum UploadStage {
    #[default]
    Idle,
    Receiving {
        max_size: u32,
        written: usize,
    },
    Success {
        written: usize,
    },
    Error,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStage::Idle => write!(f, "idle"),
            UploadStage::Receiving { written, .. } => write!(f, "receiving ({written} bytes)"),
            UploadStage::Success { written } => write!(f, "success ({written} bytes)"),
            UploadStage::Error => write!(f, "error"),
        }
    }
}

pub enum UploadEvent<'a> {
    Start { filename: &'a str },
    Write(&'a [u8]),
    End,
}

impl fmt::Display for UploadEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadEvent::Start { filename } => write!(f, "start of {filename}"),
            UploadEvent::Write(data) => write!(f, "write of {} bytes", data.len()),
            UploadEvent::End => write!(f, "end"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub restart: bool,
}

impl UploadOutcome {
    pub fn body(&self) -> &'static str {
        if self.success { "OK" } else { "FAIL" }
    }
}

/// Largest image that fits into `free_space`
pub fn max_image_size(free_space: u32) -> u32 {
    free_space.saturating_sub(IMAGE_SAFETY_MARGIN) & IMAGE_ALIGNMENT_MASK
}

#[derive(Default)]
pub struct FirmwareUpdate {
    stage: UploadStage,
    announced: bool,
}

impl FirmwareUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> &UploadStage {
        &self.stage
    }

    /// Feed one upload event into the state machine
    pub fn handle(
        &mut self,
        event: UploadEvent<'_>,
        device: &mut dyn DeviceControl,
        notifier: &mut dyn UpdateNotifier,
    ) -> &UploadStage {
        if !self.announced {
            self.announced = true;
            notifier.update_started();
        }

        let current = std::mem::take(&mut self.stage);

        self.stage = match Self::transition(current, event, device) {
            Ok(next) => next,
            Err(e) => {
                error!("firmware upload failed: {e:#}");
                notifier.update_error();
                UploadStage::Error
            }
        };

        &self.stage
    }

    /// Close the upload request, leaving the machine idle for the next one
    pub fn finish(&mut self, notifier: &mut dyn UpdateNotifier) -> UploadOutcome {
        let stage = std::mem::take(&mut self.stage);
        let success = matches!(stage, UploadStage::Success { .. });

        info!("firmware upload finished: {stage}");

        if success {
            notifier.update_completed();
        }

        UploadOutcome {
            success,
            restart: UPLOAD_RESTART_POLICY.restart_required(success),
        }
    }

    fn transition(
        current: UploadStage,
        event: UploadEvent<'_>,
        device: &mut dyn DeviceControl,
    ) -> Result<UploadStage> {
        match (current, event) {
            (_, UploadEvent::Start { filename }) => {
                info!("firmware upload started: {filename}");
                device.stop_udp_listeners();

                let max_size = max_image_size(device.free_sketch_space());
                device
                    .begin_image(max_size)
                    .context("failed to begin image")?;

                Ok(UploadStage::Receiving {
                    max_size,
                    written: 0,
                })
            }
            (UploadStage::Receiving { max_size, written }, UploadEvent::Write(data)) => {
                let accepted = device.write_image(data);
                debug!("firmware chunk: {accepted}/{} bytes", data.len());

                ensure!(
                    accepted == data.len(),
                    "failed to write image: {accepted} of {} bytes accepted",
                    data.len()
                );

                Ok(UploadStage::Receiving {
                    max_size,
                    written: written + accepted,
                })
            }
            (UploadStage::Receiving { written, .. }, UploadEvent::End) => {
                device
                    .end_image(true)
                    .context("failed to finalize image")?;

                Ok(UploadStage::Success { written })
            }
            (stage, event) => bail!("unexpected {event} while {stage}"),
        }
    }
}

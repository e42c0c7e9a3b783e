//! Telemetry and system status reports
//!
//! Serves the HTML status page and the `info.json`, `status.json` and
//! `log.json` documents. Free flash space and the parameter checksum are
//! cached until the parameters change.

use crate::{
    device::DeviceControl,
    link_status::{LinkStatus, LinkStatusProvider},
    log_buffer::LogProvider,
    services::parameters::ParameterStore,
};
use log::debug;
use serde::Serialize;
use std::fmt::Write;

const FLASH_MAPS: [&str; 7] = [
    "512KB (256/256)",
    "256KB",
    "1MB (512/512)",
    "2MB (512/512)",
    "4MB (512/512)",
    "2MB (1024/1024)",
    "4MB (1024/1024)",
];

#[derive(Debug, Default)]
pub struct StatusCache {
    flash_free: Option<u32>,
    param_crc: Option<String>,
}

impl StatusCache {
    pub fn flash_free(&mut self, device: &dyn DeviceControl) -> u32 {
        *self
            .flash_free
            .get_or_insert_with(|| device.free_sketch_space())
    }

    pub fn param_crc(&mut self, store: &dyn ParameterStore) -> &str {
        self.param_crc
            .get_or_insert_with(|| format!("{:08X}", store.checksum()))
    }

    /// Drop cached values after the parameters were persisted
    pub fn invalidate(&mut self) {
        debug!("status cache invalidated");
        self.flash_free = None;
        self.param_crc = None;
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub size: String,
    pub id: String,
    pub flashfree: String,
    pub heapfree: String,
    pub logsize: String,
    pub paramcrc: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct LiveStatus {
    pub gpackets: String,
    pub gsent: String,
    pub glost: String,
    pub vpackets: String,
    pub vsent: String,
    pub vlost: String,
    pub radio: String,
    pub buffer: String,
}

impl LiveStatus {
    fn new(gcs: &LinkStatus, vehicle: &LinkStatus) -> Self {
        Self {
            gpackets: gcs.packets_received.to_string(),
            gsent: gcs.packets_sent.to_string(),
            glost: gcs.packets_lost.to_string(),
            vpackets: vehicle.packets_received.to_string(),
            vsent: vehicle.packets_sent.to_string(),
            vlost: vehicle.packets_lost.to_string(),
            radio: gcs.radio_status_sent.to_string(),
            buffer: vehicle.queue_status.to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct LogJson {
    /// Length of `text` in bytes. `start` is a byte position in the log,
    /// so `start + len` is where the next poll continues.
    pub len: usize,
    pub start: u64,
    pub text: String,
}

pub fn flash_map_label(index: usize) -> &'static str {
    FLASH_MAPS.get(index).copied().unwrap_or("unknown")
}

/// Manufacturer byte and device id of a SPI flash JEDEC id
pub fn flash_chip_label(fid: u32) -> String {
    format!(
        "0x{:02X} 0x{:04X}",
        fid & 0xff,
        (fid & 0xff00) | ((fid >> 16) & 0xff)
    )
}

pub struct StatusService;

impl StatusService {
    pub fn status_page(
        cache: &mut StatusCache,
        store: &dyn ParameterStore,
        device: &dyn DeviceControl,
        gcs: &dyn LinkStatusProvider,
        vehicle: &dyn LinkStatusProvider,
    ) -> String {
        let gcs = gcs.status();
        let vehicle = vehicle.status();
        let mut body = String::with_capacity(1024);

        body.push_str("<p>Comm Status</p><table>");
        let comm = [
            ("Packets Received from GCS", gcs.packets_received),
            ("Packets Sent to GCS", gcs.packets_sent),
            ("GCS Packets Lost", gcs.packets_lost),
            ("Packets Received from Vehicle", vehicle.packets_received),
            ("Packets Sent to Vehicle", vehicle.packets_sent),
            ("Vehicle Packets Lost", vehicle.packets_lost),
            ("Radio Messages", gcs.radio_status_sent),
        ];
        push_rows(&mut body, comm.iter().map(|(label, v)| (*label, v.to_string())));
        body.push_str("</table>");

        body.push_str("<p>System Status</p><table>");
        let system = [
            ("Flash Memory Left", cache.flash_free(device).to_string()),
            ("RAM Left", device.free_heap().to_string()),
            ("Parameters CRC", cache.param_crc(store).to_string()),
        ];
        push_rows(&mut body, system.into_iter());
        body.push_str("</table>");

        body
    }

    pub fn system_info(
        cache: &mut StatusCache,
        store: &dyn ParameterStore,
        device: &dyn DeviceControl,
        log: &dyn LogProvider,
    ) -> SystemInfo {
        SystemInfo {
            size: flash_map_label(device.flash_size_map()).to_string(),
            id: flash_chip_label(device.flash_chip_id()),
            flashfree: cache.flash_free(device).to_string(),
            heapfree: device.free_heap().to_string(),
            logsize: log.position().to_string(),
            paramcrc: cache.param_crc(store).to_string(),
        }
    }

    pub fn live_status(
        gcs: &dyn LinkStatusProvider,
        vehicle: &dyn LinkStatusProvider,
        reset: bool,
    ) -> LiveStatus {
        if reset {
            debug!("link counters reset");
            gcs.reset();
            vehicle.reset();
        }

        LiveStatus::new(&gcs.status(), &vehicle.status())
    }

    pub fn log_excerpt(log: &dyn LogProvider, position: u64) -> LogJson {
        let excerpt = log.get_log(position);

        LogJson {
            len: excerpt.text.len(),
            start: excerpt.start,
            text: excerpt.text,
        }
    }
}

fn push_rows(body: &mut String, rows: impl Iterator<Item = (&'static str, String)>) {
    for (i, (label, value)) in rows.enumerate() {
        // first column width is set once per table
        let width = if i == 0 { " width=\"240\"" } else { "" };
        let _ = write!(body, "<tr><td{width}>{label}</td><td>{value}</td></tr>");
    }
}

//! Device parameter record and its persistent store.
//!
//! The store keeps the live record in memory. Edits are applied directly to
//! that record and only reach the backing INI file through
//! [`ParameterStore::persist_all`].

use anyhow::{Context, Result, anyhow};
use ini::{EscapePolicy, Ini, ParseOption, WriteOption};
use log::{debug, info};
use std::{
    fmt, fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    str::FromStr,
};

const SYSTEM_SECTION: &str = "system";
const ACCESS_POINT_SECTION: &str = "access_point";
const STATION_SECTION: &str = "station";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum WifiMode {
    #[default]
    AccessPoint = 0,
    Station = 1,
}

impl WifiMode {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(WifiMode::AccessPoint),
            1 => Some(WifiMode::Station),
            _ => None,
        }
    }
}

impl fmt::Display for WifiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// All configuration of the bridge, including the web login credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameters {
    pub web_account: String,
    pub web_password: String,

    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_channel: u8,
    /// UDP port the bridge listens on in access-point mode (`hport`)
    pub ap_udp_port: u16,

    pub sta_ssid: String,
    pub sta_password: String,
    pub sta_ip: Ipv4Addr,
    pub sta_gateway: Ipv4Addr,
    pub sta_subnet: Ipv4Addr,
    /// UDP port the bridge talks to in station mode (`cport`)
    pub sta_udp_port: u16,

    pub uart_baud_rate: u32,
    pub debug_enabled: bool,
    pub wifi_mode: WifiMode,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            web_account: "admin".to_string(),
            web_password: "admin1234".to_string(),
            ap_ssid: "BridgeAP".to_string(),
            ap_password: "bridge1234".to_string(),
            ap_channel: 11,
            ap_udp_port: 14550,
            sta_ssid: "BridgeSTA".to_string(),
            sta_password: "bridge1234".to_string(),
            sta_ip: Ipv4Addr::UNSPECIFIED,
            sta_gateway: Ipv4Addr::UNSPECIFIED,
            sta_subnet: Ipv4Addr::UNSPECIFIED,
            sta_udp_port: 14555,
            uart_baud_rate: 921_600,
            debug_enabled: false,
            wifi_mode: WifiMode::AccessPoint,
        }
    }
}

impl Parameters {
    /// CRC-32 over every field, in declaration order.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();

        for text in [
            &self.web_account,
            &self.web_password,
            &self.ap_ssid,
            &self.ap_password,
            &self.sta_ssid,
            &self.sta_password,
        ] {
            hasher.update(text.as_bytes());
            hasher.update(&[0]);
        }

        hasher.update(&[self.ap_channel]);
        hasher.update(&self.ap_udp_port.to_le_bytes());
        hasher.update(&self.sta_ip.octets());
        hasher.update(&self.sta_gateway.octets());
        hasher.update(&self.sta_subnet.octets());
        hasher.update(&self.sta_udp_port.to_le_bytes());
        hasher.update(&self.uart_baud_rate.to_le_bytes());
        hasher.update(&[self.debug_enabled as u8, self.wifi_mode as u8]);

        hasher.finalize()
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();

        ini.with_section(Some(SYSTEM_SECTION))
            .set("webaccount", quoted(&self.web_account))
            .set("webpassword", quoted(&self.web_password))
            .set("baud", self.uart_baud_rate.to_string())
            .set("debug", (self.debug_enabled as u8).to_string())
            .set("mode", self.wifi_mode.to_string());

        ini.with_section(Some(ACCESS_POINT_SECTION))
            .set("ssid", quoted(&self.ap_ssid))
            .set("pwd", quoted(&self.ap_password))
            .set("channel", self.ap_channel.to_string())
            .set("hport", self.ap_udp_port.to_string());

        ini.with_section(Some(STATION_SECTION))
            .set("ssidsta", quoted(&self.sta_ssid))
            .set("pwdsta", quoted(&self.sta_password))
            .set("ipsta", self.sta_ip.to_string())
            .set("gatewaysta", self.sta_gateway.to_string())
            .set("subnetsta", self.sta_subnet.to_string())
            .set("cport", self.sta_udp_port.to_string());

        ini
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let defaults = Self::default();

        let mode: i64 = read_value(ini, SYSTEM_SECTION, "mode", defaults.wifi_mode as i64)?;
        let debug: u8 = read_value(ini, SYSTEM_SECTION, "debug", defaults.debug_enabled as u8)?;

        Ok(Self {
            web_account: read_value(ini, SYSTEM_SECTION, "webaccount", defaults.web_account)?,
            web_password: read_value(ini, SYSTEM_SECTION, "webpassword", defaults.web_password)?,
            uart_baud_rate: read_value(ini, SYSTEM_SECTION, "baud", defaults.uart_baud_rate)?,
            debug_enabled: debug != 0,
            wifi_mode: WifiMode::from_index(mode)
                .ok_or_else(|| anyhow!("failed to parse wifi mode: {mode}"))?,
            ap_ssid: read_value(ini, ACCESS_POINT_SECTION, "ssid", defaults.ap_ssid)?,
            ap_password: read_value(ini, ACCESS_POINT_SECTION, "pwd", defaults.ap_password)?,
            ap_channel: read_value(ini, ACCESS_POINT_SECTION, "channel", defaults.ap_channel)?,
            ap_udp_port: read_value(ini, ACCESS_POINT_SECTION, "hport", defaults.ap_udp_port)?,
            sta_ssid: read_value(ini, STATION_SECTION, "ssidsta", defaults.sta_ssid)?,
            sta_password: read_value(ini, STATION_SECTION, "pwdsta", defaults.sta_password)?,
            sta_ip: read_value(ini, STATION_SECTION, "ipsta", defaults.sta_ip)?,
            sta_gateway: read_value(ini, STATION_SECTION, "gatewaysta", defaults.sta_gateway)?,
            sta_subnet: read_value(ini, STATION_SECTION, "subnetsta", defaults.sta_subnet)?,
            sta_udp_port: read_value(ini, STATION_SECTION, "cport", defaults.sta_udp_port)?,
        })
    }
}

/// Wraps a text value in double quotes so the parser keeps surrounding
/// whitespace, quotes and comment characters. Only the escapes the parser
/// decodes inside quotes are produced.
fn quoted(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn read_value<T>(ini: &Ini, section: &str, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match ini.section(Some(section)).and_then(|s| s.get(key)) {
        Some(value) => value
            .parse::<T>()
            .context(format!("failed to parse parameter {section}.{key}: {value:?}")),
        None => Ok(default),
    }
}

/// Owner of the process-wide parameter record.
pub trait ParameterStore: Send {
    fn parameters(&self) -> &Parameters;
    fn parameters_mut(&mut self) -> &mut Parameters;
    /// Write the whole record to the backing medium.
    fn persist_all(&mut self) -> Result<()>;

    fn checksum(&self) -> u32 {
        self.parameters().checksum()
    }
}

/// Parameter store backed by an INI file.
pub struct IniParameterStore {
    path: PathBuf,
    parameters: Parameters,
}

impl IniParameterStore {
    /// Load parameters from `path`, falling back to defaults if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let parameters = if path
            .try_exists()
            .context(format!("failed to check parameter file: {path:?}"))?
        {
            let ini = Ini::load_from_file_opt(&path, ParseOption::default())
                .context(format!("failed to load parameter file: {path:?}"))?;
            Parameters::from_ini(&ini)?
        } else {
            info!("no parameter file at {path:?}, using defaults");
            Parameters::default()
        };

        Ok(Self { path, parameters })
    }
}

impl ParameterStore for IniParameterStore {
    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    fn persist_all(&mut self) -> Result<()> {
        debug!("persist_all() called");

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("failed to create parameter directory")?;
        }

        let temp_file_path = self.path.with_extension("tmp");

        self.parameters
            .to_ini()
            .write_to_file_opt(
                &temp_file_path,
                WriteOption {
                    escape_policy: EscapePolicy::Nothing,
                    ..Default::default()
                },
            )
            .context(format!("failed to write parameter file: {temp_file_path:?}"))?;

        fs::rename(&temp_file_path, &self.path).context("failed to replace parameter file")?;

        info!("parameters persisted to {:?}", self.path);
        Ok(())
    }
}

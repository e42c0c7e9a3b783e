use anyhow::{Context, Result};
use std::{env, path::PathBuf, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Web server configuration
    pub ui: UiConfig,

    /// Persistent storage locations
    pub paths: PathConfig,

    /// Properties of the device the bridge runs on
    pub device: DeviceConfig,

    /// Size of the in-memory log served by `/log.json`
    pub log_buffer_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub port: u16,
    /// Delay between answering a request and restarting the device
    pub restart_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub parameters_file: PathBuf,
    pub firmware_image: PathBuf,
}

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub firmware_space_bytes: u32,
    pub flash_size_map: usize,
    pub flash_chip_id: u32,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// On first call the configuration is loaded from environment variables,
    /// later calls return the cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. The application cannot run
    /// without a valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    fn load_internal() -> Result<Self> {
        let ui = UiConfig::load()?;
        let paths = PathConfig::load()?;
        let device = DeviceConfig::load()?;
        let log_buffer_bytes = parse_var("LOG_BUFFER_BYTES", 1024)?;

        Ok(Self {
            ui,
            paths,
            device,
            log_buffer_bytes,
        })
    }
}

impl UiConfig {
    fn load() -> Result<Self> {
        let port = parse_var("UI_PORT", 80)?;
        let restart_delay = Duration::from_millis(parse_var("RESTART_DELAY_MS", 100)?);

        Ok(Self {
            port,
            restart_delay,
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let parameters_file = env::var("PARAMETERS_PATH")
            .unwrap_or_else(|_| "/data/config/parameters.ini".to_string())
            .into();

        let firmware_image = env::var("FIRMWARE_IMAGE_PATH")
            .unwrap_or_else(|_| "/data/firmware.bin".to_string())
            .into();

        Ok(Self {
            parameters_file,
            firmware_image,
        })
    }
}

impl DeviceConfig {
    fn load() -> Result<Self> {
        let firmware_space_bytes = parse_var("FIRMWARE_SPACE_BYTES", 1024 * 1024)?;
        let flash_size_map = parse_var("FLASH_SIZE_MAP", 4)?;
        let flash_chip_id = match env::var("FLASH_CHIP_ID") {
            Ok(value) => parse_chip_id(&value)?,
            Err(_) => 0x1640E0,
        };

        Ok(Self {
            firmware_space_bytes,
            flash_size_map,
            flash_chip_id,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(default),
    }
}

/// Accepts decimal or `0x` prefixed hexadecimal ids
fn parse_chip_id(value: &str) -> Result<u32> {
    let value = value.trim();

    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    }
    .context("failed to parse FLASH_CHIP_ID: invalid format")
}

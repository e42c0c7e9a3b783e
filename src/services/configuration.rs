//! Batch configuration edits
//!
//! Applies the fields of a `/setparameters` request to the live parameter
//! record and decides which configuration view confirms the change.

use crate::{
    args::{RequestArgs, to_int},
    services::parameters::{Parameters, WifiMode},
};
use log::{debug, warn};
use std::{collections::BTreeSet, net::Ipv4Addr};
use thiserror::Error;

const MIN_WIFI_PASSWORD_LEN: usize = 8;

/// Message used for rejected edits.
pub const BAD_ARGUMENT: &str = "BAD ARGS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no parameters given")]
    NoArguments,

    #[error("no known parameter given")]
    NoKnownField,

    #[error("invalid value for '{field}': {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// Configuration view a field belongs to.
///
/// Ordering is the precedence used when a batch touches several views:
/// the greatest category wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigCategory {
    AccessPoint,
    Station,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Baud,
    ApPassword,
    ApSsid,
    StaPassword,
    StaSsid,
    StaIp,
    StaGateway,
    StaSubnet,
    StaPort,
    ApPort,
    Channel,
    Debug,
    Mode,
    WebAccount,
    WebPassword,
}

impl Field {
    /// Processing order of a batch
    const ALL: [Field; 15] = [
        Field::Baud,
        Field::ApPassword,
        Field::ApSsid,
        Field::StaPassword,
        Field::StaSsid,
        Field::StaIp,
        Field::StaGateway,
        Field::StaSubnet,
        Field::StaPort,
        Field::ApPort,
        Field::Channel,
        Field::Debug,
        Field::Mode,
        Field::WebAccount,
        Field::WebPassword,
    ];

    fn name(self) -> &'static str {
        match self {
            Field::Baud => "baud",
            Field::ApPassword => "pwd",
            Field::ApSsid => "ssid",
            Field::StaPassword => "pwdsta",
            Field::StaSsid => "ssidsta",
            Field::StaIp => "ipsta",
            Field::StaGateway => "gatewaysta",
            Field::StaSubnet => "subnetsta",
            Field::StaPort => "cport",
            Field::ApPort => "hport",
            Field::Channel => "channel",
            Field::Debug => "debug",
            Field::Mode => "mode",
            Field::WebAccount => "webaccount",
            Field::WebPassword => "webpassword",
        }
    }

    fn category(self) -> ConfigCategory {
        match self {
            Field::Baud | Field::Debug | Field::Mode | Field::WebAccount | Field::WebPassword => {
                ConfigCategory::System
            }
            Field::ApPassword | Field::ApSsid | Field::ApPort | Field::Channel => {
                ConfigCategory::AccessPoint
            }
            Field::StaPassword
            | Field::StaSsid
            | Field::StaIp
            | Field::StaGateway
            | Field::StaSubnet
            | Field::StaPort => ConfigCategory::Station,
        }
    }

    fn apply(self, parameters: &mut Parameters, value: &str) -> Result<(), ConfigError> {
        match self {
            Field::Baud => parameters.uart_baud_rate = self.number(value)?,
            Field::ApPassword => parameters.ap_password = self.wifi_password(value)?,
            Field::ApSsid => parameters.ap_ssid = value.to_string(),
            Field::StaPassword => parameters.sta_password = self.wifi_password(value)?,
            Field::StaSsid => parameters.sta_ssid = value.to_string(),
            Field::StaIp => parameters.sta_ip = self.address(value)?,
            Field::StaGateway => parameters.sta_gateway = self.address(value)?,
            Field::StaSubnet => parameters.sta_subnet = self.address(value)?,
            Field::StaPort => parameters.sta_udp_port = self.number(value)?,
            Field::ApPort => parameters.ap_udp_port = self.number(value)?,
            Field::Channel => parameters.ap_channel = self.number(value)?,
            Field::Debug => parameters.debug_enabled = to_int(value) != 0,
            Field::Mode => {
                parameters.wifi_mode = WifiMode::from_index(to_int(value))
                    .ok_or_else(|| self.invalid(format!("unknown mode {value:?}")))?
            }
            Field::WebAccount => parameters.web_account = self.not_empty(value)?,
            Field::WebPassword => parameters.web_password = self.not_empty(value)?,
        }

        Ok(())
    }

    fn invalid(self, message: String) -> ConfigError {
        ConfigError::InvalidField {
            field: self.name(),
            message,
        }
    }

    fn wifi_password(self, value: &str) -> Result<String, ConfigError> {
        if value.chars().count() < MIN_WIFI_PASSWORD_LEN {
            return Err(self.invalid(format!(
                "password must have at least {MIN_WIFI_PASSWORD_LEN} characters"
            )));
        }
        Ok(value.to_string())
    }

    fn address(self, value: &str) -> Result<Ipv4Addr, ConfigError> {
        value
            .trim()
            .parse()
            .map_err(|_| self.invalid(format!("{value:?} is not an IPv4 address")))
    }

    fn number<T: std::str::FromStr>(self, value: &str) -> Result<T, ConfigError> {
        value
            .trim()
            .parse()
            .map_err(|_| self.invalid(format!("{value:?} is not a valid number")))
    }

    fn not_empty(self, value: &str) -> Result<String, ConfigError> {
        if value.is_empty() {
            return Err(self.invalid("must not be empty".to_string()));
        }
        Ok(value.to_string())
    }
}

/// Summary of an accepted batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditSummary {
    pub categories: BTreeSet<ConfigCategory>,
    pub reboot: bool,
}

impl EditSummary {
    /// View confirming the batch, `None` if no configuration field was touched
    pub fn view(&self) -> Option<ConfigCategory> {
        self.categories.last().copied()
    }
}

pub struct ConfigurationService;

impl ConfigurationService {
    /// Apply every recognized field of `args` to `parameters`
    ///
    /// Each field is written as soon as it validates. A rejected field fails
    /// the whole batch, but fields written before or after it stay written:
    /// the caller only persists successful batches. A batch naming neither a
    /// known field nor `reboot` is rejected.
    pub fn apply_edits(
        parameters: &mut Parameters,
        args: &RequestArgs,
    ) -> Result<EditSummary, ConfigError> {
        debug!("apply_edits() called with {} arguments", args.len());

        if args.is_empty() {
            return Err(ConfigError::NoArguments);
        }

        let mut summary = EditSummary::default();
        let mut first_error = None;
        let mut known = false;

        for field in Field::ALL {
            let Some(value) = args.get(field.name()) else {
                continue;
            };
            known = true;

            match field.apply(parameters, value) {
                Ok(()) => {
                    summary.categories.insert(field.category());
                }
                Err(e) => {
                    warn!("rejected edit: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let reboot = args.get("reboot");
        if !known && reboot.is_none() {
            return Err(ConfigError::NoKnownField);
        }
        summary.reboot = reboot == Some("1");

        Ok(summary)
    }
}

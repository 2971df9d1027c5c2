//! Device catalogue
//!
//! Identifies the supported earbud models by the 4-character codename the
//! firmware reports, and defines the opaque handle the coordinator passes to
//! the transport.

use std::fmt;

/// Known earbud models, keyed by firmware codename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceModel {
    #[default]
    Unknown,
    Ear1,
    EarStick,
    Ear2,
    CmfBudsPro,
    Ear,
    CmfBudsPro2,
    CmfBuds,
    EarOpen,
    EarA,
    Ear3,
}

impl DeviceModel {
    /// All models with a real codename
    pub const KNOWN: [DeviceModel; 10] = [
        DeviceModel::Ear1,
        DeviceModel::EarStick,
        DeviceModel::Ear2,
        DeviceModel::CmfBudsPro,
        DeviceModel::Ear,
        DeviceModel::CmfBudsPro2,
        DeviceModel::CmfBuds,
        DeviceModel::EarOpen,
        DeviceModel::EarA,
        DeviceModel::Ear3,
    ];

    /// Firmware codename for this model
    pub fn codename(&self) -> &'static str {
        match self {
            DeviceModel::Unknown => "0000",
            DeviceModel::Ear1 => "B181",
            DeviceModel::EarStick => "B157",
            DeviceModel::Ear2 => "B155",
            DeviceModel::CmfBudsPro => "B163",
            DeviceModel::Ear => "B171",
            DeviceModel::CmfBudsPro2 => "B172",
            DeviceModel::CmfBuds => "B168",
            DeviceModel::EarOpen => "B174",
            DeviceModel::EarA => "B162",
            DeviceModel::Ear3 => "B173",
        }
    }

    /// Look up a model by codename. Unrecognised codenames map to `Unknown`.
    pub fn from_codename(codename: &str) -> Self {
        let codename = codename.trim();
        Self::KNOWN
            .into_iter()
            .find(|model| model.codename().eq_ignore_ascii_case(codename))
            .unwrap_or(DeviceModel::Unknown)
    }

    /// Human-readable product name
    pub fn display_name(&self) -> &'static str {
        match self {
            // Older firmware reports no codename; those units are ear (1)
            DeviceModel::Unknown | DeviceModel::Ear1 => "ear (1)",
            DeviceModel::EarStick => "ear (stick)",
            DeviceModel::Ear2 => "ear (2)",
            DeviceModel::CmfBudsPro => "CMF Buds Pro",
            DeviceModel::Ear => "ear",
            DeviceModel::CmfBudsPro2 => "CMF Buds Pro 2",
            DeviceModel::CmfBuds => "CMF Buds",
            DeviceModel::EarOpen => "ear (open)",
            DeviceModel::EarA => "ear (a)",
            DeviceModel::Ear3 => "ear (3)",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Opaque handle to the saved primary device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Bluetooth MAC address, `XX:XX:XX:XX:XX:XX`
    pub address: String,
    /// User-visible name, if the directory knows one
    pub name: Option<String>,
    pub model: DeviceModel,
}

impl DeviceHandle {
    pub fn new(address: impl Into<String>, model: DeviceModel) -> Self {
        Self {
            address: address.into(),
            name: None,
            model,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} [{}] ({})", name, self.model, self.address),
            None => write!(f, "{} ({})", self.model, self.address),
        }
    }
}

/// Check that `address` is a colon-separated 6-byte MAC address
pub fn is_valid_address(address: &str) -> bool {
    let octets: Vec<&str> = address.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use super::{AddressableLatch, Device, SampleChip, ScriptedMaster};
use crate::map::AddressMap;
use crate::memory::MemoryStore;
use crate::ConfigError;

/// Value supplied for a device option.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OptionValue {
    /// Signed integer.
    Integer(i64),
    /// Free text or one of a fixed set of words.
    Text(String),
    /// Flag.
    Bool(bool),
}

impl OptionValue {
    const fn kind_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Bool(_) => "bool",
        }
    }
}

/// Accepted shape of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    /// Integer within `min..=max`.
    Integer {
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },
    /// Text; restricted to `choices` unless empty.
    Text {
        /// Accepted words.
        choices: &'static [&'static str],
    },
    /// Flag.
    Bool,
}

/// One option a device type accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionDecl {
    /// Option name.
    pub name: &'static str,
    /// Accepted shape.
    pub kind: OptionKind,
    /// Whether the option must be supplied.
    pub required: bool,
}

/// ROM region a device type needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RomRequirement {
    /// No ROM region is accepted.
    None,
    /// A region may be named; it must exist.
    Optional,
    /// A region of at least `min_size` bytes must be named.
    Required {
        /// Smallest accepted region size.
        min_size: usize,
    },
}

/// Everything a factory receives to build an instance.
#[derive(Debug)]
pub struct DeviceSetup<'a> {
    /// Instance tag.
    pub tag: &'a str,
    /// Clock in Hz.
    pub clock: u64,
    /// Validated options.
    pub options: &'a BTreeMap<String, OptionValue>,
    /// Contents of the configured ROM region.
    pub rom: Option<&'a [u8]>,
}

impl DeviceSetup<'_> {
    /// Integer option, when supplied.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.options.get(name) {
            Some(OptionValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    /// Text option, when supplied.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.options.get(name) {
            Some(OptionValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Flag option, when supplied.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.options.get(name) {
            Some(OptionValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    /// Wraps a factory-level failure as an option error.
    #[must_use]
    pub fn invalid(&self, option: &str, reason: String) -> ConfigError {
        ConfigError::InvalidOption {
            tag: self.tag.to_owned(),
            option: option.to_owned(),
            reason,
        }
    }
}

/// Factory signature of a device type.
pub type DeviceFactory = fn(&DeviceSetup<'_>) -> Result<Box<dyn Device>, ConfigError>;

/// Declared capabilities and requirements of a device type.
#[derive(Clone, Copy)]
pub struct DeviceType {
    /// Type name referenced by [`DeviceSpec::device_type`].
    pub name: &'static str,
    /// Accepted options.
    pub options: &'static [OptionDecl],
    /// Whether a non-zero clock is mandatory.
    pub needs_clock: bool,
    /// ROM region requirement.
    pub rom: RomRequirement,
    /// Exact number of address maps an instance masters.
    pub spaces: usize,
    /// Instance constructor.
    pub factory: DeviceFactory,
}

impl fmt::Debug for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceType")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("needs_clock", &self.needs_clock)
            .field("rom", &self.rom)
            .field("spaces", &self.spaces)
            .finish_non_exhaustive()
    }
}

/// Declarative device instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceSpec {
    /// Unique instance tag.
    pub tag: String,
    /// Registered type name.
    pub device_type: String,
    /// Clock in Hz; zero for unclocked glue.
    pub clock: u64,
    /// Options by name.
    pub options: BTreeMap<String, OptionValue>,
    /// Address maps the instance masters.
    pub maps: Vec<AddressMap>,
    /// ROM region handed to the factory.
    pub rom_region: Option<String>,
}

impl DeviceSpec {
    /// Creates an instance description without options or maps.
    #[must_use]
    pub fn new(tag: &str, device_type: &str, clock: u64) -> Self {
        Self {
            tag: tag.to_owned(),
            device_type: device_type.to_owned(),
            clock,
            options: BTreeMap::new(),
            maps: Vec::new(),
            rom_region: None,
        }
    }

    /// Sets an option.
    #[must_use]
    pub fn with_option(mut self, name: &str, value: OptionValue) -> Self {
        self.set_option(name, value);
        self
    }

    /// Adds a mastered address map.
    #[must_use]
    pub fn with_map(mut self, map: AddressMap) -> Self {
        self.maps.push(map);
        self
    }

    /// Names the instance's ROM region.
    #[must_use]
    pub fn with_rom_region(mut self, region: &str) -> Self {
        self.rom_region = Some(region.to_owned());
        self
    }

    /// Sets or replaces an option.
    pub fn set_option(&mut self, name: &str, value: OptionValue) {
        self.options.insert(name.to_owned(), value);
    }
}

/// Catalogue of instantiable device types.
#[derive(Debug, Clone)]
pub struct DeviceTypeRegistry {
    types: BTreeMap<&'static str, DeviceType>,
}

impl Default for DeviceTypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DeviceTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Creates a registry holding the built-in device types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for device_type in [
            ScriptedMaster::DEVICE_TYPE,
            AddressableLatch::DEVICE_TYPE,
            SampleChip::DEVICE_TYPE,
        ] {
            registry.types.insert(device_type.name, device_type);
        }
        registry
    }

    /// Adds a device type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateDeviceType`] when the name is taken.
    pub fn register(&mut self, device_type: DeviceType) -> Result<(), ConfigError> {
        if self.types.contains_key(device_type.name) {
            return Err(ConfigError::DuplicateDeviceType {
                type_name: device_type.name.to_owned(),
            });
        }
        self.types.insert(device_type.name, device_type);
        Ok(())
    }

    /// Looks up a type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DeviceType> {
        self.types.get(name)
    }

    /// Registered type names in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }

    /// Checks `spec` against its type: options, clock, map count and ROM region.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(
        &self,
        spec: &DeviceSpec,
        memory: &MemoryStore,
    ) -> Result<&DeviceType, ConfigError> {
        let device_type =
            self.get(&spec.device_type)
                .ok_or_else(|| ConfigError::UnknownDeviceType {
                    tag: spec.tag.clone(),
                    type_name: spec.device_type.clone(),
                })?;

        for (name, value) in &spec.options {
            let decl = device_type
                .options
                .iter()
                .find(|decl| decl.name == name)
                .ok_or_else(|| ConfigError::UnknownOption {
                    tag: spec.tag.clone(),
                    option: name.clone(),
                })?;
            check_option(&spec.tag, decl, value)?;
        }
        if let Some(missing) = device_type
            .options
            .iter()
            .find(|decl| decl.required && !spec.options.contains_key(decl.name))
        {
            return Err(ConfigError::MissingOption {
                tag: spec.tag.clone(),
                option: missing.name.to_owned(),
            });
        }

        if device_type.needs_clock && spec.clock == 0 {
            return Err(ConfigError::MissingClock {
                tag: spec.tag.clone(),
            });
        }
        if spec.maps.len() != device_type.spaces {
            return Err(ConfigError::SpaceCountMismatch {
                tag: spec.tag.clone(),
                expected: device_type.spaces,
                found: spec.maps.len(),
            });
        }
        check_rom(spec, device_type.rom, memory)?;
        debug!(tag = %spec.tag, device_type = device_type.name, "device validated");
        Ok(device_type)
    }
}

fn check_option(tag: &str, decl: &OptionDecl, value: &OptionValue) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidOption {
        tag: tag.to_owned(),
        option: decl.name.to_owned(),
        reason,
    };
    match (decl.kind, value) {
        (OptionKind::Integer { min, max }, OptionValue::Integer(number)) => {
            if (min..=max).contains(number) {
                Ok(())
            } else {
                Err(invalid(format!("{number} is outside {min}..={max}")))
            }
        }
        (OptionKind::Text { choices }, OptionValue::Text(text)) => {
            if choices.is_empty() || choices.contains(&text.as_str()) {
                Ok(())
            } else {
                Err(invalid(format!("`{text}` is not one of {}", choices.join(", "))))
            }
        }
        (OptionKind::Bool, OptionValue::Bool(_)) => Ok(()),
        (kind, value) => Err(invalid(format!(
            "expected {}, found {}",
            match kind {
                OptionKind::Integer { .. } => "integer",
                OptionKind::Text { .. } => "text",
                OptionKind::Bool => "bool",
            },
            value.kind_name()
        ))),
    }
}

fn check_rom(
    spec: &DeviceSpec,
    requirement: RomRequirement,
    memory: &MemoryStore,
) -> Result<(), ConfigError> {
    let region = match (requirement, &spec.rom_region) {
        (RomRequirement::None, None) | (RomRequirement::Optional, None) => return Ok(()),
        (RomRequirement::None, Some(_)) => {
            return Err(ConfigError::InvalidOption {
                tag: spec.tag.clone(),
                option: "rom_region".to_owned(),
                reason: "this device type takes no rom region".to_owned(),
            })
        }
        (RomRequirement::Required { .. }, None) => {
            return Err(ConfigError::MissingDeviceRom {
                tag: spec.tag.clone(),
            })
        }
        (_, Some(region)) => region,
    };
    let id = memory
        .region_id(region)
        .ok_or_else(|| ConfigError::UnknownRomRegion {
            context: format!("device `{}`", spec.tag),
            region: region.clone(),
        })?;
    if let RomRequirement::Required { min_size } = requirement {
        let size = memory.region(id).len();
        if size < min_size {
            return Err(ConfigError::RomRegionTooSmall {
                tag: spec.tag.clone(),
                region: region.clone(),
                size,
                min: min_size,
            });
        }
    }
    Ok(())
}

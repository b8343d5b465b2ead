//! Input-port table: DIP switches, digital controls and unused bits packed into
//! the read-only ports a bus master samples.

use std::collections::BTreeMap;
use std::fmt;

use crate::{InputError, SnapshotError};

/// Physical control a digital field is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InputType {
    /// Joystick up.
    JoystickUp,
    /// Joystick down.
    JoystickDown,
    /// Joystick left.
    JoystickLeft,
    /// Joystick right.
    JoystickRight,
    /// Numbered action button.
    Button(u8),
    /// Numbered coin slot.
    Coin(u8),
    /// Numbered start button.
    Start(u8),
    /// Numbered service input.
    Service(u8),
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoystickUp => f.write_str("joystick up"),
            Self::JoystickDown => f.write_str("joystick down"),
            Self::JoystickLeft => f.write_str("joystick left"),
            Self::JoystickRight => f.write_str("joystick right"),
            Self::Button(n) => write!(f, "button {n}"),
            Self::Coin(n) => write!(f, "coin {n}"),
            Self::Start(n) => write!(f, "start {n}"),
            Self::Service(n) => write!(f, "service {n}"),
        }
    }
}

/// One labelled position of a DIP switch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DipSetting {
    /// Raw bits inside the field mask.
    pub value: u32,
    /// Operator-facing label.
    pub label: String,
}

/// What a port field represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FieldKind {
    /// Multi-position switch.
    Dip {
        /// Switch name.
        name: String,
        /// Selectable positions.
        settings: Vec<DipSetting>,
    },
    /// Momentary control.
    Digital {
        /// Control type.
        input: InputType,
        /// Player number; `0` for cabinet-wide inputs.
        player: u8,
    },
    /// Bits with a fixed level.
    Unused,
}

/// Group of bits inside a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PortField {
    /// Bits owned by the field.
    pub mask: u32,
    /// Bits driven at power-on.
    pub default: u32,
    /// Digital fields read low while pressed.
    pub active_low: bool,
    /// Field kind.
    pub kind: FieldKind,
}

impl PortField {
    /// Label used in diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.kind {
            FieldKind::Dip { name, .. } => name.clone(),
            FieldKind::Digital { input, player } => format!("P{player} {input}"),
            FieldKind::Unused => format!("unused {:#x}", self.mask),
        }
    }
}

/// Declarative input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InputPortSpec {
    /// Port tag referenced by map entries.
    pub tag: String,
    /// Fields in declaration order.
    pub fields: Vec<PortField>,
}

impl InputPortSpec {
    /// Creates an empty port.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            fields: Vec::new(),
        }
    }

    /// Adds a DIP switch.
    #[must_use]
    pub fn dip(mut self, name: &str, mask: u32, default: u32, settings: &[(u32, &str)]) -> Self {
        self.fields.push(PortField {
            mask,
            default,
            active_low: false,
            kind: FieldKind::Dip {
                name: name.to_owned(),
                settings: settings
                    .iter()
                    .map(|(value, label)| DipSetting {
                        value: *value,
                        label: (*label).to_owned(),
                    })
                    .collect(),
            },
        });
        self
    }

    /// Adds a digital control.
    #[must_use]
    pub fn digital(mut self, mask: u32, input: InputType, player: u8, active_low: bool) -> Self {
        self.fields.push(PortField {
            mask,
            default: if active_low { mask } else { 0 },
            active_low,
            kind: FieldKind::Digital { input, player },
        });
        self
    }

    /// Adds bits with a fixed level.
    #[must_use]
    pub fn unused(mut self, mask: u32, default: u32) -> Self {
        self.fields.push(PortField {
            mask,
            default,
            active_low: false,
            kind: FieldKind::Unused,
        });
        self
    }
}

/// Index of a port inside [`InputPorts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub(crate) usize);

/// Validated port table with the live level of every field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InputPorts {
    ports: Vec<InputPortSpec>,
    live: Vec<Vec<u32>>,
}

impl InputPorts {
    /// Validates `ports` and sets every field to its default.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] for duplicate tags, empty or overlapping
    /// masks, settings outside their mask and defaults that are not settings.
    pub fn new(ports: Vec<InputPortSpec>) -> Result<Self, InputError> {
        for (index, port) in ports.iter().enumerate() {
            if ports[..index].iter().any(|prior| prior.tag == port.tag) {
                return Err(InputError::DuplicatePort {
                    port: port.tag.clone(),
                });
            }
            validate_port(port)?;
        }
        let live = ports
            .iter()
            .map(|port| port.fields.iter().map(|field| field.default).collect())
            .collect();
        Ok(Self { ports, live })
    }

    /// Looks up a port by tag.
    #[must_use]
    pub fn port_id(&self, tag: &str) -> Option<PortId> {
        self.ports.iter().position(|port| port.tag == tag).map(PortId)
    }

    /// Current value of a port.
    #[must_use]
    pub fn value(&self, id: PortId) -> u32 {
        self.live[id.0].iter().fold(0, |value, field| value | field)
    }

    /// Current value of the port tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::UnknownPort`] when no port has this tag.
    pub fn port_value(&self, tag: &str) -> Result<u32, InputError> {
        self.port_id(tag)
            .map(|id| self.value(id))
            .ok_or_else(|| InputError::UnknownPort {
                port: tag.to_owned(),
            })
    }

    /// Presses or releases every field wired to `input` for `player`.
    ///
    /// Returns the number of fields updated.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::UnmatchedInput`] when no field carries that input.
    pub fn set_input(
        &mut self,
        player: u8,
        input: InputType,
        pressed: bool,
    ) -> Result<usize, InputError> {
        let mut updated = 0;
        for (port, live) in self.ports.iter().zip(self.live.iter_mut()) {
            for (field, level) in port.fields.iter().zip(live.iter_mut()) {
                if field.kind == (FieldKind::Digital { input, player }) {
                    *level = if pressed == field.active_low { 0 } else { field.mask };
                    updated += 1;
                }
            }
        }
        if updated == 0 {
            return Err(InputError::UnmatchedInput {
                input: input.to_string(),
                player,
            });
        }
        Ok(updated)
    }

    /// Moves DIP switch `name` of port `tag` to the setting labelled `setting`.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] naming the unknown port, switch or setting.
    pub fn set_dip(&mut self, tag: &str, name: &str, setting: &str) -> Result<(), InputError> {
        let (port_index, field_index, settings) = self.find_dip(tag, name)?;
        let value = settings
            .iter()
            .find(|candidate| candidate.label == setting)
            .map(|candidate| candidate.value)
            .ok_or_else(|| InputError::UnknownSetting {
                port: tag.to_owned(),
                field: name.to_owned(),
                setting: setting.to_owned(),
            })?;
        self.live[port_index][field_index] = value;
        Ok(())
    }

    /// Label of the current setting of DIP switch `name` on port `tag`.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] naming the unknown port or switch.
    pub fn dip_setting(&self, tag: &str, name: &str) -> Result<&str, InputError> {
        let (port_index, field_index, settings) = self.find_dip(tag, name)?;
        let level = self.live[port_index][field_index];
        Ok(settings
            .iter()
            .find(|candidate| candidate.value == level)
            .map_or("", |candidate| candidate.label.as_str()))
    }

    /// Declared ports.
    #[must_use]
    pub fn specs(&self) -> &[InputPortSpec] {
        &self.ports
    }

    /// Returns every field to its default level.
    pub fn reset(&mut self) {
        for (port, live) in self.ports.iter().zip(self.live.iter_mut()) {
            for (field, level) in port.fields.iter().zip(live.iter_mut()) {
                *level = field.default;
            }
        }
    }

    /// Field levels keyed by port tag.
    #[must_use]
    pub fn live_levels(&self) -> BTreeMap<String, Vec<u32>> {
        self.ports
            .iter()
            .zip(&self.live)
            .map(|(port, live)| (port.tag.clone(), live.clone()))
            .collect()
    }

    pub(crate) fn check_levels(
        &self,
        levels: &BTreeMap<String, Vec<u32>>,
    ) -> Result<(), SnapshotError> {
        for port in &self.ports {
            let recorded = levels.get(&port.tag).ok_or_else(|| SnapshotError::Missing {
                kind: "input port",
                name: port.tag.clone(),
            })?;
            let fits = recorded.len() == port.fields.len()
                && port
                    .fields
                    .iter()
                    .zip(recorded)
                    .all(|(field, level)| level & !field.mask == 0);
            if !fits {
                return Err(SnapshotError::InputMismatch {
                    port: port.tag.clone(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn apply_levels(&mut self, levels: &BTreeMap<String, Vec<u32>>) {
        for (port, live) in self.ports.iter().zip(self.live.iter_mut()) {
            if let Some(recorded) = levels.get(&port.tag) {
                live.clone_from(recorded);
            }
        }
    }

    fn find_dip(&self, tag: &str, name: &str) -> Result<(usize, usize, &[DipSetting]), InputError> {
        let port_index = self
            .port_id(tag)
            .ok_or_else(|| InputError::UnknownPort {
                port: tag.to_owned(),
            })?
            .0;
        self.ports[port_index]
            .fields
            .iter()
            .enumerate()
            .find_map(|(index, field)| match &field.kind {
                FieldKind::Dip {
                    name: candidate,
                    settings,
                } if candidate == name => Some((port_index, index, settings.as_slice())),
                _ => None,
            })
            .ok_or_else(|| InputError::UnknownField {
                port: tag.to_owned(),
                field: name.to_owned(),
            })
    }
}

fn validate_port(port: &InputPortSpec) -> Result<(), InputError> {
    let mut claimed = 0_u32;
    for field in &port.fields {
        if field.mask == 0 {
            return Err(InputError::EmptyMask {
                port: port.tag.clone(),
                field: field.label(),
            });
        }
        if field.mask & claimed != 0 {
            return Err(InputError::OverlappingFields {
                port: port.tag.clone(),
                field: field.label(),
                mask: claimed,
            });
        }
        claimed |= field.mask;

        if let FieldKind::Dip { name, settings } = &field.kind {
            if let Some(stray) = settings.iter().find(|setting| setting.value & !field.mask != 0) {
                return Err(InputError::SettingOutOfMask {
                    port: port.tag.clone(),
                    field: name.clone(),
                    value: stray.value,
                });
            }
            if !settings.iter().any(|setting| setting.value == field.default) {
                return Err(InputError::InvalidDefault {
                    port: port.tag.clone(),
                    field: name.clone(),
                });
            }
        } else if field.default & !field.mask != 0 {
            return Err(InputError::InvalidDefault {
                port: port.tag.clone(),
                field: field.label(),
            });
        }
    }
    Ok(())
}

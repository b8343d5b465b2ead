//! Built-in machine descriptions.

pub mod thoop2;

use crate::machine::MachineConfig;

pub use thoop2::Thoop2Variant;

/// Catalogue entry for a built-in board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardInfo {
    /// Short set name used on the command line.
    pub name: &'static str,
    /// Full title.
    pub description: &'static str,
    /// Release year.
    pub year: u16,
    /// Manufacturer.
    pub manufacturer: &'static str,
    /// Set this one is a revision of, if any.
    pub parent: Option<&'static str>,
}

/// Every built-in board, parents before their clones.
pub const BOARDS: &[BoardInfo] = &[
    BoardInfo {
        name: Thoop2Variant::Thoop2.name(),
        description: Thoop2Variant::Thoop2.description(),
        year: 1994,
        manufacturer: "Gaelco",
        parent: None,
    },
    BoardInfo {
        name: Thoop2Variant::Thoop2a.name(),
        description: Thoop2Variant::Thoop2a.description(),
        year: 1994,
        manufacturer: "Gaelco",
        parent: Some("thoop2"),
    },
];

/// Machine description of the built-in board called `name`.
#[must_use]
pub fn lookup(name: &str) -> Option<MachineConfig> {
    Thoop2Variant::from_name(name).map(thoop2::machine_config)
}

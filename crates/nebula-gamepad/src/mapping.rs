//! GUID-keyed mapping database and the mapping resolver.
//!
//! Mappings use the community controller-mapping text format
//! (`guid,name,a:b0,leftx:a0,dpup:h0.1,...,platform:Linux,`) so entries can be
//! exchanged with that ecosystem unchanged. The built-in table is embedded at
//! compile time and parsed once when the registry is created.

use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::MappingError;

/// Version tag of the embedded mapping table.
pub const MAPPING_DB_VERSION: &str = "2.0.16-nebula.3";

/// Number of canonical buttons every mapping resolves.
pub const CANONICAL_BUTTON_COUNT: usize = 15;

/// Number of canonical axes every mapping resolves.
pub const CANONICAL_AXIS_COUNT: usize = 6;

/// Longest device or mapping name kept, in characters.
pub const MAX_NAME_CHARS: usize = 127;

const BUILTIN_MAPPINGS: &str = include_str!("../mappings/gamecontrollerdb.txt");

/// Value of the `platform:` field for the running OS.
#[cfg(target_os = "windows")]
pub const CURRENT_PLATFORM: &str = "Windows";
#[cfg(target_os = "macos")]
pub const CURRENT_PLATFORM: &str = "Mac OS X";
#[cfg(target_os = "linux")]
pub const CURRENT_PLATFORM: &str = "Linux";
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
pub const CURRENT_PLATFORM: &str = "";

/// Canonical button slots, in mapping order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalButton {
    A,
    B,
    X,
    Y,
    LeftShoulder,
    RightShoulder,
    Back,
    Start,
    Guide,
    LeftThumb,
    RightThumb,
    DpadUp,
    DpadRight,
    DpadDown,
    DpadLeft,
}

impl CanonicalButton {
    pub const ALL: [Self; CANONICAL_BUTTON_COUNT] = [
        Self::A,
        Self::B,
        Self::X,
        Self::Y,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::Back,
        Self::Start,
        Self::Guide,
        Self::LeftThumb,
        Self::RightThumb,
        Self::DpadUp,
        Self::DpadRight,
        Self::DpadDown,
        Self::DpadLeft,
    ];

    /// Key used in mapping strings.
    pub fn key(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::X => "x",
            Self::Y => "y",
            Self::LeftShoulder => "leftshoulder",
            Self::RightShoulder => "rightshoulder",
            Self::Back => "back",
            Self::Start => "start",
            Self::Guide => "guide",
            Self::LeftThumb => "leftstick",
            Self::RightThumb => "rightstick",
            Self::DpadUp => "dpup",
            Self::DpadRight => "dpright",
            Self::DpadDown => "dpdown",
            Self::DpadLeft => "dpleft",
        }
    }
}

/// Canonical axis slots, in mapping order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
    LeftTrigger,
    RightTrigger,
}

impl CanonicalAxis {
    pub const ALL: [Self; CANONICAL_AXIS_COUNT] = [
        Self::LeftX,
        Self::LeftY,
        Self::RightX,
        Self::RightY,
        Self::LeftTrigger,
        Self::RightTrigger,
    ];

    /// Key used in mapping strings.
    pub fn key(self) -> &'static str {
        match self {
            Self::LeftX => "leftx",
            Self::LeftY => "lefty",
            Self::RightX => "rightx",
            Self::RightY => "righty",
            Self::LeftTrigger => "lefttrigger",
            Self::RightTrigger => "righttrigger",
        }
    }
}

/// Where one canonical input is read from on the native device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapElement {
    /// Raw axis, transformed as `raw * scale + offset`.
    Axis { index: u8, scale: f32, offset: f32 },
    /// Raw button.
    Button { index: u8 },
    /// One direction bit of a hat's 4-bit nibble.
    HatBit { hat: u8, mask: u8 },
}

impl MapElement {
    /// Whether the element addresses an input the device actually has.
    pub fn is_valid_for(&self, counts: ElementCounts) -> bool {
        match *self {
            Self::Axis { index, .. } => usize::from(index) < counts.axes,
            Self::Button { index } => usize::from(index) < counts.buttons,
            Self::HatBit { hat, .. } => usize::from(hat) < counts.hats,
        }
    }
}

/// Native input counts of a device, used to validate a mapping against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElementCounts {
    pub axes: usize,
    pub buttons: usize,
    pub hats: usize,
}

/// A parsed mapping entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub name: String,
    /// 32 lowercase hex characters.
    pub guid: String,
    pub buttons: [Option<MapElement>; CANONICAL_BUTTON_COUNT],
    pub axes: [Option<MapElement>; CANONICAL_AXIS_COUNT],
}

impl Mapping {
    /// Parse a mapping line, accepting it only if its `platform:` field is
    /// absent or equal to `platform`.
    pub fn parse_for_platform(line: &str, platform: &str) -> Result<Self, MappingError> {
        let line = line.trim();
        let (guid, rest) = line
            .split_once(',')
            .ok_or_else(|| MappingError::InvalidGuid(line.to_string()))?;
        if guid.len() != 32 || !guid.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MappingError::InvalidGuid(guid.to_string()));
        }
        let (name, fields) = rest.split_once(',').ok_or(MappingError::MissingName)?;

        let mut mapping = Mapping {
            name: truncate_name(name),
            guid: guid.to_ascii_lowercase(),
            buttons: [None; CANONICAL_BUTTON_COUNT],
            axes: [None; CANONICAL_AXIS_COUNT],
        };

        for field in fields.split(',').filter(|f| !f.is_empty()) {
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };

            if key == "platform" {
                if value != platform {
                    return Err(MappingError::OtherPlatform(value.to_string()));
                }
                continue;
            }

            // Output modifiers (`+leftx`, `-leftx`) are not supported.
            if key.starts_with('+') || key.starts_with('-') {
                continue;
            }

            let target = if let Some(button) = CanonicalButton::ALL.iter().find(|b| b.key() == key)
            {
                &mut mapping.buttons[*button as usize]
            } else if let Some(axis) = CanonicalAxis::ALL.iter().find(|a| a.key() == key) {
                &mut mapping.axes[*axis as usize]
            } else {
                continue;
            };

            *target = parse_element(key, value)?;
        }

        Ok(mapping)
    }

    /// Whether every element addresses an input the device has.
    ///
    /// A single invalid element rejects the whole mapping.
    pub fn is_valid_for(&self, counts: ElementCounts) -> bool {
        self.buttons
            .iter()
            .chain(self.axes.iter())
            .flatten()
            .all(|e| e.is_valid_for(counts))
    }

    /// The element bound to a canonical button.
    pub fn button(&self, button: CanonicalButton) -> Option<MapElement> {
        self.buttons[button as usize]
    }

    /// The element bound to a canonical axis.
    pub fn axis(&self, axis: CanonicalAxis) -> Option<MapElement> {
        self.axes[axis as usize]
    }
}

impl FromStr for Mapping {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_for_platform(s, CURRENT_PLATFORM)
    }
}

/// Parse an element value. Returns `Ok(None)` for source kinds that are
/// recognised by the format but not by this layer.
fn parse_element(key: &str, value: &str) -> Result<Option<MapElement>, MappingError> {
    let invalid = || MappingError::InvalidElement {
        key: key.to_string(),
        value: value.to_string(),
    };

    let mut minimum = -1.0_f32;
    let mut maximum = 1.0_f32;
    let mut rest = value;
    if let Some(r) = rest.strip_prefix('+') {
        minimum = 0.0;
        rest = r;
    } else if let Some(r) = rest.strip_prefix('-') {
        maximum = 0.0;
        rest = r;
    }

    let mut chars = rest.chars();
    let kind = chars.next().ok_or_else(invalid)?;
    let body = chars.as_str();

    match kind {
        'a' => {
            let (digits, inverted) = match body.strip_suffix('~') {
                Some(d) => (d, true),
                None => (body, false),
            };
            let index = digits.parse::<u8>().map_err(|_| invalid())?;
            let mut scale = 2.0 / (maximum - minimum);
            let mut offset = -(maximum + minimum);
            if inverted {
                scale = -scale;
                offset = -offset;
            }
            Ok(Some(MapElement::Axis {
                index,
                scale,
                offset,
            }))
        }
        'b' => {
            let index = body.parse::<u8>().map_err(|_| invalid())?;
            Ok(Some(MapElement::Button { index }))
        }
        'h' => {
            let (hat, mask) = body.split_once('.').ok_or_else(invalid)?;
            let hat = hat.parse::<u8>().map_err(|_| invalid())?;
            let mask = mask.parse::<u8>().map_err(|_| invalid())?;
            if mask == 0 || mask > 0xf {
                return Err(invalid());
            }
            Ok(Some(MapElement::HatBit { hat, mask }))
        }
        _ => Ok(None),
    }
}

pub(crate) fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_CHARS).collect()
}

/// Index of a mapping inside a [`MappingDatabase`].
///
/// Indices are stable: replacing a mapping keeps its index.
pub type MappingId = usize;

/// In-memory mapping table keyed by GUID.
#[derive(Debug, Clone, Default)]
pub struct MappingDatabase {
    mappings: Vec<Mapping>,
}

impl MappingDatabase {
    /// An empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded table, filtered to the running platform.
    pub fn builtin() -> Self {
        let mut db = Self::new();
        let count = db.load(BUILTIN_MAPPINGS);
        debug!(count, version = MAPPING_DB_VERSION, "Loaded built-in gamepad mappings");
        db
    }

    /// Parse every line of `text` for the running platform and add it.
    ///
    /// Returns the number of mappings added or replaced. Invalid lines are
    /// logged and skipped.
    pub fn load(&mut self, text: &str) -> usize {
        self.load_for_platform(text, CURRENT_PLATFORM)
    }

    pub(crate) fn load_for_platform(&mut self, text: &str, platform: &str) -> usize {
        let mut count = 0;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Mapping::parse_for_platform(line, platform) {
                Ok(mapping) => {
                    self.insert(mapping);
                    count += 1;
                }
                Err(MappingError::OtherPlatform(_)) => {}
                Err(e) => warn!(error = %e, "Skipping invalid gamepad mapping"),
            }
        }
        count
    }

    /// Add `mapping`, replacing any entry with the same GUID.
    pub fn insert(&mut self, mapping: Mapping) -> MappingId {
        if let Some(id) = self.find(&mapping.guid) {
            self.mappings[id] = mapping;
            id
        } else {
            self.mappings.push(mapping);
            self.mappings.len() - 1
        }
    }

    /// Look a GUID up without validating it against a device.
    pub fn find(&self, guid: &str) -> Option<MappingId> {
        self.mappings
            .iter()
            .position(|m| m.guid.eq_ignore_ascii_case(guid))
    }

    /// Look a GUID up and validate every element against `counts`.
    ///
    /// A mapping with any element outside the device's inputs is rejected as a
    /// whole so later reads can index raw buffers without bounds failures.
    pub fn find_valid(&self, guid: &str, counts: ElementCounts) -> Option<MappingId> {
        let id = self.find(guid)?;
        let mapping = &self.mappings[id];
        if mapping.is_valid_for(counts) {
            Some(id)
        } else {
            warn!(
                guid,
                name = %mapping.name,
                "Mapping references inputs the device does not have, ignoring it"
            );
            None
        }
    }

    pub fn get(&self, id: MappingId) -> Option<&Mapping> {
        self.mappings.get(id)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XBOX_LINUX: &str = "030000005e0400008e02000010010000,Xbox 360 Controller,a:b0,b:b1,back:b6,dpdown:h0.4,dpleft:h0.8,dpright:h0.2,dpup:h0.1,guide:b8,leftshoulder:b4,leftstick:b9,lefttrigger:a2,leftx:a0,lefty:a1,rightshoulder:b5,rightstick:b10,righttrigger:a5,rightx:a3,righty:a4,start:b7,x:b2,y:b3,platform:Linux,";

    fn xbox_counts() -> ElementCounts {
        ElementCounts {
            axes: 6,
            buttons: 11,
            hats: 1,
        }
    }

    #[test]
    fn test_parse_full_mapping() {
        let m = Mapping::parse_for_platform(XBOX_LINUX, "Linux").unwrap();
        assert_eq!(m.name, "Xbox 360 Controller");
        assert_eq!(m.button(CanonicalButton::A), Some(MapElement::Button { index: 0 }));
        assert_eq!(
            m.button(CanonicalButton::DpadLeft),
            Some(MapElement::HatBit { hat: 0, mask: 8 })
        );
        assert_eq!(
            m.axis(CanonicalAxis::RightTrigger),
            Some(MapElement::Axis {
                index: 5,
                scale: 1.0,
                offset: 0.0
            })
        );
    }

    #[test]
    fn test_half_and_inverted_axes() {
        let line = "0300000000000000000000000000000f,Pad,leftx:+a0,lefty:-a1,rightx:a2~,";
        let m = Mapping::parse_for_platform(line, "Linux").unwrap();
        assert_eq!(
            m.axis(CanonicalAxis::LeftX),
            Some(MapElement::Axis {
                index: 0,
                scale: 2.0,
                offset: -1.0
            })
        );
        assert_eq!(
            m.axis(CanonicalAxis::LeftY),
            Some(MapElement::Axis {
                index: 1,
                scale: 2.0,
                offset: 1.0
            })
        );
        assert_eq!(
            m.axis(CanonicalAxis::RightX),
            Some(MapElement::Axis {
                index: 2,
                scale: -1.0,
                offset: 0.0
            })
        );
    }

    #[test]
    fn test_guid_is_lowercased() {
        let line = "030000005E0400008E02000010010000,Pad,a:b0,";
        let m = Mapping::parse_for_platform(line, "Linux").unwrap();
        assert_eq!(m.guid, "030000005e0400008e02000010010000");
    }

    #[test]
    fn test_rejects_bad_guid() {
        let err = Mapping::parse_for_platform("xyz,Pad,a:b0,", "Linux").unwrap_err();
        assert!(matches!(err, MappingError::InvalidGuid(_)));
    }

    #[test]
    fn test_rejects_bad_element() {
        let line = "030000005e0400008e02000010010000,Pad,a:b999,";
        let err = Mapping::parse_for_platform(line, "Linux").unwrap_err();
        assert!(matches!(err, MappingError::InvalidElement { .. }));
    }

    #[test]
    fn test_other_platform_is_skipped() {
        let err = Mapping::parse_for_platform(XBOX_LINUX, "Windows").unwrap_err();
        assert_eq!(err, MappingError::OtherPlatform("Linux".to_string()));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let line = "030000005e0400008e02000010010000,Pad,a:b0,touchpad:b13,misc1:b14,+leftx:b1,";
        let m = Mapping::parse_for_platform(line, "Linux").unwrap();
        assert_eq!(m.buttons.iter().flatten().count(), 1);
    }

    #[test]
    fn test_valid_mapping_resolves() {
        let mut db = MappingDatabase::new();
        assert_eq!(db.load_for_platform(XBOX_LINUX, "Linux"), 1);
        let id = db.find_valid("030000005e0400008e02000010010000", xbox_counts());
        assert_eq!(id, Some(0));
    }

    #[test]
    fn test_single_out_of_range_index_rejects_whole_mapping() {
        let mut db = MappingDatabase::new();
        db.load_for_platform(XBOX_LINUX, "Linux");
        let guid = "030000005e0400008e02000010010000";

        // rightstick is b10, so 10 buttons is one too few.
        let fewer_buttons = ElementCounts {
            buttons: 10,
            ..xbox_counts()
        };
        assert_eq!(db.find_valid(guid, fewer_buttons), None);

        // righttrigger is a5.
        let fewer_axes = ElementCounts {
            axes: 5,
            ..xbox_counts()
        };
        assert_eq!(db.find_valid(guid, fewer_axes), None);

        let no_hats = ElementCounts {
            hats: 0,
            ..xbox_counts()
        };
        assert_eq!(db.find_valid(guid, no_hats), None);
    }

    #[test]
    fn test_unknown_guid_has_no_mapping() {
        let db = MappingDatabase::builtin();
        let counts = ElementCounts {
            axes: 2,
            buttons: 1,
            hats: 0,
        };
        assert_eq!(db.find_valid("0500000000000000000000000000ff00", counts), None);
    }

    #[test]
    fn test_insert_replaces_by_guid() {
        let mut db = MappingDatabase::new();
        db.load_for_platform(XBOX_LINUX, "Linux");
        let replacement = Mapping::parse_for_platform(
            "030000005e0400008e02000010010000,Renamed,a:b1,",
            "Linux",
        )
        .unwrap();
        let id = db.insert(replacement);
        assert_eq!(id, 0);
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(0).unwrap().name, "Renamed");
    }

    #[test]
    fn test_builtin_table_parses() {
        let mut db = MappingDatabase::new();
        for platform in ["Linux", "Windows", "Mac OS X"] {
            let count = db.load_for_platform(BUILTIN_MAPPINGS, platform);
            assert!(count > 0, "no mappings for {platform}");
        }
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let mut db = MappingDatabase::new();
        let text = format!("# header\n\n{XBOX_LINUX}\n");
        assert_eq!(db.load_for_platform(&text, "Linux"), 1);
    }
}

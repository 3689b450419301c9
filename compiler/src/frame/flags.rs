//! Access flags of frame accessor nodes

use serde::Serialize;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bit set controlling which backing arrays an accessor touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct AccessFlags(u8);

impl AccessFlags {
    pub const NONE: AccessFlags = AccessFlags(0);
    /// Slot is static: no tag check, no tag update
    pub const STATIC: AccessFlags = AccessFlags(1);
    /// Touch the primitive locals array
    pub const PRIMITIVE: AccessFlags = AccessFlags(2);
    /// Touch the object locals array
    pub const OBJECT: AccessFlags = AccessFlags(4);
    /// Writes update the tag
    pub const SET_TAG: AccessFlags = AccessFlags(8);

    pub const NON_STATIC: AccessFlags = AccessFlags(2 | 4);
    pub const NON_STATIC_UPDATE: AccessFlags = AccessFlags(2 | 4 | 8);
    pub const STATIC_PRIMITIVE: AccessFlags = AccessFlags(1 | 2);
    pub const STATIC_PRIMITIVE_UPDATE: AccessFlags = AccessFlags(1 | 2 | 8);
    pub const STATIC_OBJECT: AccessFlags = AccessFlags(1 | 4);
    pub const STATIC_OBJECT_UPDATE: AccessFlags = AccessFlags(1 | 4 | 8);
    pub const STATIC_BOTH: AccessFlags = AccessFlags(1 | 2 | 4);
    pub const STATIC_BOTH_UPDATE: AccessFlags = AccessFlags(1 | 2 | 4 | 8);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn touches_primitive(self) -> bool {
        self.contains(Self::PRIMITIVE)
    }

    pub fn touches_object(self) -> bool {
        self.contains(Self::OBJECT)
    }

    /// Whether a write updates the tag. Static accesses never do.
    pub fn updates_tag(self) -> bool {
        self.contains(Self::SET_TAG) && !self.is_static()
    }

    pub fn without(self, other: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 & !other.0)
    }
}

impl BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessFlags {
    fn bitor_assign(&mut self, rhs: AccessFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::STATIC, "static"),
            (Self::PRIMITIVE, "primitive"),
            (Self::OBJECT, "object"),
            (Self::SET_TAG, "set_tag"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}

/// Which slot index space an accessor addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessType {
    /// Indexed slots: tags plus object/primitive locals
    Indexed,
    /// Auxiliary slots: object array only, untagged
    Auxiliary,
}

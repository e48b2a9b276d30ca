//! Optimizer toggles
//!
//! Each peephole optimizer and each optional pass can be switched on and off
//! independently. Flags combine like a bitmask and parse from strings such
//! as `"FAST_CALL|LEX_HOIST"` for configuration files.

use serde::{Deserialize, Serialize};

/// Optimizer and diagnostic toggles (bitflags)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimizerFlags(u32);

impl OptimizerFlags {
    /// Nothing enabled
    pub const NONE: Self = Self(0x000);
    /// Skip generic dispatch for calls through a just-looked-up function
    pub const FAST_CALL: Self = Self(0x001);
    /// Resolve allow-listed global lookups once per procedure
    pub const LEX_HOIST: Self = Self(0x002);
    /// Replace trivial constructors with a minimal callable
    pub const TRIVIAL_CTOR: Self = Self(0x004);
    /// Share one null guard across allow-listed property chains
    pub const NULL_GUARD: Self = Self(0x008);
    /// Drop coercions applied to a literal null
    pub const NULL_COERCION_SKIP: Self = Self(0x010);
    /// Attach a disassembly window to underrun diagnostics
    pub const UNDERRUN_DIAGNOSTICS: Self = Self(0x020);
    /// Bound the dispatcher loop's iteration count
    pub const DISPATCH_FUSE: Self = Self(0x040);
    /// Turn scope pushes into pops when the scope chain is never read
    pub const SCOPE_ELISION: Self = Self(0x080);

    /// Everything except the extra diagnostics
    pub const DEFAULT: Self = Self(0x0DF);
    /// Every flag
    pub const ALL: Self = Self(0x0FF);

    /// Create from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Check if all of `other` is set
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(&self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Remove flags
    pub const fn difference(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse from a flag name, a `|`-separated combination, or a number
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.contains('|') {
            return s.split('|').try_fold(Self::NONE, |acc, part| Some(acc.union(Self::from_str(part)?)));
        }
        match s.to_uppercase().as_str() {
            "NONE" => Some(Self::NONE),
            "FAST_CALL" => Some(Self::FAST_CALL),
            "LEX_HOIST" => Some(Self::LEX_HOIST),
            "TRIVIAL_CTOR" => Some(Self::TRIVIAL_CTOR),
            "NULL_GUARD" => Some(Self::NULL_GUARD),
            "NULL_COERCION_SKIP" => Some(Self::NULL_COERCION_SKIP),
            "UNDERRUN_DIAGNOSTICS" => Some(Self::UNDERRUN_DIAGNOSTICS),
            "DISPATCH_FUSE" => Some(Self::DISPATCH_FUSE),
            "SCOPE_ELISION" => Some(Self::SCOPE_ELISION),
            "DEFAULT" => Some(Self::DEFAULT),
            "ALL" => Some(Self::ALL),
            other => {
                if let Some(hex) = other.strip_prefix("0X") {
                    u32::from_str_radix(hex, 16).ok().map(Self)
                } else {
                    other.parse::<u32>().ok().map(Self)
                }
            }
        }
    }
}

impl Default for OptimizerFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::ops::BitOr for OptimizerFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitAnd for OptimizerFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl std::ops::Not for OptimizerFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_excludes_diagnostics() {
        let d = OptimizerFlags::DEFAULT;
        assert!(d.contains(OptimizerFlags::FAST_CALL));
        assert!(d.contains(OptimizerFlags::SCOPE_ELISION));
        assert!(d.contains(OptimizerFlags::DISPATCH_FUSE));
        assert!(!d.contains(OptimizerFlags::UNDERRUN_DIAGNOSTICS));
        assert_eq!(d.union(OptimizerFlags::UNDERRUN_DIAGNOSTICS), OptimizerFlags::ALL);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            OptimizerFlags::from_str("fast_call | LEX_HOIST"),
            Some(OptimizerFlags::FAST_CALL | OptimizerFlags::LEX_HOIST)
        );
        assert_eq!(OptimizerFlags::from_str("0x10"), Some(OptimizerFlags::NULL_COERCION_SKIP));
        assert_eq!(OptimizerFlags::from_str("4"), Some(OptimizerFlags::TRIVIAL_CTOR));
        assert_eq!(OptimizerFlags::from_str("FAST|CALL"), None);
    }

    #[test]
    fn test_not_stays_in_range() {
        assert_eq!(!OptimizerFlags::ALL, OptimizerFlags::NONE);
        assert!((!OptimizerFlags::FAST_CALL).contains(OptimizerFlags::LEX_HOIST));
    }
}

// Flag diacritic operations: P, N, R, D, C, U

use crate::KfstError;
use hashbrown::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

/// The six flag diacritic operations.
///
/// These implement runtime feature unification during lookup, letting a
/// morphology express non-local constraints without blowing up the state
/// space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    /// Positive set: unconditionally set feature to value.
    P,
    /// Negative set: mark feature as "anything but value".
    N,
    /// Require: fail unless the feature is set (and matches, if a value is given).
    R,
    /// Disallow: fail if the feature is set (to the given value, if any).
    D,
    /// Clear: reset the feature to unset.
    C,
    /// Unify: set if compatible with the current value, fail otherwise.
    U,
}

/// Cell value meaning "feature is unset".
pub const FLAG_UNSET: i32 = 0;

/// Value index standing for "any value" in value-less R, D and C symbols.
pub const FLAG_VALUE_ANY: u16 = 1;

/// A parsed flag diacritic with interned feature and value indices.
///
/// Feature and value strings are interned to dense indices by
/// [`FlagRegistry`] while the symbol table loads, so the runtime flag state
/// is a plain vector of cells instead of a string map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagDiacritic {
    pub op: FlagOp,
    pub feature: u16,
    pub value: u16,
}

/// Result of checking a flag diacritic against the current flag state.
///
/// The caller owns the flag state and applies the update itself, which keeps
/// the branch/backtrack bookkeeping in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagCheckResult {
    /// The transition does not fire (constraint violation).
    Reject,
    /// The transition fires and the feature takes the given cell value.
    AcceptAndUpdate { feature: u16, value: i32 },
    /// The transition fires with no flag state change.
    AcceptNoUpdate,
}

/// Check a flag diacritic against the current cell value of its feature.
///
/// Cells encode the partial feature map: `0` is unset, `+v` means the
/// feature holds value index `v`, `-v` means the negative tag "anything but
/// `v`" (set by the N operation).
pub fn check_flag(fd: &FlagDiacritic, current: i32) -> FlagCheckResult {
    let value = fd.value as i32;
    match fd.op {
        FlagOp::P => FlagCheckResult::AcceptAndUpdate {
            feature: fd.feature,
            value,
        },
        FlagOp::N => FlagCheckResult::AcceptAndUpdate {
            feature: fd.feature,
            value: -value,
        },
        FlagOp::C => FlagCheckResult::AcceptAndUpdate {
            feature: fd.feature,
            value: FLAG_UNSET,
        },
        FlagOp::R => {
            if fd.value == FLAG_VALUE_ANY {
                if current == FLAG_UNSET {
                    return FlagCheckResult::Reject;
                }
            } else if current != value {
                return FlagCheckResult::Reject;
            }
            FlagCheckResult::AcceptNoUpdate
        }
        FlagOp::D => {
            if fd.value == FLAG_VALUE_ANY {
                if current != FLAG_UNSET {
                    return FlagCheckResult::Reject;
                }
            } else if current == value {
                return FlagCheckResult::Reject;
            }
            FlagCheckResult::AcceptNoUpdate
        }
        FlagOp::U => {
            if current == FLAG_UNSET || (current < 0 && current != -value) {
                FlagCheckResult::AcceptAndUpdate {
                    feature: fd.feature,
                    value,
                }
            } else if current == value {
                FlagCheckResult::AcceptNoUpdate
            } else {
                FlagCheckResult::Reject
            }
        }
    }
}

/// Interning registry for flag diacritic features and values.
///
/// Assigns sequential indices to feature and value strings as they are first
/// encountered in the symbol table. The value table is seeded so that index
/// 0 is "unset" and index 1 is the wildcard used by value-less R/D/C.
pub struct FlagRegistry {
    features: HashMap<String, u16>,
    values: HashMap<String, u16>,
}

impl Default for FlagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagRegistry {
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert(String::new(), 0);
        values.insert("@".to_string(), FLAG_VALUE_ANY);
        Self {
            features: HashMap::new(),
            values,
        }
    }

    /// Number of distinct features seen so far.
    pub fn feature_count(&self) -> u16 {
        self.features.len() as u16
    }

    /// Whether a symbol string has the `@<OP>.…@` envelope of a flag
    /// diacritic. Strings matching this shape must parse; everything else is
    /// an ordinary symbol.
    pub fn looks_like_flag(symbol: &str) -> bool {
        let bytes = symbol.as_bytes();
        bytes.len() >= 4
            && bytes[0] == b'@'
            && bytes[bytes.len() - 1] == b'@'
            && matches!(bytes[1], b'P' | b'N' | b'R' | b'D' | b'C' | b'U')
            && bytes[2] == b'.'
    }

    /// Parse a flag diacritic symbol like `@P.FEATURE.VALUE@` or `@R.FEATURE@`.
    ///
    /// P, N and U require an explicit value; R, D and C may omit it, in which
    /// case the value maps to the wildcard index.
    pub fn parse(&mut self, symbol: &str) -> Result<FlagDiacritic, KfstError> {
        if !Self::looks_like_flag(symbol) {
            return Err(KfstError::MalformedFlagDiacritic(symbol.to_string()));
        }

        let op = match symbol.as_bytes()[1] {
            b'P' => FlagOp::P,
            b'N' => FlagOp::N,
            b'R' => FlagOp::R,
            b'D' => FlagOp::D,
            b'C' => FlagOp::C,
            _ => FlagOp::U,
        };

        // symbol[3..len-1] is "FEATURE.VALUE" or "FEATURE"
        let inner = &symbol[3..symbol.len() - 1];
        let (feature_str, value_str) = match inner.find('.') {
            Some(dot) => (&inner[..dot], Some(&inner[dot + 1..])),
            None => (inner, None),
        };

        if feature_str.is_empty() || value_str == Some("") {
            return Err(KfstError::MalformedFlagDiacritic(symbol.to_string()));
        }
        if value_str.is_none() && matches!(op, FlagOp::P | FlagOp::N | FlagOp::U) {
            return Err(KfstError::MalformedFlagDiacritic(symbol.to_string()));
        }

        let feature = {
            let next = self.features.len() as u16;
            *self.features.entry(feature_str.to_string()).or_insert(next)
        };
        let value = {
            let value_str = value_str.unwrap_or("@");
            let next = self.values.len() as u16;
            *self.values.entry(value_str.to_string()).or_insert(next)
        };

        Ok(FlagDiacritic { op, feature, value })
    }
}

/// Per-path flag state with copy-on-push snapshots.
///
/// Rows of `feature_count` cells live contiguously in one backing vector;
/// the row at the current depth is the live flag state. Taking a branch that
/// updates a flag pushes a copy of the current row; backtracking truncates
/// back to the depth recorded at the branch point.
pub struct FlagStack {
    cells: Vec<i32>,
    feature_count: usize,
    depth: usize,
}

impl FlagStack {
    pub fn new(feature_count: u16) -> Self {
        let fc = feature_count as usize;
        Self {
            cells: vec![FLAG_UNSET; fc],
            feature_count: fc,
            depth: 0,
        }
    }

    /// Current row depth, for later [`truncate`](Self::truncate).
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The live flag row.
    #[inline]
    pub fn current(&self) -> &[i32] {
        let start = self.depth * self.feature_count;
        &self.cells[start..start + self.feature_count]
    }

    /// Push a copy of the current row and make it live.
    pub fn push_copy(&mut self) {
        if self.feature_count == 0 {
            return;
        }
        let start = self.depth * self.feature_count;
        self.cells.extend_from_within(start..start + self.feature_count);
        self.depth += 1;
    }

    /// Set a cell in the live row.
    #[inline]
    pub fn set(&mut self, feature: u16, value: i32) {
        let idx = self.depth * self.feature_count + feature as usize;
        self.cells[idx] = value;
    }

    /// Drop rows above `depth`, restoring the state saved at a branch point.
    pub fn truncate(&mut self, depth: usize) {
        if self.feature_count == 0 || depth >= self.depth {
            return;
        }
        self.cells.truncate((depth + 1) * self.feature_count);
        self.depth = depth;
    }

    /// 64-bit digest of the live row, used in cycle-protection keys.
    pub fn fingerprint(&self) -> u64 {
        if self.feature_count == 0 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        self.current().hash(&mut hasher);
        hasher.finish()
    }
}

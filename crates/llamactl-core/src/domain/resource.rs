//! GPU resource specifications and their normalized keys.
//!
//! Callers name the devices an engine should run on with a loose
//! [`ResourceSpec`] (`0`, `"1"`, `"0,1"`, or the legacy `"both"`).
//! [`ResourceSpec::normalize`] turns that into a [`ResourceKey`]: a sorted,
//! duplicate-free set of device indices that is used as the map key for
//! running instances and for conflict detection.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Highest device index accepted in a resource spec.
pub const MAX_DEVICE_INDEX: u32 = 7;

/// Legacy alias that used to mean "both GPUs".
pub const LEGACY_BOTH: &str = "both";

/// Errors raised while normalizing a resource spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("GPU specification cannot be empty")]
    Empty,

    #[error("Invalid GPU ID '{0}': must be a non-negative integer")]
    NotANumber(String),

    #[error("GPU ID {0} out of range (0-7)")]
    OutOfRange(i64),

    #[error("Duplicate GPU ID in specification: {0}")]
    Duplicate(u32),
}

/// A caller-supplied, not yet validated device selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceSpec {
    Index(i64),
    Text(String),
}

impl From<u32> for ResourceSpec {
    fn from(index: u32) -> Self {
        Self::Index(i64::from(index))
    }
}

impl From<i64> for ResourceSpec {
    fn from(index: i64) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for ResourceSpec {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ResourceSpec {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&ResourceKey> for ResourceSpec {
    fn from(key: &ResourceKey) -> Self {
        Self::Text(key.to_string())
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl ResourceSpec {
    /// Validate and normalize into a sorted device set.
    ///
    /// Accepts a single index, a comma separated list, or exactly `"both"`
    /// (mapped to `0,1` with a deprecation warning). Whitespace around
    /// entries is ignored; empty entries, negatives, indices above
    /// [`MAX_DEVICE_INDEX`] and duplicates are rejected.
    pub fn normalize(&self) -> Result<ResourceKey, ResourceError> {
        match self {
            Self::Index(index) => Ok(ResourceKey(vec![checked_index(*index)?])),
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(ResourceError::Empty);
                }
                if trimmed == LEGACY_BOTH {
                    warn!("GPU selector 'both' is deprecated, use '0,1' instead");
                    return Ok(ResourceKey(vec![0, 1]));
                }

                let mut devices = Vec::new();
                for part in trimmed.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        return Err(ResourceError::Empty);
                    }
                    let value: i64 = part
                        .parse()
                        .map_err(|_| ResourceError::NotANumber(part.to_string()))?;
                    let index = checked_index(value)?;
                    if devices.contains(&index) {
                        return Err(ResourceError::Duplicate(index));
                    }
                    devices.push(index);
                }
                devices.sort_unstable();
                Ok(ResourceKey(devices))
            }
        }
    }

    /// Value exported to the engine's device-visibility variable.
    ///
    /// The raw spec is passed through unchanged except for the legacy
    /// `"both"` alias, which the driver would not understand.
    pub fn device_selector(&self) -> String {
        match self {
            Self::Index(index) => index.to_string(),
            Self::Text(text) if text.trim() == LEGACY_BOTH => {
                warn!("GPU selector 'both' is deprecated, exporting '0,1'");
                "0,1".to_string()
            }
            Self::Text(text) => text.trim().to_string(),
        }
    }
}

fn checked_index(value: i64) -> Result<u32, ResourceError> {
    if value < 0 {
        return Err(ResourceError::NotANumber(value.to_string()));
    }
    u32::try_from(value)
        .ok()
        .filter(|index| *index <= MAX_DEVICE_INDEX)
        .ok_or(ResourceError::OutOfRange(value))
}

/// A normalized, sorted, duplicate-free set of device indices.
///
/// Displays as the comma-joined list (`"0"`, `"0,1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceKey(Vec<u32>);

impl ResourceKey {
    /// Device indices in ascending order.
    pub fn devices(&self) -> &[u32] {
        &self.0
    }

    /// Smallest device index; drives port assignment.
    pub fn primary(&self) -> u32 {
        self.0.first().copied().unwrap_or_default()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.0.binary_search(&index).is_ok()
    }

    /// Devices present in both keys.
    pub fn overlap(&self, other: &Self) -> Vec<u32> {
        self.0
            .iter()
            .copied()
            .filter(|index| other.contains(*index))
            .collect()
    }

    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.0.iter().any(|index| other.contains(*index))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = ResourceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResourceSpec::Text(value).normalize()
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceSpec::from(s).normalize()
    }
}

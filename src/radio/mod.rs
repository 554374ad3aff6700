// Radio domain model: identifiers, units, band plans, capabilities, and
// observed state.

pub(crate) mod gate;
pub mod manager;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Stable identifier of a radio in the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RadioId(String);

impl RadioId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for RadioId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for RadioId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl std::fmt::Display for RadioId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Transmit power in whole dBm.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PowerDbm(pub i32);

impl PowerDbm {
  pub fn dbm(self) -> i32 {
    self.0
  }
}

impl std::fmt::Display for PowerDbm {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} dBm", self.0)
  }
}

/// Index of a channel in a radio's band plan.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChannelIndex(pub u32);

impl std::fmt::Display for ChannelIndex {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "ch{}", self.0)
  }
}

/// A carrier frequency.
///
/// Stored as integer kilohertz so band-plan lookups compare exactly; the
/// wire representation is fractional megahertz. `from_mhz` rounds to the
/// nearest kilohertz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frequency {
  khz: u64,
}

impl Frequency {
  pub fn from_khz(khz: u64) -> Self {
    Self { khz }
  }

  pub fn from_mhz(mhz: f64) -> Self {
    let khz = (mhz * 1000.0).round();
    if khz.is_finite() && khz >= 0.0 {
      Self { khz: khz as u64 }
    } else {
      Self { khz: 0 }
    }
  }

  pub fn as_khz(self) -> u64 {
    self.khz
  }

  pub fn as_mhz(self) -> f64 {
    self.khz as f64 / 1000.0
  }
}

impl std::fmt::Display for Frequency {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} MHz", self.as_mhz())
  }
}

impl Serialize for Frequency {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(self.as_mhz())
  }
}

impl<'de> Deserialize<'de> for Frequency {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    Ok(Frequency::from_mhz(f64::deserialize(deserializer)?))
  }
}

/// One `(channelIndex, frequency)` row of a band plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
  pub channel_index: ChannelIndex,
  pub frequency_mhz: Frequency,
}

/// The ordered set of channels a radio supports, unique in both index and
/// frequency, so the index/frequency relation is a bijection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandPlan {
  entries: Vec<ChannelEntry>,
}

impl BandPlan {
  pub fn new(entries: Vec<ChannelEntry>) -> CoreResult<Self> {
    for (i, entry) in entries.iter().enumerate() {
      for earlier in &entries[..i] {
        if earlier.channel_index == entry.channel_index {
          return Err(CoreError::invalid_range(format!(
            "duplicate channel index {} in band plan",
            entry.channel_index
          )));
        }
        if earlier.frequency_mhz == entry.frequency_mhz {
          return Err(CoreError::invalid_range(format!(
            "duplicate frequency {} in band plan",
            entry.frequency_mhz
          )));
        }
      }
    }
    Ok(Self { entries })
  }

  /// Convenience constructor from `(index, MHz)` rows.
  pub fn from_mhz_table<I>(rows: I) -> CoreResult<Self>
  where
    I: IntoIterator<Item = (u32, f64)>,
  {
    Self::new(
      rows
        .into_iter()
        .map(|(idx, mhz)| ChannelEntry {
          channel_index: ChannelIndex(idx),
          frequency_mhz: Frequency::from_mhz(mhz),
        })
        .collect(),
    )
  }

  pub fn frequency_of(&self, index: ChannelIndex) -> Option<Frequency> {
    self
      .entries
      .iter()
      .find(|e| e.channel_index == index)
      .map(|e| e.frequency_mhz)
  }

  pub fn index_of(&self, frequency: Frequency) -> Option<ChannelIndex> {
    self
      .entries
      .iter()
      .find(|e| e.frequency_mhz == frequency)
      .map(|e| e.channel_index)
  }

  pub fn entries(&self) -> &[ChannelEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Static description of a radio: band plan, power range, vendor metadata.
/// Loaded once per radio (with a deadline) and immutable until reloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
  pub band_plan: BandPlan,
  pub min_dbm: PowerDbm,
  pub max_dbm: PowerDbm,
  #[serde(default)]
  pub vendor: BTreeMap<String, String>,
}

impl Capability {
  pub fn new(band_plan: BandPlan, min_dbm: PowerDbm, max_dbm: PowerDbm) -> CoreResult<Self> {
    if min_dbm > max_dbm {
      return Err(CoreError::invalid_range(format!(
        "power range [{}, {}] is inverted",
        min_dbm.dbm(),
        max_dbm.dbm()
      )));
    }
    Ok(Self {
      band_plan,
      min_dbm,
      max_dbm,
      vendor: BTreeMap::new(),
    })
  }

  pub fn with_vendor_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.vendor.insert(key.into(), value.into());
    self
  }

  pub fn contains_power(&self, power: PowerDbm) -> bool {
    self.min_dbm <= power && power <= self.max_dbm
  }
}

/// Last-observed state of a radio, produced by adapter reads and by
/// successful mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioState {
  pub radio_id: RadioId,
  pub power_dbm: PowerDbm,
  pub frequency_mhz: Frequency,
  pub channel_index: ChannelIndex,
  pub timestamp: DateTime<Utc>,
}

/// Registry row returned by list/lookup reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioDescription {
  pub id: RadioId,
  pub model: String,
  pub active: bool,
}

#[cfg(test)]
mod tests {
  use test_case::test_case;

  use crate::error::ErrorKind;

  use super::*;

  fn plan() -> BandPlan {
    BandPlan::from_mhz_table([(1, 2412.0), (6, 2437.0), (11, 2462.0)]).unwrap()
  }

  #[test]
  fn frequency_round_trips_mhz() {
    let f = Frequency::from_mhz(2437.0);
    assert_eq!(f.as_khz(), 2_437_000);
    assert_eq!(f.as_mhz(), 2437.0);
    // fractional MHz resolve to exact kHz
    assert_eq!(Frequency::from_mhz(868.3).as_khz(), 868_300);
  }

  #[test]
  fn frequency_rejects_nonsense_to_zero() {
    assert_eq!(Frequency::from_mhz(-5.0).as_khz(), 0);
    assert_eq!(Frequency::from_mhz(f64::NAN).as_khz(), 0);
  }

  #[test_case(1, Some(2412.0) ; "first channel")]
  #[test_case(6, Some(2437.0) ; "middle channel")]
  #[test_case(11, Some(2462.0) ; "last channel")]
  #[test_case(3, None ; "unknown channel")]
  fn band_plan_index_to_frequency(idx: u32, mhz: Option<f64>) {
    let freq = plan().frequency_of(ChannelIndex(idx));
    assert_eq!(freq, mhz.map(Frequency::from_mhz));
  }

  #[test]
  fn band_plan_is_bijective() {
    let plan = plan();
    for entry in plan.entries() {
      assert_eq!(plan.index_of(entry.frequency_mhz), Some(entry.channel_index));
      assert_eq!(plan.frequency_of(entry.channel_index), Some(entry.frequency_mhz));
    }
    assert_eq!(plan.index_of(Frequency::from_mhz(2417.0)), None);
  }

  #[test]
  fn band_plan_rejects_duplicate_index() {
    let err = BandPlan::from_mhz_table([(1, 2412.0), (1, 2437.0)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRange);
  }

  #[test]
  fn band_plan_rejects_duplicate_frequency() {
    let err = BandPlan::from_mhz_table([(1, 2412.0), (2, 2412.0)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRange);
  }

  #[test]
  fn capability_power_range_is_inclusive() {
    let cap = Capability::new(plan(), PowerDbm(0), PowerDbm(30)).unwrap();
    assert!(cap.contains_power(PowerDbm(0)));
    assert!(cap.contains_power(PowerDbm(30)));
    assert!(!cap.contains_power(PowerDbm(-1)));
    assert!(!cap.contains_power(PowerDbm(31)));
  }

  #[test]
  fn capability_rejects_inverted_range() {
    let err = Capability::new(plan(), PowerDbm(10), PowerDbm(0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRange);
  }
}

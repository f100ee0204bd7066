//! Beauty-filter parameter catalogue and the last-applied value cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Native beauty-filter parameter identifiers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterKey {
    EyeStrength = 0,
    FaceThinning = 1,
    FaceNarrow = 2,
    Chin = 3,
    FaceV = 4,
    FaceSmall = 5,
    Nose = 6,
    Forehead = 7,
    Mouth = 8,
    Philtrum = 9,
    LongNose = 10,
    EyeSpace = 11,
    Smile = 12,
    EyeRotate = 13,
    Canthus = 14,
    BlurStrength = 15,
    WhitenStrength = 16,
    RuddyStrength = 17,
    SharpenStrength = 18,
    NewWhitenStrength = 19,
    QualityStrength = 20,
    EyeBrighten = 21,
    FilterName = 22,
    FilterStrength = 23,
    Lvmu = 24,
    Sticker2dFilter = 25,
    OneKey = 26,
    Watermark = 27,
    Extend = 28,
    Nasolabial = 29,
    BlackEye = 30,
}

const CATALOGUE: [(ParameterKey, &str); 31] = [
    (ParameterKey::EyeStrength, "eye_strength"),
    (ParameterKey::FaceThinning, "face_thinning"),
    (ParameterKey::FaceNarrow, "face_narrow"),
    (ParameterKey::Chin, "face_chin"),
    (ParameterKey::FaceV, "face_v"),
    (ParameterKey::FaceSmall, "face_small"),
    (ParameterKey::Nose, "face_nose"),
    (ParameterKey::Forehead, "face_forehead"),
    (ParameterKey::Mouth, "face_mouth"),
    (ParameterKey::Philtrum, "face_philtrum"),
    (ParameterKey::LongNose, "face_long_nose"),
    (ParameterKey::EyeSpace, "face_eye_space"),
    (ParameterKey::Smile, "face_smile"),
    (ParameterKey::EyeRotate, "face_eye_rotate"),
    (ParameterKey::Canthus, "face_canthus"),
    (ParameterKey::BlurStrength, "face_blur_strength"),
    (ParameterKey::WhitenStrength, "face_whiten_strength"),
    (ParameterKey::RuddyStrength, "face_ruddy_strength"),
    (ParameterKey::SharpenStrength, "face_sharpen_strength"),
    (ParameterKey::NewWhitenStrength, "face_new_whiten_strength"),
    (ParameterKey::QualityStrength, "face_quality_strength"),
    (ParameterKey::EyeBrighten, "face_eye_brighten"),
    (ParameterKey::FilterName, "filter_name"),
    (ParameterKey::FilterStrength, "filter_strength"),
    (ParameterKey::Lvmu, "lvmu"),
    (ParameterKey::Sticker2dFilter, "sticker_2d_filter"),
    (ParameterKey::OneKey, "one_key"),
    (ParameterKey::Watermark, "watermark"),
    (ParameterKey::Extend, "extend"),
    (ParameterKey::Nasolabial, "nasolabial"),
    (ParameterKey::BlackEye, "black_eye"),
];

impl ParameterKey {
    /// Every key in native id order.
    pub fn all() -> impl Iterator<Item = ParameterKey> {
        CATALOGUE.iter().map(|(key, _)| *key)
    }

    pub fn native_id(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        CATALOGUE[self as usize].1
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        CATALOGUE
            .iter()
            .find(|(_, candidate)| candidate.eq_ignore_ascii_case(name))
            .map(|(key, _)| *key)
    }

    pub fn from_native_id(id: i32) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|index| CATALOGUE.get(index))
            .map(|(key, _)| *key)
    }

    /// Keys the session never forwards to the engine.
    pub fn is_forwarded(self) -> bool {
        self != ParameterKey::OneKey
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParameterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown parameter '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// Normalised strength; clamped into `[0, 1]` before it is sent.
    Number(f32),
    Text(String),
    Flag(bool),
}

impl ParameterValue {
    /// The value as it is sent to the engine.
    pub fn normalized(&self) -> ParameterValue {
        match self {
            ParameterValue::Number(value) if value.is_nan() => ParameterValue::Number(0.0),
            ParameterValue::Number(value) => ParameterValue::Number(value.clamp(0.0, 1.0)),
            other => other.clone(),
        }
    }
}

impl From<f32> for ParameterValue {
    fn from(value: f32) -> Self {
        ParameterValue::Number(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Flag(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Number(value) => write!(f, "{value}"),
            ParameterValue::Text(value) => write!(f, "{value:?}"),
            ParameterValue::Flag(value) => write!(f, "{value}"),
        }
    }
}

/// Ordered parameter map submitted with a process job. `None` entries are
/// skipped when applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: BTreeMap<ParameterKey, Option<ParameterValue>>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: ParameterKey, value: impl Into<ParameterValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: ParameterKey, value: impl Into<ParameterValue>) -> &mut Self {
        self.entries.insert(key, Some(value.into()));
        self
    }

    pub fn unset(&mut self, key: ParameterKey) -> &mut Self {
        self.entries.insert(key, None);
        self
    }

    pub fn get(&self, key: ParameterKey) -> Option<&ParameterValue> {
        self.entries.get(&key).and_then(Option::as_ref)
    }

    /// Overlays `other` on top of `self`; entries in `other` win.
    pub fn merge(&mut self, other: &Parameters) {
        for (key, value) in &other.entries {
            self.entries.insert(*key, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParameterKey, Option<&ParameterValue>)> {
        self.entries.iter().map(|(key, value)| (*key, value.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ParameterKey, ParameterValue)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (ParameterKey, ParameterValue)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (key, value) in iter {
            params.set(key, value);
        }
        params
    }
}

/// Last value successfully applied per key.
#[derive(Debug, Default)]
pub struct ParameterCache {
    applied: HashMap<ParameterKey, ParameterValue>,
}

impl ParameterCache {
    pub fn is_current(&self, key: ParameterKey, value: &ParameterValue) -> bool {
        self.applied.get(&key) == Some(value)
    }

    pub fn record(&mut self, key: ParameterKey, value: ParameterValue) {
        self.applied.insert(key, value);
    }

    pub fn get(&self, key: ParameterKey) -> Option<&ParameterValue> {
        self.applied.get(&key)
    }

    pub fn clear(&mut self) {
        self.applied.clear();
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

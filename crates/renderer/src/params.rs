//! Named parameter layers.
//!
//! A [`ParameterStore`] is one independently tunable set of effect settings.
//! It starts from the catalogue defaults, accepts partial updates, and
//! serializes to the flat JSON object used for parameter files.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};

/// A parameter value: numeric scalar, numeric tuple, or enable toggle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Toggle(bool),
    Number(f64),
    Vector(Vec<f64>),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            ParamValue::Vector(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_toggle(&self) -> Option<bool> {
        match self {
            ParamValue::Toggle(value) => Some(*value),
            _ => None,
        }
    }

    fn same_shape(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::Toggle(_), ParamValue::Toggle(_)) => true,
            (ParamValue::Number(_), ParamValue::Number(_)) => true,
            (ParamValue::Vector(a), ParamValue::Vector(b)) => a.len() == b.len(),
            _ => false,
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            ParamValue::Toggle(_) => true,
            ParamValue::Number(value) => value.is_finite(),
            ParamValue::Vector(values) => values.iter().all(|value| value.is_finite()),
        }
    }

    fn describe(&self) -> String {
        match self {
            ParamValue::Toggle(_) => "a toggle".to_string(),
            ParamValue::Number(_) => "a number".to_string(),
            ParamValue::Vector(values) => format!("{} numbers", values.len()),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Toggle(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(value: Vec<f64>) -> Self {
        ParamValue::Vector(value)
    }
}

/// Independent copy of a store's contents.
pub type ParamSnapshot = BTreeMap<String, ParamValue>;

/// Default carried by a catalogue entry.
#[derive(Clone, Copy, Debug)]
pub enum ParamDefault {
    Toggle(bool),
    Number(f64),
    Vector(&'static [f64]),
}

impl ParamDefault {
    pub fn value(self) -> ParamValue {
        match self {
            ParamDefault::Toggle(value) => ParamValue::Toggle(value),
            ParamDefault::Number(value) => ParamValue::Number(value),
            ParamDefault::Vector(values) => ParamValue::Vector(values.to_vec()),
        }
    }
}

/// Panel range for numeric parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// One recognised parameter.
#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub key: &'static str,
    pub default: ParamDefault,
    pub range: Option<ParamRange>,
}

const fn number(key: &'static str, default: f64, min: f64, max: f64, step: f64) -> ParamSpec {
    ParamSpec {
        key,
        default: ParamDefault::Number(default),
        range: Some(ParamRange { min, max, step }),
    }
}

const fn vector(
    key: &'static str,
    default: &'static [f64],
    min: f64,
    max: f64,
    step: f64,
) -> ParamSpec {
    ParamSpec {
        key,
        default: ParamDefault::Vector(default),
        range: Some(ParamRange { min, max, step }),
    }
}

const fn toggle(key: &'static str, default: bool) -> ParamSpec {
    ParamSpec {
        key,
        default: ParamDefault::Toggle(default),
        range: None,
    }
}

/// Every parameter a layer carries, with its default and panel range.
pub const PARAMETERS: &[ParamSpec] = &[
    number("uTemperature", 0.0, -1.67, 1.67, 0.01),
    number("uTint", 0.0, -1.67, 1.67, 0.01),
    number("uContrast", 0.5, 0.0, 1.0, 0.01),
    vector("uHSV", &[0.0, 0.0, 0.0], -1.0, 1.0, 0.01),
    number("uSobel", 0.0, 0.0, 1.0, 0.01),
    number("uMosaic", 200.0, 1.0, 500.0, 1.0),
    number("uBayer", 200.0, 1.0, 500.0, 1.0),
    number("uToon", 3.0, 2.0, 16.0, 1.0),
    number("uToonMin", 0.0, 0.0, 1.0, 0.01),
    number("uToonMax", 1.0, 0.0, 1.0, 0.01),
    number("shiftScale", 0.01, 0.0, 0.1, 0.001),
    vector("uShift", &[0.0, 0.0], -1.0, 1.0, 0.01),
    number("uVignette", 1.5, 0.0, 3.0, 0.01),
    number("uVignetteScale", 1.0, 0.0, 3.0, 0.01),
    vector("uNoiseIntensity", &[0.0, 0.0], 0.0, 1.0, 0.01),
    vector("uNoiseScale", &[1.0, 1.0], 0.0, 10.0, 0.01),
    number("uNoiseTime", 1.0, 0.0, 10.0, 0.01),
    vector("uSNoiseIntensity", &[0.0, 0.0], 0.0, 1.0, 0.01),
    vector("uSNoiseScale", &[1.0, 1.0], 0.0, 10.0, 0.01),
    number("uSNoiseTime", 0.0, 0.0, 10.0, 0.01),
    toggle("isTemperature", true),
    toggle("isTint", true),
    toggle("isContrast", true),
    toggle("isHSV", true),
    toggle("isMosaic", false),
    toggle("isShift", false),
    toggle("isNoise", false),
    toggle("isSNoise", false),
    toggle("isSobel", false),
    toggle("isBayer", false),
    toggle("isToon", false),
    toggle("isVignette", false),
];

/// Looks up the catalogue entry for `key`.
pub fn param_spec(key: &str) -> Option<&'static ParamSpec> {
    PARAMETERS.iter().find(|spec| spec.key == key)
}

/// The complete default snapshot.
pub fn default_snapshot() -> ParamSnapshot {
    PARAMETERS
        .iter()
        .map(|spec| (spec.key.to_string(), spec.default.value()))
        .collect()
}

/// What happens when a key outside the catalogue is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Reject with [`RenderError::UnknownParameter`].
    Strict,
    /// Warn and store the value anyway.
    #[default]
    Permissive,
}

#[derive(Clone, Debug)]
pub struct ParameterStore {
    name: String,
    policy: KeyPolicy,
    values: ParamSnapshot,
}

impl ParameterStore {
    /// Creates a store seeded with the catalogue defaults.
    pub fn new(name: impl Into<String>, policy: KeyPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            values: default_snapshot(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: KeyPolicy) {
        self.policy = policy;
    }

    /// Full deep copy of the current values.
    pub fn get(&self) -> ParamSnapshot {
        self.values.clone()
    }

    pub fn get_one(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: ParamValue) -> Result<()> {
        self.check(key, &value)?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Merges `values`. Every entry is checked before any is stored.
    pub fn set_many(&mut self, values: &ParamSnapshot) -> Result<()> {
        for (key, value) in values {
            self.check(key, value)?;
        }
        for (key, value) in values {
            self.values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Pulls every key this store already holds from `source`.
    ///
    /// Keys only `source` knows about are not copied.
    pub fn copy_from(&mut self, source: &ParameterStore) {
        for (key, value) in self.values.iter_mut() {
            if let Some(incoming) = source.values.get(key) {
                *value = incoming.clone();
            }
        }
    }

    /// Restores the catalogue defaults, dropping any unknown keys.
    pub fn reset(&mut self) {
        self.values = default_snapshot();
    }

    /// Draws every numeric parameter from its panel range. Toggles are kept.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for spec in PARAMETERS {
            let Some(range) = spec.range else {
                continue;
            };
            let value = match spec.default {
                ParamDefault::Number(_) => ParamValue::Number(sample(rng, range)),
                ParamDefault::Vector(defaults) => {
                    ParamValue::Vector(defaults.iter().map(|_| sample(rng, range)).collect())
                }
                ParamDefault::Toggle(_) => continue,
            };
            self.values.insert(spec.key.to_string(), value);
        }
    }

    /// Serializes the store as a flat JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.values)?)
    }

    /// Applies a parameter file, returning the keys that were applied.
    ///
    /// Missing keys keep their current values. Entries whose shape does not
    /// match the catalogue are skipped with a warning; unknown keys follow
    /// the store's [`KeyPolicy`].
    pub fn apply_json(&mut self, text: &str) -> Result<Vec<String>> {
        let incoming: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut accepted = ParamSnapshot::new();
        for (key, raw) in incoming {
            let value: ParamValue = match serde_json::from_value(raw) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(store = %self.name, %key, error = %err, "skipping unreadable parameter");
                    continue;
                }
            };
            match self.check(&key, &value) {
                Ok(()) => {
                    accepted.insert(key, value);
                }
                Err(err @ RenderError::UnknownParameter(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(store = %self.name, %key, error = %err, "skipping parameter");
                }
            }
        }

        let applied = accepted.keys().cloned().collect();
        self.values.extend(accepted);
        Ok(applied)
    }

    fn check(&self, key: &str, value: &ParamValue) -> Result<()> {
        if !value.is_finite() {
            return Err(RenderError::InvalidParameter {
                key: key.to_string(),
                reason: "value is not finite".to_string(),
            });
        }
        match param_spec(key) {
            Some(spec) => {
                let expected = spec.default.value();
                if expected.same_shape(value) {
                    Ok(())
                } else {
                    Err(RenderError::InvalidParameter {
                        key: key.to_string(),
                        reason: format!(
                            "expected {}, got {}",
                            expected.describe(),
                            value.describe()
                        ),
                    })
                }
            }
            None => match self.policy {
                KeyPolicy::Strict => Err(RenderError::UnknownParameter(key.to_string())),
                KeyPolicy::Permissive => {
                    tracing::warn!(store = %self.name, %key, "unknown parameter key; storing anyway");
                    Ok(())
                }
            },
        }
    }
}

fn sample<R: Rng + ?Sized>(rng: &mut R, range: ParamRange) -> f64 {
    if range.step <= 0.0 || range.max <= range.min {
        return range.min;
    }
    let steps = ((range.max - range.min) / range.step).floor() as u64;
    let pick = rng.gen_range(0..=steps);
    let value = range.min + pick as f64 * range.step;
    // Trim accumulated float error so files stay readable.
    (value * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn store() -> ParameterStore {
        ParameterStore::new("first", KeyPolicy::Strict)
    }

    #[test]
    fn defaults_cover_the_catalogue() {
        let store = store();
        assert_eq!(store.get().len(), PARAMETERS.len());
        assert_eq!(store.get_one("uContrast"), Some(&ParamValue::Number(0.5)));
        assert_eq!(store.get_one("uMosaic"), Some(&ParamValue::Number(200.0)));
        assert_eq!(
            store.get_one("uNoiseScale"),
            Some(&ParamValue::Vector(vec![1.0, 1.0]))
        );
        assert_eq!(store.get_one("isHSV"), Some(&ParamValue::Toggle(true)));
        assert_eq!(store.get_one("isMosaic"), Some(&ParamValue::Toggle(false)));
        assert_eq!(store.get_one("nope"), None);
    }

    #[test]
    fn snapshot_is_isolated_from_the_store() {
        let mut store = store();
        let mut snapshot = store.get();
        if let Some(ParamValue::Vector(hsv)) = snapshot.get_mut("uHSV") {
            hsv[0] = 0.75;
        }
        snapshot.insert("uContrast".into(), ParamValue::Number(0.9));
        assert_eq!(store.get_one("uHSV"), Some(&ParamValue::Vector(vec![0.0; 3])));
        assert_eq!(store.get_one("uContrast"), Some(&ParamValue::Number(0.5)));

        store.set("uHSV", vec![0.1, 0.2, 0.3].into()).unwrap();
        assert_eq!(snapshot["uHSV"], ParamValue::Vector(vec![0.75, 0.0, 0.0]));
    }

    #[test]
    fn full_get_then_set_is_idempotent() {
        let mut store = store();
        store.set("uToon", 6.0.into()).unwrap();
        store.set("isSobel", true.into()).unwrap();
        let before = store.get();
        store.set_many(&before).unwrap();
        assert_eq!(store.get(), before);
    }

    #[test]
    fn copy_pulls_only_known_keys() {
        let mut first = store();
        let mut second = ParameterStore::new("second", KeyPolicy::Permissive);
        second.set("uTint", 0.4.into()).unwrap();
        second.set("isVignette", true.into()).unwrap();
        second.set("uExtra", 3.0.into()).unwrap();

        first.copy_from(&second);
        for key in first.get().keys() {
            assert_eq!(first.get_one(key), second.get_one(key));
        }
        assert_eq!(first.get_one("uExtra"), None);
    }

    #[test]
    fn strict_policy_rejects_unknown_keys() {
        let mut store = store();
        assert!(matches!(
            store.set("uUnknown", 1.0.into()),
            Err(RenderError::UnknownParameter(_))
        ));
        assert_eq!(store.get_one("uUnknown"), None);
    }

    #[test]
    fn permissive_policy_stores_unknown_keys() {
        let mut store = ParameterStore::new("first", KeyPolicy::Permissive);
        store.set("uUnknown", 1.0.into()).unwrap();
        assert_eq!(store.get_one("uUnknown"), Some(&ParamValue::Number(1.0)));
    }

    #[test]
    fn shape_mismatches_are_rejected_atomically() {
        let mut store = store();
        let mut partial = ParamSnapshot::new();
        partial.insert("uContrast".into(), ParamValue::Number(0.8));
        partial.insert("uHSV".into(), ParamValue::Number(1.0));
        assert!(matches!(
            store.set_many(&partial),
            Err(RenderError::InvalidParameter { .. })
        ));
        assert_eq!(store.get_one("uContrast"), Some(&ParamValue::Number(0.5)));

        assert!(store.set("uShift", vec![0.1, 0.2, 0.3].into()).is_err());
        assert!(store.set("uTint", f64::NAN.into()).is_err());
    }

    #[test]
    fn importing_a_single_key_changes_only_that_key() {
        let mut store = store();
        store.set("isNoise", true.into()).unwrap();
        let before = store.get();

        let applied = store.apply_json(r#"{"uContrast": 0.8}"#).unwrap();
        assert_eq!(applied, vec!["uContrast".to_string()]);

        let after = store.get();
        for (key, value) in &before {
            if key == "uContrast" {
                assert_eq!(after[key], ParamValue::Number(0.8));
            } else {
                assert_eq!(&after[key], value);
            }
        }
    }

    #[test]
    fn import_skips_malformed_entries() {
        let mut store = store();
        let applied = store
            .apply_json(r#"{"uHSV": 2, "uShift": [0.5, 0.25], "uToon": "many"}"#)
            .unwrap();
        assert_eq!(applied, vec!["uShift".to_string()]);
        assert_eq!(store.get_one("uHSV"), Some(&ParamValue::Vector(vec![0.0; 3])));
    }

    #[test]
    fn strict_import_rejects_unknown_keys() {
        let mut store = store();
        assert!(matches!(
            store.apply_json(r#"{"uContrast": 0.7, "uGhost": 1}"#),
            Err(RenderError::UnknownParameter(_))
        ));
        assert_eq!(store.get_one("uContrast"), Some(&ParamValue::Number(0.5)));
    }

    #[test]
    fn json_round_trips_through_a_fresh_store() {
        let mut source = store();
        source.set("uBayer", 32.0.into()).unwrap();
        source.set("isBayer", true.into()).unwrap();
        let text = source.to_json().unwrap();

        let mut target = store();
        target.apply_json(&text).unwrap();
        assert_eq!(target.get(), source.get());
    }

    #[test]
    fn randomize_stays_in_range_and_keeps_toggles() {
        let mut store = store();
        let toggles_before: Vec<_> = PARAMETERS
            .iter()
            .filter(|spec| spec.range.is_none())
            .map(|spec| store.get_one(spec.key).cloned())
            .collect();

        store.randomize(&mut StdRng::seed_from_u64(7));

        for spec in PARAMETERS {
            let Some(range) = spec.range else { continue };
            let components: Vec<f64> = match store.get_one(spec.key).unwrap() {
                ParamValue::Number(value) => vec![*value],
                ParamValue::Vector(values) => values.clone(),
                ParamValue::Toggle(_) => panic!("{} became a toggle", spec.key),
            };
            for value in components {
                assert!(value >= range.min && value <= range.max, "{}", spec.key);
            }
        }
        let toggles_after: Vec<_> = PARAMETERS
            .iter()
            .filter(|spec| spec.range.is_none())
            .map(|spec| store.get_one(spec.key).cloned())
            .collect();
        assert_eq!(toggles_before, toggles_after);

        store.reset();
        assert_eq!(store.get(), default_snapshot());
    }
}

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::ArcStr;
use crate::error::EngineError;

/// Declaration of a single control, as found in the dashboard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: ControlKind,
}

/// The domain of a control together with its default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ControlKind {
    /// A numeric slider over `[min, max]`.
    Range { min: f64, max: f64, default: f64 },
    /// A multi-select over a fixed set of labels.
    Labels {
        domain: Vec<String>,
        default: Vec<String>,
    },
    /// A single selection out of a fixed list of options.
    Choice {
        options: Vec<String>,
        default: String,
    },
}

impl ControlDef {
    pub fn range(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.into(),
            kind: ControlKind::Range { min, max, default },
        }
    }

    pub fn labels<D, E, S>(name: impl Into<String>, domain: D, default: E) -> Self
    where
        D: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ControlKind::Labels {
                domain: domain.into_iter().map(Into::into).collect(),
                default: default.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn choice<I, S>(name: impl Into<String>, options: I, default: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ControlKind::Choice {
                options: options.into_iter().map(Into::into).collect(),
                default: default.into(),
            },
        }
    }
}

/// The current value of a control.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Number(f64),
    Labels(BTreeSet<ArcStr>),
    Choice(ArcStr),
}

impl ControlValue {
    pub fn labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ControlValue::Labels(labels.into_iter().map(|s| Arc::from(s.as_ref())).collect())
    }

    pub fn choice(option: impl AsRef<str>) -> Self {
        ControlValue::Choice(Arc::from(option.as_ref()))
    }

    fn describe(&self) -> &'static str {
        match self {
            ControlValue::Number(_) => "a number",
            ControlValue::Labels(_) => "a label set",
            ControlValue::Choice(_) => "a choice",
        }
    }
}

impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        ControlValue::Number(value)
    }
}

impl Display for ControlValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlValue::Number(n) => write!(f, "{n}"),
            ControlValue::Labels(labels) => {
                let labels: Vec<&str> = labels.iter().map(|label| &**label).collect();
                write!(f, "{{{}}}", labels.join(", "))
            }
            ControlValue::Choice(option) => write!(f, "{option}"),
        }
    }
}

/// A registered control with its validated domain.
#[derive(Debug, Clone)]
pub struct ControlEntry {
    name: ArcStr,
    domain: Domain,
    value: ControlValue,
    default: ControlValue,
}

#[derive(Debug, Clone)]
enum Domain {
    Range { min: f64, max: f64 },
    Labels(Vec<ArcStr>),
    Choice(Vec<ArcStr>),
}

impl ControlEntry {
    fn from_def(def: &ControlDef) -> Result<Self, EngineError> {
        let name: ArcStr = Arc::from(def.name.as_str());
        let bad = |reason: String| EngineError::Config(format!("control '{}': {reason}", def.name));

        let (domain, default) = match &def.kind {
            ControlKind::Range { min, max, default } => {
                if !(min.is_finite() && max.is_finite()) || min > max {
                    return Err(bad(format!("invalid range [{min}, {max}]")));
                }
                (
                    Domain::Range {
                        min: *min,
                        max: *max,
                    },
                    ControlValue::Number(*default),
                )
            }
            ControlKind::Labels { domain, default } => {
                let mut labels: Vec<ArcStr> = Vec::with_capacity(domain.len());
                for label in domain {
                    if labels.iter().any(|l| &**l == label.as_str()) {
                        return Err(bad(format!("label '{label}' listed twice")));
                    }
                    labels.push(Arc::from(label.as_str()));
                }
                (Domain::Labels(labels), ControlValue::labels(default))
            }
            ControlKind::Choice { options, default } => {
                if options.is_empty() {
                    return Err(bad("no options".into()));
                }
                let options = options.iter().map(|o| Arc::from(o.as_str())).collect();
                (Domain::Choice(options), ControlValue::choice(default))
            }
        };

        let entry = Self {
            name,
            domain,
            value: default.clone(),
            default,
        };

        entry
            .validate(&entry.default)
            .map_err(|err| bad(format!("bad default: {err}")))?;

        Ok(entry)
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn value(&self) -> &ControlValue {
        &self.value
    }

    pub fn default_value(&self) -> &ControlValue {
        &self.default
    }

    /// Bounds of a range control.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self.domain {
            Domain::Range { min, max } => Some((min, max)),
            _ => None,
        }
    }

    /// Every label or option a widget should offer.
    pub fn options(&self) -> &[ArcStr] {
        match &self.domain {
            Domain::Labels(options) | Domain::Choice(options) => options,
            Domain::Range { .. } => &[],
        }
    }

    /// Checks that `value` has the right kind and lies inside the domain.
    pub fn validate(&self, value: &ControlValue) -> Result<(), EngineError> {
        match (&self.domain, value) {
            (Domain::Range { min, max }, ControlValue::Number(n)) => {
                if !n.is_finite() {
                    return Err(EngineError::invalid(&self.name, format!("{n} is not finite")));
                }
                if n < min || n > max {
                    return Err(EngineError::invalid(
                        &self.name,
                        format!("{n} outside [{min}, {max}]"),
                    ));
                }
                Ok(())
            }
            (Domain::Labels(domain), ControlValue::Labels(labels)) => {
                match labels.iter().find(|label| !domain.contains(*label)) {
                    Some(label) => Err(EngineError::invalid(
                        &self.name,
                        format!("label '{label}' is not one of the offered labels"),
                    )),
                    None => Ok(()),
                }
            }
            (Domain::Choice(options), ControlValue::Choice(option)) => {
                if options.contains(option) {
                    Ok(())
                } else {
                    Err(EngineError::invalid(
                        &self.name,
                        format!("'{option}' is not one of the options"),
                    ))
                }
            }
            (domain, value) => Err(EngineError::invalid(
                &self.name,
                format!("expected {}, got {}", domain.describe(), value.describe()),
            )),
        }
    }

    /// Parses the textual form used on the command line: a number, a
    /// comma-separated label list (possibly empty), or a single option.
    pub fn parse(&self, text: &str) -> Result<ControlValue, EngineError> {
        let text = text.trim();
        match self.domain {
            Domain::Range { .. } => text
                .parse::<f64>()
                .map(ControlValue::Number)
                .map_err(|err| EngineError::invalid(&self.name, format!("'{text}': {err}"))),
            Domain::Labels(_) => Ok(ControlValue::labels(
                text.split(',').map(str::trim).filter(|s| !s.is_empty()),
            )),
            Domain::Choice(_) => Ok(ControlValue::choice(text)),
        }
    }
}

impl Domain {
    fn describe(&self) -> &'static str {
        match self {
            Domain::Range { .. } => "a number",
            Domain::Labels(_) => "a label set",
            Domain::Choice(_) => "a choice",
        }
    }
}

/// Holds the current value of every control.
///
/// The store only validates and records values. Telling the graph which
/// derivations went stale is up to the [`Engine`](crate::Engine), which owns
/// both.
#[derive(Debug, Default)]
pub struct ControlStore {
    entries: Vec<ControlEntry>,
    lookup: HashMap<ArcStr, usize>,
}

impl ControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, def: &ControlDef) -> Result<ArcStr, EngineError> {
        let entry = ControlEntry::from_def(def)?;
        let name = entry.name.clone();

        if self.lookup.contains_key(&name) {
            return Err(EngineError::DuplicateName(name));
        }

        self.lookup.insert(name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Result<&ControlEntry, EngineError> {
        self.lookup
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| EngineError::UnknownControl(Arc::from(name)))
    }

    pub fn get(&self, name: &str) -> Result<&ControlValue, EngineError> {
        self.entry(name).map(ControlEntry::value)
    }

    /// Validates and stores `value`. Returns whether the value actually
    /// changed; setting a control to its current value is a no-op.
    pub fn set(&mut self, name: &str, value: ControlValue) -> Result<bool, EngineError> {
        let index = *self
            .lookup
            .get(name)
            .ok_or_else(|| EngineError::UnknownControl(Arc::from(name)))?;
        let entry = &mut self.entries[index];

        entry.validate(&value)?;

        if entry.value == value {
            return Ok(false);
        }

        entry.value = value;
        Ok(true)
    }

    /// Restores the default value of a control.
    pub fn reset(&mut self, name: &str) -> Result<bool, EngineError> {
        let default = self.entry(name)?.default.clone();
        self.set(name, default)
    }

    /// Controls in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &ControlEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ControlStore {
        let mut store = ControlStore::new();
        store
            .register(&ControlDef::range("mass", 2000.0, 6000.0, 6000.0))
            .unwrap();
        store
            .register(&ControlDef::labels(
                "species",
                ["Adelie", "Gentoo", "Chinstrap"],
                ["Adelie", "Gentoo", "Chinstrap"],
            ))
            .unwrap();
        store
            .register(&ControlDef::choice(
                "field",
                ["bill_length_mm", "body_mass_g"],
                "body_mass_g",
            ))
            .unwrap();
        store
    }

    #[test]
    fn test_defaults() {
        let store = store();
        assert_eq!(store.get("mass").unwrap(), &ControlValue::Number(6000.0));
        assert_eq!(
            store.get("species").unwrap(),
            &ControlValue::labels(["Adelie", "Chinstrap", "Gentoo"])
        );
        assert_eq!(
            store.get("field").unwrap(),
            &ControlValue::choice("body_mass_g")
        );
    }

    #[test]
    fn test_unknown_control() {
        let mut store = store();
        assert!(matches!(
            store.get("beak"),
            Err(EngineError::UnknownControl(_))
        ));
        assert!(matches!(
            store.set("beak", 1.0.into()),
            Err(EngineError::UnknownControl(_))
        ));
    }

    #[test]
    fn test_set_reports_change() {
        let mut store = store();
        assert!(store.set("mass", 4000.0.into()).unwrap());
        assert!(!store.set("mass", 4000.0.into()).unwrap());
        assert!(
            !store
                .set("species", ControlValue::labels(["Gentoo", "Adelie", "Chinstrap"]))
                .unwrap()
        );
    }

    #[test]
    fn test_invalid_values_keep_prior() {
        let mut store = store();
        store.set("mass", 3000.0.into()).unwrap();

        for bad in [
            ControlValue::Number(1000.0),
            ControlValue::Number(f64::NAN),
            ControlValue::labels(["Adelie"]),
        ] {
            assert!(matches!(
                store.set("mass", bad),
                Err(EngineError::InvalidValue { .. })
            ));
        }

        assert!(matches!(
            store.set("species", ControlValue::labels(["Emperor"])),
            Err(EngineError::InvalidValue { .. })
        ));
        assert!(matches!(
            store.set("field", ControlValue::choice("sex")),
            Err(EngineError::InvalidValue { .. })
        ));

        assert_eq!(store.get("mass").unwrap(), &ControlValue::Number(3000.0));
    }

    #[test]
    fn test_reset() {
        let mut store = store();
        store.set("mass", 2500.0.into()).unwrap();
        assert!(store.reset("mass").unwrap());
        assert!(!store.reset("mass").unwrap());
        assert_eq!(store.get("mass").unwrap(), &ControlValue::Number(6000.0));
    }

    #[test]
    fn test_bad_definitions() {
        let mut store = ControlStore::new();
        assert!(matches!(
            store.register(&ControlDef::range("x", 5.0, 1.0, 3.0)),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            store.register(&ControlDef::range("x", 0.0, 1.0, 3.0)),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            store.register(&ControlDef::labels("y", ["a"], ["b"])),
            Err(EngineError::Config(_))
        ));

        store.register(&ControlDef::range("x", 0.0, 1.0, 1.0)).unwrap();
        assert!(matches!(
            store.register(&ControlDef::range("x", 0.0, 1.0, 1.0)),
            Err(EngineError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_parse() {
        let store = store();
        let mass = store.entry("mass").unwrap();
        assert_eq!(mass.parse("4500").unwrap(), ControlValue::Number(4500.0));
        assert!(mass.parse("heavy").is_err());

        let species = store.entry("species").unwrap();
        assert_eq!(
            species.parse("Adelie, Gentoo").unwrap(),
            ControlValue::labels(["Adelie", "Gentoo"])
        );
        assert_eq!(
            species.parse("").unwrap(),
            ControlValue::Labels(BTreeSet::new())
        );
    }

    #[test]
    fn test_deserialize_defs() {
        let json = r#"[
            {"name": "mass", "kind": "range", "min": 2000, "max": 6000, "default": 6000},
            {"name": "species", "kind": "labels", "domain": ["A", "B"], "default": ["A"]},
            {"name": "field", "kind": "choice", "options": ["x"], "default": "x"}
        ]"#;

        let defs: Vec<ControlDef> = serde_json::from_str(json).unwrap();
        assert_eq!(defs[0], ControlDef::range("mass", 2000.0, 6000.0, 6000.0));
        assert_eq!(defs[1], ControlDef::labels("species", ["A", "B"], ["A"]));
        assert_eq!(defs[2], ControlDef::choice("field", ["x"], "x"));
    }
}

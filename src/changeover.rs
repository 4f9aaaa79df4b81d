//! Material changeover and effective stage timing.
//!
//! Changeover is the downtime a machine needs to switch from one feedstock
//! to another (powder purge, sieving, chamber cleaning, wire swap). Materials
//! are classified into families; the changeover between two materials
//! depends only on that classification:
//!
//! | From → To | Minutes |
//! |-----------|---------|
//! | same material | 0 |
//! | explicit pair override | override |
//! | same family, different grade | `same_family_minutes` |
//! | different known families | `cross_family_minutes` |
//! | either unclassified | `default_minutes` |
//!
//! The lookup is pure and symmetric: the result depends only on the
//! (from, to, configuration) triple.
//!
//! # Reference
//! Allahverdi et al. (2008), "A survey of scheduling problems with
//! setup times or costs"

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::ChangeoverConfig;
use crate::models::{hours_to_ms, minutes_to_ms, StageDefinition, StageRequirement};

/// Material-family changeover rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeoverRules {
    family_of: HashMap<String, String>,
    /// Overrides keyed by the lesser material, then the greater.
    pair_overrides: BTreeMap<String, BTreeMap<String, i64>>,
    pub same_family_minutes: i64,
    pub cross_family_minutes: i64,
    pub default_minutes: i64,
}

impl ChangeoverRules {
    /// Builds the lookup tables from configuration.
    ///
    /// A material listed in several families keeps the first family in
    /// family-name order.
    pub fn from_config(config: &ChangeoverConfig) -> Self {
        let mut family_of = HashMap::new();
        for (family, materials) in &config.families {
            for material in materials {
                family_of
                    .entry(material.clone())
                    .or_insert_with(|| family.clone());
            }
        }
        let mut pair_overrides: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for p in &config.pair_overrides {
            let (lo, hi) = ordered(&p.from, &p.to);
            pair_overrides
                .entry(lo.to_string())
                .or_default()
                .insert(hi.to_string(), p.minutes);
        }
        Self {
            family_of,
            pair_overrides,
            same_family_minutes: config.same_family_minutes,
            cross_family_minutes: config.cross_family_minutes,
            default_minutes: config.default_minutes,
        }
    }

    /// Family a material belongs to, if classified.
    pub fn family(&self, material: &str) -> Option<&str> {
        self.family_of.get(material).map(String::as_str)
    }

    /// Changeover minutes between two materials.
    pub fn changeover_minutes(&self, from: &str, to: &str) -> i64 {
        if from == to {
            return 0;
        }
        let (lo, hi) = ordered(from, to);
        if let Some(&minutes) = self.pair_overrides.get(lo).and_then(|m| m.get(hi)) {
            return minutes;
        }
        match (self.family(from), self.family(to)) {
            (Some(a), Some(b)) if a == b => self.same_family_minutes,
            (Some(_), Some(_)) => self.cross_family_minutes,
            _ => self.default_minutes,
        }
    }

    /// Changeover (ms) between optional materials.
    ///
    /// Nothing loaded, or a stage with no material, needs no changeover.
    pub fn changeover_ms(&self, from: Option<&str>, to: Option<&str>) -> i64 {
        match (from, to) {
            (Some(from), Some(to)) => minutes_to_ms(self.changeover_minutes(from, to)),
            _ => 0,
        }
    }
}

impl Default for ChangeoverRules {
    fn default() -> Self {
        Self::from_config(&ChangeoverConfig::default())
    }
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Time components of one stage execution on a machine (ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectiveDuration {
    /// Material changeover before setup (gap before the machine interval).
    pub changeover_ms: i64,
    pub setup_ms: i64,
    pub run_ms: i64,
    pub teardown_ms: i64,
}

impl EffectiveDuration {
    /// Length of the machine interval: setup + run + teardown.
    pub fn occupied_ms(&self) -> i64 {
        self.setup_ms + self.run_ms + self.teardown_ms
    }

    /// Everything including changeover.
    pub fn total_ms(&self) -> i64 {
        self.changeover_ms + self.occupied_ms()
    }
}

/// Merges requirement overrides with definition defaults.
#[derive(Debug, Clone, Default)]
pub struct TimingCalculator {
    rules: ChangeoverRules,
}

impl TimingCalculator {
    pub fn new(rules: ChangeoverRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ChangeoverRules {
        &self.rules
    }

    /// Changeover minutes between two materials.
    pub fn changeover_minutes(&self, from: &str, to: &str) -> i64 {
        self.rules.changeover_minutes(from, to)
    }

    /// Setup, run and teardown for a requirement, no changeover.
    ///
    /// Requirement overrides win over definition defaults.
    pub fn base_duration(
        &self,
        requirement: &StageRequirement,
        definition: &StageDefinition,
    ) -> EffectiveDuration {
        let hours = requirement
            .duration_hours_override
            .unwrap_or(definition.default_duration_hours);
        let setup = requirement
            .setup_minutes_override
            .unwrap_or(definition.default_setup_minutes);
        let teardown = requirement
            .teardown_minutes_override
            .unwrap_or(definition.default_teardown_minutes);
        EffectiveDuration {
            changeover_ms: 0,
            setup_ms: minutes_to_ms(setup),
            run_ms: hours_to_ms(hours),
            teardown_ms: minutes_to_ms(teardown),
        }
    }

    /// Full timing when following `previous_material` on the machine.
    pub fn effective_duration(
        &self,
        requirement: &StageRequirement,
        definition: &StageDefinition,
        previous_material: Option<&str>,
        material: Option<&str>,
    ) -> EffectiveDuration {
        EffectiveDuration {
            changeover_ms: self.rules.changeover_ms(previous_material, material),
            ..self.base_duration(requirement, definition)
        }
    }

    /// Hourly rate after overrides.
    pub fn hourly_rate(&self, requirement: &StageRequirement, definition: &StageDefinition) -> f64 {
        requirement
            .hourly_rate_override
            .unwrap_or(definition.default_hourly_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ChangeoverRules {
        ChangeoverRules::from_config(
            &ChangeoverConfig::default()
                .with_family("titanium", ["Ti-6Al-4V", "Ti-6Al-2Sn"])
                .with_family("nickel", ["Inconel 718", "Inconel 625"])
                .with_pair_override("Inconel 625", "Inconel 718", 15),
        )
    }

    #[test]
    fn test_changeover_classes() {
        let r = rules();
        assert_eq!(r.changeover_minutes("Ti-6Al-4V", "Ti-6Al-4V"), 0);
        assert_eq!(r.changeover_minutes("Ti-6Al-4V", "Ti-6Al-2Sn"), 30);
        assert_eq!(r.changeover_minutes("Ti-6Al-4V", "Inconel 718"), 120);
        assert_eq!(r.changeover_minutes("Ti-6Al-4V", "AlSi10Mg"), 60);
        assert_eq!(r.changeover_minutes("AlSi10Mg", "316L"), 60);
    }

    #[test]
    fn test_pair_override_is_symmetric() {
        let r = rules();
        assert_eq!(r.changeover_minutes("Inconel 718", "Inconel 625"), 15);
        assert_eq!(r.changeover_minutes("Inconel 625", "Inconel 718"), 15);
    }

    #[test]
    fn test_rules_serialize_to_json() {
        let r = rules();
        let json = serde_json::to_string(&r).unwrap();
        let back: ChangeoverRules = serde_json::from_str(&json).unwrap();
        assert_eq!(back.changeover_minutes("Inconel 718", "Inconel 625"), 15);
        assert_eq!(back.changeover_minutes("Ti-6Al-4V", "Inconel 718"), 120);
        assert_eq!(back.family("Ti-6Al-2Sn"), Some("titanium"));
    }

    #[test]
    fn test_changeover_ms_with_missing_material() {
        let r = rules();
        assert_eq!(r.changeover_ms(None, Some("Ti-6Al-4V")), 0);
        assert_eq!(r.changeover_ms(Some("Ti-6Al-4V"), None), 0);
        assert_eq!(
            r.changeover_ms(Some("Ti-6Al-4V"), Some("Inconel 718")),
            120 * 60_000
        );
    }

    #[test]
    fn test_first_family_wins() {
        let r = ChangeoverRules::from_config(
            &ChangeoverConfig::default()
                .with_family("b-steel", ["17-4PH"])
                .with_family("a-stainless", ["17-4PH", "316L"]),
        );
        assert_eq!(r.family("17-4PH"), Some("a-stainless"));
        assert_eq!(r.changeover_minutes("17-4PH", "316L"), 30);
    }

    #[test]
    fn test_effective_duration_overrides_win() {
        let calc = TimingCalculator::new(rules());
        let def = StageDefinition::new("SLS", 8.0)
            .with_setup_minutes(45)
            .with_teardown_minutes(30)
            .with_hourly_rate(150.0);

        let plain = StageRequirement::new("P1/SLS", "P1", "SLS", 1);
        let d = calc.effective_duration(&plain, &def, Some("Ti-6Al-4V"), Some("Ti-6Al-4V"));
        assert_eq!(d.changeover_ms, 0);
        assert_eq!(d.setup_ms, 45 * 60_000);
        assert_eq!(d.run_ms, 8 * 3_600_000);
        assert_eq!(d.teardown_ms, 30 * 60_000);
        assert_eq!(d.occupied_ms(), d.total_ms());
        assert!((calc.hourly_rate(&plain, &def) - 150.0).abs() < 1e-10);

        let tuned = StageRequirement::new("P2/SLS", "P2", "SLS", 1)
            .with_duration_hours(6.5)
            .with_setup_minutes(0)
            .with_hourly_rate(99.0);
        let d = calc.effective_duration(&tuned, &def, Some("Ti-6Al-4V"), Some("Inconel 718"));
        assert_eq!(d.changeover_ms, 120 * 60_000);
        assert_eq!(d.setup_ms, 0);
        assert_eq!(d.run_ms, 6 * 3_600_000 + 1_800_000);
        assert_eq!(d.total_ms(), d.occupied_ms() + 120 * 60_000);
        assert!((calc.hourly_rate(&tuned, &def) - 99.0).abs() < 1e-10);
    }
}

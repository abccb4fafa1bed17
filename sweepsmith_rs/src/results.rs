use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::accumulator::{Accumulator, ResultValue};
use crate::error::{SweepError, SweepResult};
use crate::params::{ParameterSpace, Value};
use crate::storage;

/// Result name excluded from collection equality. The runner stores the
/// sweep's wall-clock time under it.
pub const ELAPSED_TIME_RESULT: &str = "elapsed_time";

/// Ordered multi-map from result name to accumulator snapshots, paired with
/// the parameter space that produced them.
///
/// In a finished sweep entry `i` of every list belongs to variation `i`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsCollection {
    entries: Vec<(String, Vec<Accumulator>)>,
    params: ParameterSpace,
}

impl ResultsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: ParameterSpace) -> Self {
        Self {
            entries: Vec::new(),
            params,
        }
    }

    /// Build a collection from a set of accumulators, each becoming a
    /// singleton list.
    pub fn from_accumulators(accumulators: impl IntoIterator<Item = Accumulator>) -> Self {
        let mut collection = Self::new();
        for acc in accumulators {
            collection.add(acc);
        }
        collection
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Vec<Accumulator>> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, list)| list)
    }

    /// Set the current entry for `acc.name()`: replaces the most recent
    /// accumulator, or creates a singleton list when the name is new.
    ///
    /// Every entry under one name shares a variant, so a replacement of a
    /// different variant resets the name to a singleton list.
    pub fn add(&mut self, acc: Accumulator) {
        match self.slot_mut(acc.name()) {
            Some(list) => match list.last_mut() {
                Some(last) if last.kind_code() == acc.kind_code() => *last = acc,
                _ => *list = vec![acc],
            },
            None => self.entries.push((acc.name().to_string(), vec![acc])),
        }
    }

    /// Append a new entry under `acc.name()`. Every entry under one name
    /// must share a variant.
    pub fn append(&mut self, acc: Accumulator) -> SweepResult<()> {
        match self.slot_mut(acc.name()) {
            Some(list) => {
                if let Some(last) = list.last() {
                    if last.kind_code() != acc.kind_code() {
                        return Err(SweepError::incompatible(
                            last.name(),
                            acc.name(),
                            format!(
                                "cannot append {} to a list of {}",
                                acc.kind_name(),
                                last.kind_name()
                            ),
                        ));
                    }
                }
                list.push(acc);
            }
            None => self.entries.push((acc.name().to_string(), vec![acc])),
        }
        Ok(())
    }

    /// Append every entry of `other`, name by name, copying in names that
    /// only `other` has.
    pub fn append_all(&mut self, other: &ResultsCollection) -> SweepResult<()> {
        for (_, list) in &other.entries {
            for acc in list {
                self.append(acc.clone())?;
            }
        }
        Ok(())
    }

    /// Merge the last accumulator of every name in `self` with the last one
    /// under the same name in `other`.
    ///
    /// Names only present in `other` are ignored. An empty collection adopts
    /// `other`'s entries, which lets a repetition loop start from nothing.
    pub fn merge(&mut self, other: &ResultsCollection) -> SweepResult<()> {
        if self.entries.is_empty() {
            self.entries = other.entries.clone();
            return Ok(());
        }

        let mut pairs = Vec::with_capacity(self.entries.len());
        for (name, _) in &self.entries {
            let incoming = other
                .last(name)
                .ok_or_else(|| SweepError::MissingKey { name: name.clone() })?;
            pairs.push(incoming);
        }
        for ((_, list), incoming) in self.entries.iter_mut().zip(pairs) {
            if let Some(last) = list.last_mut() {
                last.merge(incoming)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[Accumulator]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, list)| list.as_slice())
    }

    /// Most recent accumulator under `name`.
    pub fn last(&self, name: &str) -> Option<&Accumulator> {
        self.get(name).and_then(<[Accumulator]>::last)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of distinct result names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn params(&self) -> &ParameterSpace {
        &self.params
    }

    pub fn set_params(&mut self, params: ParameterSpace) {
        self.params = params;
    }

    /// Accumulators under `name`, restricted to the variations matching
    /// `fixed` when given.
    fn select(&self, name: &str, fixed: Option<&[(&str, Value)]>) -> SweepResult<Vec<&Accumulator>> {
        let list = self.get(name).ok_or_else(|| SweepError::MissingKey {
            name: name.to_string(),
        })?;
        match fixed {
            None => Ok(list.iter().collect()),
            Some(fixed) => {
                let indexes = self.params.pack_indexes(fixed)?.into_vec();
                Ok(indexes.into_iter().filter_map(|i| list.get(i)).collect())
            }
        }
    }

    /// Current statistic of every entry under `name`, in order.
    pub fn values_for(
        &self,
        name: &str,
        fixed: Option<&[(&str, Value)]>,
    ) -> SweepResult<Vec<ResultValue>> {
        Ok(self
            .select(name, fixed)?
            .into_iter()
            .map(Accumulator::result)
            .collect())
    }

    /// Numeric statistics of every entry under `name`; non-numeric MISC
    /// values come back as NaN.
    pub fn values_f64_for(&self, name: &str, fixed: Option<&[(&str, Value)]>) -> SweepResult<Vec<f64>> {
        Ok(self
            .values_for(name, fixed)?
            .iter()
            .map(|v| v.as_f64().unwrap_or(f64::NAN))
            .collect())
    }

    pub fn confidence_intervals_for(
        &self,
        name: &str,
        confidence_percent: f64,
        fixed: Option<&[(&str, Value)]>,
    ) -> SweepResult<Vec<[f64; 2]>> {
        self.select(name, fixed)?
            .into_iter()
            .map(|acc| acc.confidence_interval(confidence_percent))
            .collect()
    }

    /// Write the collection as JSON, atomically replacing `path`.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        storage::write_json_atomic(path, self)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        storage::read_json(path)
    }
}

impl PartialEq for ResultsCollection {
    fn eq(&self, other: &Self) -> bool {
        let relevant = |c: &ResultsCollection| -> Vec<String> {
            let mut names: Vec<String> = c
                .names()
                .filter(|n| *n != ELAPSED_TIME_RESULT)
                .map(str::to_string)
                .collect();
            names.sort();
            names
        };
        let names = relevant(self);
        if names != relevant(other) || self.params != other.params {
            return false;
        }
        names.iter().all(|name| self.get(name) == other.get(name))
    }
}

impl fmt::Display for ResultsCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results for {}", self.params)?;
        for (name, list) in &self.entries {
            let values: Vec<String> = list.iter().map(|acc| acc.result().to_string()).collect();
            writeln!(f, "  {name}: [{}]", values.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultsCollection {
        let mut collection = ResultsCollection::new();
        collection.add(Accumulator::sum_of("sum", 13.0));
        collection.add(Accumulator::ratio_of("ratio", 3.0, 10.0));
        collection
    }

    #[test]
    fn add_replaces_and_append_pushes() {
        let mut collection = sample();
        collection.add(Accumulator::sum_of("sum", 20.0));
        assert_eq!(collection.get("sum").unwrap().len(), 1);
        assert_eq!(collection.last("sum").unwrap().result_f64(), Some(20.0));

        collection.append(Accumulator::sum_of("sum", 5.0)).unwrap();
        assert_eq!(collection.get("sum").unwrap().len(), 2);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn append_rejects_a_different_variant() {
        let mut collection = sample();
        let err = collection
            .append(Accumulator::ratio_of("sum", 1.0, 2.0))
            .unwrap_err();
        assert!(matches!(err, SweepError::IncompatibleMerge { .. }));
        // Replacement may change the variant.
        collection.add(Accumulator::ratio_of("sum", 1.0, 2.0));
        assert_eq!(collection.last("sum").unwrap().kind_name(), "RATIO");
    }

    #[test]
    fn replacing_with_another_variant_resets_the_list() {
        let mut collection = ResultsCollection::new();
        collection.append(Accumulator::sum_of("r", 1.0)).unwrap();
        collection.append(Accumulator::sum_of("r", 2.0)).unwrap();

        collection.add(Accumulator::sum_of("r", 5.0));
        let kinds: Vec<_> = collection.get("r").unwrap().iter().map(Accumulator::kind_name).collect();
        assert_eq!(kinds, vec!["SUM", "SUM"]);

        collection.add(Accumulator::ratio_of("r", 1.0, 2.0));
        let kinds: Vec<_> = collection.get("r").unwrap().iter().map(Accumulator::kind_name).collect();
        assert_eq!(kinds, vec!["RATIO"]);
        assert_eq!(collection.last("r").unwrap().result_f64(), Some(0.5));

        // Appending now checks against the new variant.
        collection.append(Accumulator::ratio_of("r", 1.0, 4.0)).unwrap();
        assert!(collection.append(Accumulator::sum_of("r", 1.0)).is_err());
    }

    #[test]
    fn merge_combines_last_entries() {
        let mut collection = sample();
        let mut other = sample();
        other.add(Accumulator::sum_of("extra", 1.0));
        collection.merge(&other).unwrap();

        assert_eq!(collection.last("sum").unwrap().result_f64(), Some(26.0));
        assert_eq!(collection.last("ratio").unwrap().result_f64(), Some(0.3));
        assert!(!collection.contains("extra"));
    }

    #[test]
    fn merge_requires_every_name() {
        let mut collection = sample();
        let other = ResultsCollection::from_accumulators([Accumulator::sum_of("sum", 1.0)]);
        let err = collection.merge(&other).unwrap_err();
        assert_eq!(
            err,
            SweepError::MissingKey {
                name: "ratio".into()
            }
        );
        // Nothing was merged before the missing name was detected.
        assert_eq!(collection.last("sum").unwrap().result_f64(), Some(13.0));
    }

    #[test]
    fn empty_collection_adopts_merged_entries() {
        let mut collection = ResultsCollection::new();
        collection.merge(&sample()).unwrap();
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn append_all_copies_new_names() {
        let mut collection = sample();
        let mut other = sample();
        other.add(Accumulator::sum_of("extra", 1.0));
        collection.append_all(&other).unwrap();
        assert_eq!(collection.get("sum").unwrap().len(), 2);
        assert_eq!(collection.get("extra").unwrap().len(), 1);
    }

    #[test]
    fn values_for_filters_by_fixed_parameters() {
        let mut space = ParameterSpace::new();
        space.add("a", vec![1, 2]).add("b", vec![10, 20, 30]);
        space.set_unpack("a", true).unwrap();
        space.set_unpack("b", true).unwrap();

        let mut collection = ResultsCollection::with_params(space);
        for combo in collection.params().clone().combinations() {
            let a = combo.get_f64("a").unwrap();
            let b = combo.get_f64("b").unwrap();
            collection.append(Accumulator::sum_of("r", a * b)).unwrap();
        }

        let all = collection.values_f64_for("r", None).unwrap();
        assert_eq!(all, vec![10.0, 20.0, 30.0, 20.0, 40.0, 60.0]);
        let fixed = [("a", Value::from(2))];
        let some = collection.values_f64_for("r", Some(&fixed)).unwrap();
        assert_eq!(some, vec![20.0, 40.0, 60.0]);

        let bad = [("b", Value::from(15))];
        assert!(matches!(
            collection.values_for("r", Some(&bad)),
            Err(SweepError::InvalidValue { .. })
        ));
        assert!(matches!(
            collection.values_for("missing", None),
            Err(SweepError::MissingKey { .. })
        ));
    }

    #[test]
    fn equality_skips_elapsed_time() {
        let mut a = sample();
        let mut b = sample();
        a.add(Accumulator::misc_of(ELAPSED_TIME_RESULT, 1.5));
        b.add(Accumulator::misc_of(ELAPSED_TIME_RESULT, 9.0));
        assert_eq!(a, b);
        b.add(Accumulator::sum_of("sum", 14.0));
        assert_ne!(a, b);
    }
}

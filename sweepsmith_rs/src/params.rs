use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::combinator::{
    IndexCombination, SeekableIndexIterator, matching_indices, rank_mixed_radix,
    total_variations, unrank_mixed_radix,
};
use crate::error::{SweepError, SweepResult};

/// Parameter name that never participates in space equality. Changing the
/// repetition ceiling between two runs must not invalidate a checkpoint.
pub const REP_MAX_PARAM: &str = "rep_max";

/// A single concrete parameter value.
///
/// Numeric variants compare equal across `Int` and `Float` so that a fixed
/// assignment written as `1.0` matches an integer domain `[1, 2]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(_) | Value::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// A named parameter binds either one value or an ordered list of values.
/// Only lists can be unpacked into a sweep dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameter {
    List(Vec<Value>),
    Scalar(Value),
}

impl Parameter {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Parameter::Scalar(_))
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Parameter::Scalar(value) => Some(value),
            Parameter::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Parameter::List(values) => Some(values),
            Parameter::Scalar(_) => None,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Scalar(value) => write!(f, "{value}"),
            Parameter::List(values) => {
                f.write_str("[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<Value> for Parameter {
    fn from(value: Value) -> Self {
        Parameter::Scalar(value)
    }
}

macro_rules! scalar_parameter_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Parameter {
                fn from(value: $ty) -> Self {
                    Parameter::Scalar(Value::from(value))
                }
            }
        )*
    };
}

scalar_parameter_from!(bool, i64, i32, usize, f64, &str, String);

impl<T: Into<Value>> From<Vec<T>> for Parameter {
    fn from(values: Vec<T>) -> Self {
        Parameter::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Parameter {
    fn from(values: [T; N]) -> Self {
        Parameter::List(values.into_iter().map(Into::into).collect())
    }
}

/// Result of a pack-index lookup. Fixing every unpacked parameter pins down
/// exactly one variation; anything less yields the list of matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackIndexes {
    Single(usize),
    Many(Vec<usize>),
}

impl PackIndexes {
    pub fn as_single(&self) -> Option<usize> {
        match self {
            PackIndexes::Single(index) => Some(*index),
            PackIndexes::Many(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<usize> {
        match self {
            PackIndexes::Single(index) => vec![index],
            PackIndexes::Many(indexes) => indexes,
        }
    }
}

fn default_ignored() -> BTreeSet<String> {
    BTreeSet::from([REP_MAX_PARAM.to_string()])
}

/// Named parameters plus the subset swept by a run.
///
/// Unpacked names are kept in the order they were marked; that order defines
/// the dimension order of the variation grid (last marked varies fastest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpace {
    parameters: Vec<(String, Parameter)>,
    unpacked: Vec<String>,
    #[serde(default = "default_ignored")]
    ignored: BTreeSet<String>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            parameters: Vec::new(),
            unpacked: Vec::new(),
            ignored: default_ignored(),
        }
    }
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a parameter. Overwriting an unpacked parameter
    /// with a scalar drops its unpack mark.
    pub fn add(&mut self, name: &str, value: impl Into<Parameter>) -> &mut Self {
        let value = value.into();
        if value.is_scalar() {
            self.unpacked.retain(|n| n != name);
        }
        match self.parameters.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.parameters.push((name.to_string(), value)),
        }
        self
    }

    /// Mark (or unmark) a list parameter as a sweep dimension.
    pub fn set_unpack(&mut self, name: &str, flag: bool) -> SweepResult<()> {
        let Some(parameter) = self.get(name) else {
            return Err(SweepError::invalid_kind(name, "no such parameter"));
        };
        if !flag {
            self.unpacked.retain(|n| n != name);
            return Ok(());
        }
        if parameter.is_scalar() {
            return Err(SweepError::invalid_kind(
                name,
                "only list parameters can be unpacked",
            ));
        }
        if !self.is_unpacked(name) {
            self.unpacked.push(name.to_string());
        }
        Ok(())
    }

    /// Exclude a parameter from equality, alongside `rep_max`.
    pub fn ignore_in_equality(&mut self, name: &str) {
        self.ignored.insert(name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.parameters.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn unpacked_names(&self) -> &[String] {
        &self.unpacked
    }

    pub fn is_unpacked(&self, name: &str) -> bool {
        self.unpacked.iter().any(|n| n == name)
    }

    /// Values of every unpacked dimension, in dimension order.
    fn dimensions(&self) -> Vec<&[Value]> {
        self.unpacked
            .iter()
            .map(|name| {
                self.get(name)
                    .and_then(Parameter::as_list)
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Size of every unpacked dimension, in dimension order.
    pub fn radices(&self) -> Vec<usize> {
        self.dimensions().iter().map(|d| d.len()).collect()
    }

    /// Number of variations in the sweep; 1 when nothing is unpacked.
    pub fn num_variations(&self) -> usize {
        total_variations(&self.radices())
    }

    /// Lazy iterator over every variation in canonical order.
    pub fn combinations(&self) -> Combinations<'_> {
        self.combinations_from(0)
    }

    /// Iterator starting directly at `start_index`, skipping earlier
    /// variations without visiting them.
    pub fn combinations_from(&self, start_index: usize) -> Combinations<'_> {
        Combinations {
            space: self,
            inner: SeekableIndexIterator::starting_at(&self.radices(), start_index),
        }
    }

    /// Address one variation directly. None when `index` is out of range.
    pub fn combination(&self, index: usize) -> Option<Combination<'_>> {
        let digits = unrank_mixed_radix(index, &self.radices())?;
        Some(Combination {
            space: self,
            index,
            digits,
        })
    }

    /// Indices of every variation agreeing with `fixed`.
    ///
    /// Names must be unpacked parameters, or fixed parameters whose value
    /// matches. Fixing every unpacked name returns a single index.
    pub fn pack_indexes(&self, fixed: &[(&str, Value)]) -> SweepResult<PackIndexes> {
        let dimensions = self.dimensions();
        let radices: Vec<usize> = dimensions.iter().map(|d| d.len()).collect();
        let mut constraints: Vec<Option<usize>> = vec![None; radices.len()];

        for (name, value) in fixed {
            let Some(parameter) = self.get(name) else {
                return Err(SweepError::invalid_kind(name, "no such parameter"));
            };
            match self.unpacked.iter().position(|n| n == name) {
                Some(dim) => {
                    let Some(digit) = dimensions[dim].iter().position(|v| v == value) else {
                        return Err(SweepError::InvalidValue {
                            name: name.to_string(),
                            value: value.to_string(),
                        });
                    };
                    constraints[dim] = Some(digit);
                }
                None => {
                    if parameter.as_scalar() != Some(value) {
                        return Err(SweepError::InvalidValue {
                            name: name.to_string(),
                            value: value.to_string(),
                        });
                    }
                }
            }
        }

        if constraints.iter().all(Option::is_some) {
            let digits: Vec<usize> = constraints.iter().flatten().copied().collect();
            let index = rank_mixed_radix(&digits, &radices).unwrap_or_default();
            return Ok(PackIndexes::Single(index));
        }
        Ok(PackIndexes::Many(matching_indices(&constraints, &radices)))
    }

    /// Stable digest of the equality-relevant content, for checkpoint
    /// metadata and logs.
    pub fn fingerprint(&self) -> String {
        let mut relevant: Vec<(&String, &Parameter)> = self
            .parameters
            .iter()
            .filter(|(n, _)| !self.ignored.contains(n))
            .map(|(n, p)| (n, p))
            .collect();
        relevant.sort_by(|a, b| a.0.cmp(b.0));
        let mut unpacked: Vec<&String> = self.unpacked.iter().collect();
        unpacked.sort();

        let mut hasher = Sha256::new();
        for (name, parameter) in relevant {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            // Serialising a Parameter cannot fail: it holds only plain values.
            hasher.update(serde_json::to_vec(parameter).unwrap_or_default());
            hasher.update([0xffu8]);
        }
        for name in unpacked {
            hasher.update(b"*");
            hasher.update(name.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for ParameterSpace {
    fn eq(&self, other: &Self) -> bool {
        let relevant = |space: &ParameterSpace| -> Vec<(String, Parameter)> {
            let mut params: Vec<(String, Parameter)> = space
                .parameters
                .iter()
                .filter(|(n, _)| !self.ignored.contains(n) && !other.ignored.contains(n))
                .cloned()
                .collect();
            params.sort_by(|a, b| a.0.cmp(&b.0));
            params
        };
        let unpacked_set = |space: &ParameterSpace| -> BTreeSet<String> {
            space.unpacked.iter().cloned().collect()
        };
        relevant(self) == relevant(other) && unpacked_set(self) == unpacked_set(other)
    }
}

impl fmt::Display for ParameterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (name, parameter)) in self.parameters.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            let marker = if self.is_unpacked(name) { "*" } else { "" };
            write!(f, "{name}{marker}: {parameter}")?;
        }
        f.write_str("}")
    }
}

/// One concrete variation of a [`ParameterSpace`].
///
/// Borrows the space it came from rather than copying it; the space is
/// immutable for as long as any combination is alive.
#[derive(Debug, Clone)]
pub struct Combination<'a> {
    space: &'a ParameterSpace,
    index: usize,
    digits: IndexCombination,
}

impl<'a> Combination<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn space(&self) -> &'a ParameterSpace {
        self.space
    }

    pub fn digits(&self) -> &[usize] {
        &self.digits
    }

    /// Value bound to `name` in this variation. Unpacked parameters yield
    /// the selected element; non-unpacked lists have no single value and
    /// yield None (see [`Combination::get_list`]).
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        let parameter = self.space.get(name)?;
        match self.space.unpacked.iter().position(|n| n == name) {
            Some(dim) => parameter.as_list()?.get(self.digits[dim]),
            None => parameter.as_scalar(),
        }
    }

    /// A non-unpacked list parameter, repeated unchanged in every variation.
    pub fn get_list(&self, name: &str) -> Option<&'a [Value]> {
        if self.space.is_unpacked(name) {
            return None;
        }
        self.space.get(name)?.as_list()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    /// Copy of the originating space with every unpacked parameter pinned to
    /// this variation's value.
    pub fn to_space(&self) -> ParameterSpace {
        let mut space = ParameterSpace {
            parameters: Vec::with_capacity(self.space.parameters.len()),
            unpacked: Vec::new(),
            ignored: self.space.ignored.clone(),
        };
        for (name, parameter) in &self.space.parameters {
            let pinned = match self.get(name) {
                Some(value) if self.space.is_unpacked(name) => Parameter::Scalar(value.clone()),
                _ => parameter.clone(),
            };
            space.parameters.push((name.clone(), pinned));
        }
        space
    }
}

impl fmt::Display for Combination<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, name) in self.space.unpacked.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match self.get(name) {
                Some(value) => write!(f, "{name}={value}")?,
                None => write!(f, "{name}=?")?,
            }
        }
        Ok(())
    }
}

/// Restartable iterator over the variations of a space, see
/// [`ParameterSpace::combinations`].
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    space: &'a ParameterSpace,
    inner: SeekableIndexIterator,
}

impl<'a> Iterator for Combinations<'a> {
    type Item = Combination<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.inner.current_global_index()?;
        let digits = self.inner.next()?;
        Some(Combination {
            space: self.space,
            index,
            digits,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Combinations<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_space() -> ParameterSpace {
        let mut space = ParameterSpace::new();
        space.add("first", 10).add("second", 20);
        space
    }

    #[test]
    fn add_inserts_and_overwrites() {
        let mut space = base_space();
        space.add("third", vec![1, 3, 2, 5]);
        assert_eq!(space.len(), 3);
        space.add("first", 11);
        assert_eq!(space.len(), 3);
        assert_eq!(space.get("first"), Some(&Parameter::from(11)));
    }

    #[test]
    fn unpack_requires_a_list() {
        let mut space = base_space();
        space.add("third", vec![1, 3, 2, 5]);
        assert!(space.set_unpack("third", true).is_ok());

        let err = space.set_unpack("first", true).unwrap_err();
        assert!(matches!(err, SweepError::InvalidParameterKind { .. }));
        let err = space.set_unpack("missing", true).unwrap_err();
        assert!(matches!(err, SweepError::InvalidParameterKind { .. }));

        space.set_unpack("third", false).unwrap();
        assert!(space.unpacked_names().is_empty());
    }

    #[test]
    fn overwriting_with_scalar_drops_unpack_mark() {
        let mut space = base_space();
        space.add("third", vec![1, 2]);
        space.set_unpack("third", true).unwrap();
        space.add("third", 7);
        assert!(!space.is_unpacked("third"));
        assert_eq!(space.num_variations(), 1);
    }

    #[test]
    fn num_variations_is_product_of_unpacked_lengths() {
        let mut space = base_space();
        space.add("third", vec![1, 3, 2, 5]);
        space.add("fourth", vec!["A", "B"]);
        assert_eq!(space.num_variations(), 1);
        space.set_unpack("third", true).unwrap();
        space.set_unpack("fourth", true).unwrap();
        assert_eq!(space.num_variations(), 8);
        assert_eq!(space.len(), 4);
    }

    #[test]
    fn numeric_values_compare_across_int_and_float() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
        assert_ne!(Value::Int(1), Value::Str("1".into()));
    }

    #[test]
    fn display_marks_unpacked_parameters() {
        let mut space = base_space();
        space.add("third", vec![1, 3]);
        space.set_unpack("third", true).unwrap();
        assert_eq!(space.to_string(), "{first: 10, second: 20, third*: [1, 3]}");
    }

    #[test]
    fn rep_max_is_ignored_by_equality() {
        let mut a = base_space();
        let mut b = base_space();
        a.add(REP_MAX_PARAM, 30);
        b.add(REP_MAX_PARAM, 40);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_unpack_marks() {
        let mut a = base_space();
        a.add("third", vec![1, 2]);
        let before = a.fingerprint();
        a.set_unpack("third", true).unwrap();
        assert_ne!(before, a.fingerprint());
    }

    #[test]
    fn combination_to_space_pins_unpacked_values() {
        let mut space = base_space();
        space.add("third", vec![1, 3, 2, 5]);
        space.set_unpack("third", true).unwrap();
        let combo = space.combination(2).unwrap();
        let pinned = combo.to_space();
        assert_eq!(pinned.get("third"), Some(&Parameter::from(2)));
        assert!(pinned.unpacked_names().is_empty());
        assert_eq!(combo.to_string(), "third=2");
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SweepError, SweepResult};
use crate::params::Value;
use crate::stats;

/// Running sum and sum of squares of every numeric contribution.
///
/// Kept alongside the plain statistic so mean and variance can be recovered
/// after merges without storing per-update history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub count: u64,
    pub sum: f64,
    pub squared_sum: f64,
}

impl Moments {
    fn push(&mut self, contribution: f64) {
        self.count += 1;
        self.sum += contribution;
        self.squared_sum += contribution * contribution;
    }

    fn absorb(&mut self, other: &Moments) {
        self.count += other.count;
        self.sum += other.sum;
        self.squared_sum += other.squared_sum;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SumState {
    pub value: f64,
    pub num_updates: u64,
    pub moments: Moments,
    /// Every update, in order, when history accumulation is enabled.
    pub history: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatioState {
    pub value: f64,
    pub total: f64,
    pub num_updates: u64,
    /// Contributions are `value / total` per update; updates with a zero
    /// total are counted in `num_updates` but not here.
    pub moments: Moments,
    pub history: Option<Vec<(f64, f64)>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiscState {
    pub value: Option<Value>,
    pub num_updates: u64,
}

/// The three accumulator variants, each carrying only the state it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccumulatorKind {
    Sum(SumState),
    Ratio(RatioState),
    Misc(MiscState),
}

impl AccumulatorKind {
    /// Stable numeric code of the variant: SUM = 0, RATIO = 1, MISC = 2.
    pub fn code(&self) -> u8 {
        match self {
            AccumulatorKind::Sum(_) => 0,
            AccumulatorKind::Ratio(_) => 1,
            AccumulatorKind::Misc(_) => 2,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AccumulatorKind::Sum(_) => "SUM",
            AccumulatorKind::Ratio(_) => "RATIO",
            AccumulatorKind::Misc(_) => "MISC",
        }
    }
}

/// Current statistic of an accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Number(f64),
    Misc(Option<Value>),
}

impl ResultValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResultValue::Number(v) => Some(*v),
            ResultValue::Misc(value) => value.as_ref().and_then(Value::as_f64),
        }
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Number(v) => write!(f, "{v}"),
            ResultValue::Misc(Some(value)) => write!(f, "{value}"),
            ResultValue::Misc(None) => f.write_str("Nothing yet"),
        }
    }
}

/// A named, typed running statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accumulator {
    name: String,
    kind: AccumulatorKind,
}

impl Accumulator {
    pub fn sum(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AccumulatorKind::Sum(SumState::default()),
        }
    }

    pub fn ratio(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AccumulatorKind::Ratio(RatioState::default()),
        }
    }

    pub fn misc(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AccumulatorKind::Misc(MiscState::default()),
        }
    }

    /// Keep every raw update so sample statistics and confidence intervals
    /// can be computed. No effect on MISC accumulators.
    pub fn with_history(mut self) -> Self {
        match &mut self.kind {
            AccumulatorKind::Sum(state) => {
                state.history.get_or_insert_with(Vec::new);
            }
            AccumulatorKind::Ratio(state) => {
                state.history.get_or_insert_with(Vec::new);
            }
            AccumulatorKind::Misc(_) => {}
        }
        self
    }

    /// SUM accumulator with one update applied.
    pub fn sum_of(name: &str, value: f64) -> Self {
        let mut acc = Self::sum(name);
        acc.push_sum(value);
        acc
    }

    /// RATIO accumulator with one update applied.
    pub fn ratio_of(name: &str, value: f64, total: f64) -> Self {
        let mut acc = Self::ratio(name);
        acc.push_ratio(value, total);
        acc
    }

    /// MISC accumulator holding `value`.
    pub fn misc_of(name: &str, value: impl Into<Value>) -> Self {
        let mut acc = Self::misc(name);
        acc.push_misc(value.into());
        acc
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &AccumulatorKind {
        &self.kind
    }

    pub fn kind_code(&self) -> u8 {
        self.kind.code()
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn num_updates(&self) -> u64 {
        match &self.kind {
            AccumulatorKind::Sum(state) => state.num_updates,
            AccumulatorKind::Ratio(state) => state.num_updates,
            AccumulatorKind::Misc(state) => state.num_updates,
        }
    }

    pub fn has_history(&self) -> bool {
        match &self.kind {
            AccumulatorKind::Sum(state) => state.history.is_some(),
            AccumulatorKind::Ratio(state) => state.history.is_some(),
            AccumulatorKind::Misc(_) => false,
        }
    }

    pub fn moments(&self) -> Option<&Moments> {
        match &self.kind {
            AccumulatorKind::Sum(state) => Some(&state.moments),
            AccumulatorKind::Ratio(state) => Some(&state.moments),
            AccumulatorKind::Misc(_) => None,
        }
    }

    /// Apply one update. RATIO requires `total`; SUM and RATIO require a
    /// finite numeric `value` (and finite `total`); SUM and MISC ignore `total`.
    /// No variant accepts NaN or infinities.
    pub fn update(&mut self, value: impl Into<Value>, total: Option<f64>) -> SweepResult<()> {
        let value = value.into();
        match &self.kind {
            AccumulatorKind::Sum(_) => {
                let number = self.numeric(&value)?;
                self.push_sum(number);
            }
            AccumulatorKind::Ratio(_) => {
                let Some(total) = total else {
                    return Err(SweepError::MissingOperand {
                        name: self.name.clone(),
                    });
                };
                let number = self.numeric(&value)?;
                let total = self.numeric(&Value::Float(total))?;
                self.push_ratio(number, total);
            }
            AccumulatorKind::Misc(_) => {
                if matches!(value, Value::Float(number) if !number.is_finite()) {
                    return Err(SweepError::InvalidValue {
                        name: self.name.clone(),
                        value: value.to_string(),
                    });
                }
                self.push_misc(value);
            }
        }
        Ok(())
    }

    /// Finite numbers only; NaN and infinities have no JSON form.
    fn numeric(&self, value: &Value) -> SweepResult<f64> {
        value
            .as_f64()
            .filter(|number| number.is_finite())
            .ok_or_else(|| SweepError::InvalidValue {
                name: self.name.clone(),
                value: value.to_string(),
            })
    }

    fn push_sum(&mut self, value: f64) {
        if let AccumulatorKind::Sum(state) = &mut self.kind {
            state.value += value;
            state.num_updates += 1;
            state.moments.push(value);
            if let Some(history) = &mut state.history {
                history.push(value);
            }
        }
    }

    fn push_ratio(&mut self, value: f64, total: f64) {
        if let AccumulatorKind::Ratio(state) = &mut self.kind {
            state.value += value;
            state.total += total;
            state.num_updates += 1;
            if total != 0.0 {
                state.moments.push(value / total);
            }
            if let Some(history) = &mut state.history {
                history.push((value, total));
            }
        }
    }

    fn push_misc(&mut self, value: Value) {
        if let AccumulatorKind::Misc(state) = &mut self.kind {
            state.value = Some(value);
            state.num_updates += 1;
        }
    }

    /// Current statistic: the running total for SUM, `value / total` for
    /// RATIO (NaN while the total is zero), the last value for MISC.
    pub fn result(&self) -> ResultValue {
        match &self.kind {
            AccumulatorKind::Sum(state) => ResultValue::Number(state.value),
            AccumulatorKind::Ratio(state) => ResultValue::Number(ratio(state.value, state.total)),
            AccumulatorKind::Misc(state) => ResultValue::Misc(state.value.clone()),
        }
    }

    /// Numeric statistic, None for MISC values that are not numbers.
    pub fn result_f64(&self) -> Option<f64> {
        self.result().as_f64()
    }

    /// Fold `other` into `self`. Both must share name and variant, and MISC
    /// accumulators never merge.
    ///
    /// History is concatenated `self` then `other`. A history-enabled
    /// accumulator merging one without history keeps its own history.
    pub fn merge(&mut self, other: &Accumulator) -> SweepResult<()> {
        if self.name != other.name {
            return Err(SweepError::incompatible(
                &self.name,
                &other.name,
                "names differ",
            ));
        }
        match (&mut self.kind, &other.kind) {
            (AccumulatorKind::Sum(mine), AccumulatorKind::Sum(theirs)) => {
                mine.value += theirs.value;
                mine.num_updates += theirs.num_updates;
                mine.moments.absorb(&theirs.moments);
                if let (Some(history), Some(incoming)) = (&mut mine.history, &theirs.history) {
                    history.extend_from_slice(incoming);
                }
                Ok(())
            }
            (AccumulatorKind::Ratio(mine), AccumulatorKind::Ratio(theirs)) => {
                mine.value += theirs.value;
                mine.total += theirs.total;
                mine.num_updates += theirs.num_updates;
                mine.moments.absorb(&theirs.moments);
                if let (Some(history), Some(incoming)) = (&mut mine.history, &theirs.history) {
                    history.extend_from_slice(incoming);
                }
                Ok(())
            }
            (AccumulatorKind::Misc(_), _) | (_, AccumulatorKind::Misc(_)) => Err(
                SweepError::incompatible(&self.name, &other.name, "MISC accumulators cannot be merged"),
            ),
            (mine, theirs) => Err(SweepError::incompatible(
                &self.name,
                &other.name,
                format!("{} and {} variants differ", mine.type_name(), theirs.type_name()),
            )),
        }
    }

    /// Per-update samples from history: the value for SUM, `value / total`
    /// for RATIO.
    fn samples(&self) -> SweepResult<Vec<f64>> {
        let no_history = || SweepError::NoHistory {
            name: self.name.clone(),
        };
        match &self.kind {
            AccumulatorKind::Sum(state) => state.history.clone().ok_or_else(no_history),
            AccumulatorKind::Ratio(state) => state
                .history
                .as_ref()
                .map(|pairs| pairs.iter().map(|(v, t)| ratio(*v, *t)).collect())
                .ok_or_else(no_history),
            AccumulatorKind::Misc(_) => Err(no_history()),
        }
    }

    /// Mean of the accumulated history.
    pub fn mean(&self) -> SweepResult<f64> {
        Ok(stats::mean(&self.samples()?))
    }

    /// Population variance of the accumulated history.
    pub fn variance(&self) -> SweepResult<f64> {
        Ok(stats::variance(&self.samples()?))
    }

    /// Mean of the contributions computed from running sums; available
    /// without history. None for MISC.
    pub fn running_mean(&self) -> Option<f64> {
        let m = self.moments()?;
        Some(stats::running_moments(m.sum, m.squared_sum, m.count).0)
    }

    pub fn running_variance(&self) -> Option<f64> {
        let m = self.moments()?;
        Some(stats::running_moments(m.sum, m.squared_sum, m.count).1)
    }

    /// Symmetric interval `[low, high]` around the history mean at the
    /// given confidence level in percent.
    pub fn confidence_interval(&self, confidence_percent: f64) -> SweepResult<[f64; 2]> {
        let samples = self.samples()?;
        let mean = stats::mean(&samples);
        let std_dev = stats::variance(&samples).sqrt();
        Ok(stats::confidence_interval(
            mean,
            std_dev,
            samples.len(),
            confidence_percent,
        ))
    }
}

fn ratio(value: f64, total: f64) -> f64 {
    if total == 0.0 { f64::NAN } else { value / total }
}

/// Equality on value content only: name, variant, and the statistic's raw
/// state. History and running sums are ignored.
impl PartialEq for Accumulator {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }
        match (&self.kind, &other.kind) {
            (AccumulatorKind::Sum(a), AccumulatorKind::Sum(b)) => a.value == b.value,
            (AccumulatorKind::Ratio(a), AccumulatorKind::Ratio(b)) => {
                a.value == b.value && a.total == b.total
            }
            (AccumulatorKind::Misc(a), AccumulatorKind::Misc(b)) => a.value == b.value,
            _ => false,
        }
    }
}

impl fmt::Display for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Result -> {}: ", self.name)?;
        match &self.kind {
            AccumulatorKind::Sum(state) if state.num_updates == 0 => f.write_str("Nothing yet"),
            AccumulatorKind::Sum(state) => write!(f, "{}", state.value),
            AccumulatorKind::Ratio(state) => {
                let result = ratio(state.value, state.total);
                if result.is_nan() {
                    write!(f, "{}/{} -> NaN", state.value, state.total)
                } else {
                    write!(f, "{}/{} -> {}", state.value, state.total, result)
                }
            }
            AccumulatorKind::Misc(state) => write!(f, "{}", ResultValue::Misc(state.value.clone())),
        }
    }
}

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value as Json;
use sweepsmith_rs::{Parameter, ParameterSpace, Value};

/// A sweep description on disk.
///
/// ```json
/// {
///   "experiment": "linear",
///   "parameters": { "x": "0:5:25", "slope": 1.2, "bias": [1.3, "2:4"] },
///   "unpack": ["x"],
///   "runner": { "rep_max": 4, "seed": 42, "results_filename": "linear_{bias}" }
/// }
/// ```
///
/// Numeric strings of the form `min:max` or `min:step:max` expand to
/// half-open ranges; inside a list they are expanded in place. Other strings
/// are kept as they are.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepFile {
    pub experiment: String,
    pub parameters: BTreeMap<String, Json>,
    #[serde(default)]
    pub unpack: Vec<String>,
    #[serde(default)]
    pub runner: RunnerSection,
}

/// Runner options a sweep file may carry. Command-line flags win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    pub rep_max: Option<usize>,
    pub seed: Option<u64>,
    pub results_filename: Option<String>,
    pub keep_checkpoint: Option<bool>,
    pub progress_message: Option<String>,
    pub progress_poll_ms: Option<u64>,
    pub workers: Option<usize>,
}

impl SweepFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid sweep file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn parameter_space(&self) -> Result<ParameterSpace> {
        let mut params = ParameterSpace::new();
        for (name, raw) in &self.parameters {
            let parameter = parse_parameter(name, raw)?;
            params.add(name, parameter);
        }
        for name in &self.unpack {
            params
                .set_unpack(name, true)
                .with_context(|| format!("cannot unpack parameter '{name}'"))?;
        }
        Ok(params)
    }
}

fn parse_parameter(name: &str, raw: &Json) -> Result<Parameter> {
    match raw {
        Json::Array(items) => {
            let mut values = Vec::new();
            for item in items {
                match item {
                    Json::String(text) if is_range_expr(text) => {
                        values.extend(parse_range_expr(name, text)?);
                    }
                    other => values.push(parse_scalar(name, other)?),
                }
            }
            Ok(Parameter::List(values))
        }
        Json::String(text) if is_range_expr(text) => {
            Ok(Parameter::List(parse_range_expr(name, text)?))
        }
        other => Ok(Parameter::Scalar(parse_scalar(name, other)?)),
    }
}

fn parse_scalar(name: &str, raw: &Json) -> Result<Value> {
    match raw {
        Json::Bool(flag) => Ok(Value::Bool(*flag)),
        Json::String(text) => Ok(Value::Str(text.clone())),
        Json::Number(number) => {
            if let Some(int) = number.as_i64() {
                Ok(Value::Int(int))
            } else {
                number
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| anyhow!("parameter '{name}': unsupported number {number}"))
            }
        }
        Json::Null | Json::Array(_) | Json::Object(_) => {
            bail!("parameter '{name}': expected a number, bool, string or list, got {raw}")
        }
    }
}

/// Two or three numeric fields separated by `:`. Any other string,
/// colons included, is a plain string value.
fn is_range_expr(text: &str) -> bool {
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    matches!(parts.len(), 2 | 3) && parts.iter().all(|part| part.parse::<f64>().is_ok())
}

/// Expand `min:max` (step 1) or `min:step:max`, excluding `max`. Integer
/// limits produce integers, anything else produces floats.
pub fn parse_range_expr(name: &str, expr: &str) -> Result<Vec<Value>> {
    let parts: Vec<&str> = expr.split(':').map(str::trim).collect();
    let (start, step, stop) = match parts.as_slice() {
        [start, stop] => (*start, "1", *stop),
        [start, step, stop] => (*start, *step, *stop),
        _ => bail!("parameter '{name}': range '{expr}' must be min:max or min:step:max"),
    };

    let ints: Option<Vec<i64>> = [start, step, stop]
        .iter()
        .map(|part| part.parse::<i64>().ok())
        .collect();
    if let Some(limits) = ints {
        let (start, step, stop) = (limits[0], limits[1], limits[2]);
        if step == 0 {
            bail!("parameter '{name}': range '{expr}' has a zero step");
        }
        let mut values = Vec::new();
        let mut current = start;
        while (step > 0 && current < stop) || (step < 0 && current > stop) {
            values.push(Value::Int(current));
            current += step;
        }
        return Ok(values);
    }

    let floats: Vec<f64> = [start, step, stop]
        .iter()
        .map(|part| {
            part.parse::<f64>()
                .map_err(|_| anyhow!("parameter '{name}': '{part}' in range '{expr}' is not a number"))
        })
        .collect::<Result<_>>()?;
    let (start, step, stop) = (floats[0], floats[1], floats[2]);
    if step == 0.0 || !step.is_finite() {
        bail!("parameter '{name}': range '{expr}' needs a finite non-zero step");
    }
    let count = ((stop - start) / step).ceil().max(0.0) as usize;
    Ok((0..count)
        .map(|i| Value::Float(start + i as f64 * step))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ranges_exclude_the_upper_limit() {
        let values = parse_range_expr("SNR", "0:5:20").unwrap();
        assert_eq!(
            values,
            vec![Value::Int(0), Value::Int(5), Value::Int(10), Value::Int(15)]
        );
        assert_eq!(parse_range_expr("n", "3:6").unwrap().len(), 3);
        assert_eq!(parse_range_expr("n", "5:-1:2").unwrap().len(), 3);
    }

    #[test]
    fn float_ranges_follow_the_step() {
        let values = parse_range_expr("p", "0.1:0.2:0.6").unwrap();
        assert_eq!(values.len(), 3);
        assert!((values[2].as_f64().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bad_ranges_name_the_parameter() {
        let err = parse_range_expr("SNR", "a:b").unwrap_err();
        assert!(err.to_string().contains("'SNR'"));
        let err = parse_range_expr("SNR", "0:0:4").unwrap_err();
        assert!(err.to_string().contains("zero step"));
        assert!(parse_range_expr("SNR", "1:2:3:4").is_err());
    }

    #[test]
    fn lists_mix_values_and_ranges() -> Result<()> {
        let sweep = SweepFile::parse(
            r#"{
                "experiment": "linear",
                "parameters": { "x": [1, "4:7", 10], "bias": 0.5, "label": "demo" },
                "unpack": ["x"]
            }"#,
        )?;
        let params = sweep.parameter_space()?;
        assert_eq!(params.num_variations(), 5);
        assert_eq!(
            params.get("x").and_then(Parameter::as_list).map(<[Value]>::len),
            Some(5)
        );
        assert_eq!(
            params.get("label").and_then(Parameter::as_scalar),
            Some(&Value::from("demo"))
        );
        Ok(())
    }

    #[test]
    fn strings_with_colons_stay_strings() -> Result<()> {
        let sweep = SweepFile::parse(
            r#"{
                "experiment": "linear",
                "parameters": {
                    "endpoint": "http://localhost:8080",
                    "tags": ["run:a", "0:3"],
                    "x": "1:2:7"
                }
            }"#,
        )?;
        let params = sweep.parameter_space()?;
        assert_eq!(
            params.get("endpoint").and_then(Parameter::as_scalar),
            Some(&Value::from("http://localhost:8080"))
        );
        assert_eq!(
            params.get("tags").and_then(Parameter::as_list),
            Some(&[Value::from("run:a"), Value::Int(0), Value::Int(1), Value::Int(2)][..])
        );
        assert_eq!(
            params.get("x").and_then(Parameter::as_list).map(<[Value]>::len),
            Some(3)
        );
        assert!(!is_range_expr("a:b"));
        assert!(!is_range_expr("1:2:3:4"));
        assert!(is_range_expr("0.5 : 2"));
        Ok(())
    }

    #[test]
    fn unpacking_a_scalar_is_reported() -> Result<()> {
        let sweep = SweepFile::parse(
            r#"{ "experiment": "linear", "parameters": { "x": 3 }, "unpack": ["x"] }"#,
        )?;
        let err = sweep.parameter_space().unwrap_err();
        assert!(format!("{err:#}").contains("'x'"));
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(SweepFile::parse(r#"{ "experiment": "linear", "parameters": {}, "oops": 1 }"#).is_err());
    }
}

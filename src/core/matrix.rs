//! Matrix expansion - one job definition into many instances

use crate::core::job::Coordinate;
use serde_yaml::{Mapping, Value};

/// A named dimension of parameter values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

/// Validated matrix of a job: axes in declaration order plus exclusions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixSpec {
    pub axes: Vec<MatrixAxis>,
    pub exclude: Vec<Vec<(String, String)>>,
}

/// Result of expanding a matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// Coordinates in deterministic order
    Instances(Vec<Coordinate>),
    /// No coordinate survived (an empty axis, or exclusions removed them
    /// all); the job produces no instances and counts as skipped
    Collapsed { reason: String },
}

impl MatrixSpec {
    /// Build a matrix from its YAML mapping.
    ///
    /// Every key except `exclude` is an axis whose value must be a sequence
    /// of scalars. Errors are plain messages; callers attach the job id.
    pub fn from_mapping(mapping: &Mapping) -> Result<Self, String> {
        let mut spec = MatrixSpec::default();
        let mut raw_exclude = None;

        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| format!("axis names must be strings, got {:?}", key))?;

            if name == "exclude" {
                raw_exclude = Some(value);
                continue;
            }

            if spec.axis(name).is_some() {
                return Err(format!("axis '{}' declared twice", name));
            }

            let values = value
                .as_sequence()
                .ok_or_else(|| format!("axis '{}' must be a list of values", name))?
                .iter()
                .map(|v| scalar(v).ok_or_else(|| format!("axis '{}' has a non-scalar value", name)))
                .collect::<Result<Vec<_>, _>>()?;

            spec.axes.push(MatrixAxis {
                name: name.to_string(),
                values,
            });
        }

        if let Some(raw) = raw_exclude {
            let rules = raw
                .as_sequence()
                .ok_or_else(|| "exclude must be a list of coordinates".to_string())?;
            for rule in rules {
                let parsed = spec.parse_exclusion(rule)?;
                spec.exclude.push(parsed);
            }
        }

        Ok(spec)
    }

    fn parse_exclusion(&self, rule: &Value) -> Result<Vec<(String, String)>, String> {
        let rule = rule
            .as_mapping()
            .ok_or_else(|| "each exclude entry must be a mapping".to_string())?;

        if rule.is_empty() {
            return Err("exclude entry must name at least one axis".to_string());
        }

        let mut parsed = Vec::new();
        for (key, value) in rule {
            let name = key
                .as_str()
                .ok_or_else(|| "exclude keys must be strings".to_string())?;
            let axis = self
                .axis(name)
                .ok_or_else(|| format!("exclude references unknown axis '{}'", name))?;
            let value = scalar(value)
                .ok_or_else(|| format!("exclude value for '{}' must be a scalar", name))?;
            if !axis.values.contains(&value) {
                return Err(format!(
                    "exclude value '{}' is not a value of axis '{}'",
                    value, name
                ));
            }
            parsed.push((name.to_string(), value));
        }
        Ok(parsed)
    }

    pub fn axis(&self, name: &str) -> Option<&MatrixAxis> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Add an axis (builder style, used when defining jobs in code)
    pub fn with_axis<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes.push(MatrixAxis {
            name: name.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add an exclusion rule (builder style)
    pub fn excluding(mut self, rule: &[(&str, &str)]) -> Self {
        self.exclude.push(
            rule.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Expand into the ordered cross product minus excluded coordinates.
    ///
    /// The last axis varies fastest. An empty matrix yields one empty
    /// coordinate. Collapses when nothing is left to run.
    pub fn expand(&self) -> Expansion {
        if let Some(axis) = self.axes.iter().find(|a| a.values.is_empty()) {
            return Expansion::Collapsed {
                reason: format!("matrix axis '{}' has no values", axis.name),
            };
        }

        let mut combinations: Vec<Vec<(String, String)>> = vec![Vec::new()];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(combinations.len() * axis.values.len());
            for combo in &combinations {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.push((axis.name.clone(), value.clone()));
                    next.push(extended);
                }
            }
            combinations = next;
        }

        let coordinates: Vec<Coordinate> = combinations
            .into_iter()
            .filter(|combo| !self.exclude.iter().any(|rule| matches_rule(combo, rule)))
            .map(Coordinate::from_pairs)
            .collect();

        if coordinates.is_empty() {
            return Expansion::Collapsed {
                reason: "every matrix coordinate excluded".to_string(),
            };
        }
        Expansion::Instances(coordinates)
    }
}

fn matches_rule(combo: &[(String, String)], rule: &[(String, String)]) -> bool {
    rule.iter()
        .all(|(axis, value)| combo.iter().any(|(a, v)| a == axis && v == value))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

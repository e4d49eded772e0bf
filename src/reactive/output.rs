use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl OutputValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            OutputValue::Scalar(value) => Some(*value),
            OutputValue::Series(_) => None,
        }
    }

    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            OutputValue::Scalar(_) => None,
            OutputValue::Series(values) => Some(values),
        }
    }
}

/// One labeled result gathered after a solve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub host: String,
    pub method: &'static str,
    pub label: String,
    pub value: OutputValue,
}

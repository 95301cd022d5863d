//! Serde helpers for log-domain values
//!
//! JSON has no infinities, so `log(0)` is written as `null` and read back as
//! `-∞`.

use crate::numeric::NEG_INF;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn to_nullable(x: f64) -> Option<f64> {
    if x.is_finite() {
        Some(x)
    } else {
        None
    }
}

/// `Vec<f64>` with `-∞` as `null`
pub mod log_vec {
    use super::*;

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|&x| to_nullable(x))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|x| x.unwrap_or(NEG_INF)).collect())
    }
}

/// Row-major `Vec<Vec<f64>>` with `-∞` as `null`
pub mod log_matrix {
    use super::*;

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        rows.iter()
            .map(|row| row.iter().map(|&x| to_nullable(x)).collect::<Vec<_>>())
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<f64>>, D::Error> {
        let raw: Vec<Vec<Option<f64>>> = Vec::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|row| row.into_iter().map(|x| x.unwrap_or(NEG_INF)).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Probe {
        #[serde(with = "log_vec")]
        v: Vec<f64>,
        #[serde(with = "log_matrix")]
        m: Vec<Vec<f64>>,
    }

    #[test]
    fn test_neg_inf_as_null() {
        let p = Probe {
            v: vec![-0.5, NEG_INF],
            m: vec![vec![NEG_INF, 0.0], vec![-1.25, NEG_INF]],
        };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"v":[-0.5,null],"m":[[null,0.0],[-1.25,null]]}"#);
        let back: Probe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}

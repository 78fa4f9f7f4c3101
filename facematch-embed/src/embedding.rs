use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("embedding has no components")]
    Empty,
    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },
}

/// Face embedding as produced by an external recognition model.
///
/// Always non-empty with finite components. The vector is never normalized
/// in place; similarity normalizes on the fly so the stored values stay
/// exactly what the model emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        Ok(Self {
            vector: Array1::from_vec(values),
        })
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn vector(&self) -> &Array1<f32> {
        &self.vector
    }

    /// Largest component magnitude. Zero only for the all-zero vector.
    pub fn max_abs(&self) -> f32 {
        self.vector.iter().fold(0.0f32, |m, x| m.max(x.abs()))
    }

    /// L2 norm, computed on the vector scaled by [`Embedding::max_abs`] so
    /// tiny components do not underflow. Only overflows when the norm itself
    /// exceeds `f32::MAX`.
    pub fn norm(&self) -> f32 {
        let m = self.max_abs();
        if m == 0.0 {
            return 0.0;
        }
        let scaled = self.vector.mapv(|x| x / m);
        m * scaled.dot(&scaled).sqrt()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.vector.to_vec()
    }
}

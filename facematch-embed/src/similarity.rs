use crate::embedding::Embedding;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("cannot normalize a zero-norm vector")]
    DegenerateVector,
}

/// Cosine similarity between two embeddings, in [-1, 1].
///
/// `expected` in a `DimensionMismatch` is the length of `a`.
pub fn similarity(a: &Embedding, b: &Embedding) -> Result<f32, SimilarityError> {
    if a.dim() != b.dim() {
        return Err(SimilarityError::DimensionMismatch {
            expected: a.dim(),
            actual: b.dim(),
        });
    }

    let scale_a = UnitScale::of(a)?;
    let scale_b = UnitScale::of(b)?;

    let dot: f32 = a
        .vector()
        .iter()
        .zip(b.vector().iter())
        .map(|(x, y)| scale_a.apply(*x) * scale_b.apply(*y))
        .sum();

    Ok(dot.clamp(-1.0, 1.0))
}

/// Fails with `DegenerateVector` when unit-normalization of `e` is undefined.
pub fn ensure_normalizable(e: &Embedding) -> Result<(), SimilarityError> {
    UnitScale::of(e).map(|_| ())
}

/// Two-step normalization: divide by the largest magnitude, then by the norm
/// of the result. The intermediate norm lies in `[1, sqrt(dim)]`, so neither
/// step can overflow or flush a non-zero vector to zero.
struct UnitScale {
    max_abs: f32,
    scaled_norm: f32,
}

impl UnitScale {
    fn of(e: &Embedding) -> Result<Self, SimilarityError> {
        let max_abs = e.max_abs();
        if max_abs == 0.0 {
            return Err(SimilarityError::DegenerateVector);
        }
        let scaled_norm = e
            .vector()
            .iter()
            .map(|x| {
                let s = x / max_abs;
                s * s
            })
            .sum::<f32>()
            .sqrt();
        Ok(Self {
            max_abs,
            scaled_norm,
        })
    }

    fn apply(&self, x: f32) -> f32 {
        x / self.max_abs / self.scaled_norm
    }
}

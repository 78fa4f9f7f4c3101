use crate::embedding::Embedding;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no face detected in probe")]
    NoFaceDetected,
    #[error("could not decode probe: {0}")]
    Decode(String),
}

/// Turns raw probe bytes into an embedding.
///
/// Implementations wrap a face detector and recognition model; the ranking
/// code only ever sees the resulting [`Embedding`].
pub trait EmbeddingProvider {
    fn produce_embedding(&mut self, image: &[u8]) -> Result<Embedding, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn produce_embedding(&mut self, image: &[u8]) -> Result<Embedding, ProviderError> {
        (**self).produce_embedding(image)
    }
}

/// Provider for descriptors computed ahead of time by an external model.
///
/// Accepts either a bare JSON array (`[0.1, ...]`) or an object carrying an
/// `embedding` field. `null` or an empty array means the model found no face.
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptorProvider;

impl EmbeddingProvider for DescriptorProvider {
    fn produce_embedding(&mut self, image: &[u8]) -> Result<Embedding, ProviderError> {
        let descriptor: Value =
            serde_json::from_slice(image).map_err(|e| ProviderError::Decode(e.to_string()))?;

        let values = match descriptor {
            Value::Object(mut fields) => fields
                .remove("embedding")
                .ok_or_else(|| ProviderError::Decode("missing `embedding` field".into()))?,
            other => other,
        };

        let values: Option<Vec<f32>> =
            serde_json::from_value(values).map_err(|e| ProviderError::Decode(e.to_string()))?;

        match values {
            Some(values) if !values.is_empty() => {
                log::debug!("decoded descriptor with {} components", values.len());
                Embedding::new(values).map_err(|e| ProviderError::Decode(e.to_string()))
            }
            _ => Err(ProviderError::NoFaceDetected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_array() {
        let emb = DescriptorProvider.produce_embedding(b"[1.0, 2.0]").unwrap();
        assert_eq!(emb.to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_wrapped_object() {
        let raw = br#"{"embedding": [0.5, 0.5, 0.0], "model": "buffalo_l"}"#;
        let emb = DescriptorProvider.produce_embedding(raw).unwrap();
        assert_eq!(emb.dim(), 3);
    }

    #[test]
    fn test_no_face() {
        for raw in [&b"null"[..], b"[]", br#"{"embedding": null}"#] {
            assert!(matches!(
                DescriptorProvider.produce_embedding(raw),
                Err(ProviderError::NoFaceDetected)
            ));
        }
    }

    #[test]
    fn test_decode_error() {
        for raw in [&b"\x89PNG\r\n"[..], b"{\"key\": 1}", b"[1.0, \"x\"]"] {
            assert!(matches!(
                DescriptorProvider.produce_embedding(raw),
                Err(ProviderError::Decode(_))
            ));
        }
    }
}

//! Reversible line transforms applied between encoding and storage.

use crate::error::{CoreError, CoreResult};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use std::fmt;
use std::sync::Arc;

/// Number of random strings checked per length.
const SAMPLES_PER_LENGTH: usize = 10;
/// Longest random string checked.
const MAX_SAMPLE_LENGTH: usize = 30;

/// A pair of inverse functions applied to every log line.
///
/// `after_serialization` runs on an encoded line before it is stored (for
/// compression or encryption); `before_deserialization` runs on a stored
/// line before it is decoded. The two must be exact inverses and
/// `after_serialization` must never produce a newline.
pub trait LineTransform: Send + Sync + fmt::Debug {
    /// Transforms an encoded line for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be transformed.
    fn after_serialization(&self, line: &str) -> CoreResult<String>;

    /// Restores a stored line to its encoded form.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored line is not a valid transform output.
    fn before_deserialization(&self, line: &str) -> CoreResult<String>;
}

/// Stores lines unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl LineTransform for IdentityTransform {
    fn after_serialization(&self, line: &str) -> CoreResult<String> {
        Ok(line.to_string())
    }

    fn before_deserialization(&self, line: &str) -> CoreResult<String> {
        Ok(line.to_string())
    }
}

type LineFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A transform built from two infallible closures.
#[derive(Clone)]
pub struct FnTransform {
    after: LineFn,
    before: LineFn,
}

impl FnTransform {
    /// Creates a transform from its two directions.
    pub fn new(
        after_serialization: impl Fn(&str) -> String + Send + Sync + 'static,
        before_deserialization: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            after: Arc::new(after_serialization),
            before: Arc::new(before_deserialization),
        }
    }
}

impl fmt::Debug for FnTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransform").finish_non_exhaustive()
    }
}

impl LineTransform for FnTransform {
    fn after_serialization(&self, line: &str) -> CoreResult<String> {
        Ok((self.after)(line))
    }

    fn before_deserialization(&self, line: &str) -> CoreResult<String> {
        Ok((self.before)(line))
    }
}

/// Checks that a transform round-trips random strings of every length from
/// 1 to 30 and never emits a newline.
///
/// # Errors
///
/// Returns [`CoreError::SerializationAsymmetry`] on the first failure.
pub fn verify_transform(transform: &dyn LineTransform, rng: &mut dyn RngCore) -> CoreResult<()> {
    for len in 1..=MAX_SAMPLE_LENGTH {
        for _ in 0..SAMPLES_PER_LENGTH {
            let sample: String = (&mut *rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();

            let stored = transform.after_serialization(&sample).map_err(|e| {
                CoreError::serialization_asymmetry(format!("after_serialization failed: {e}"))
            })?;
            if stored.contains('\n') {
                return Err(CoreError::serialization_asymmetry(
                    "after_serialization produced a newline",
                ));
            }

            let restored = transform.before_deserialization(&stored).map_err(|e| {
                CoreError::serialization_asymmetry(format!("before_deserialization failed: {e}"))
            })?;
            if restored != sample {
                return Err(CoreError::serialization_asymmetry(format!(
                    "before_deserialization is not the inverse of after_serialization \
                     ({sample:?} came back as {restored:?})"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn identity_passes() {
        verify_transform(&IdentityTransform, &mut rng()).unwrap();
    }

    #[test]
    fn reversible_closure_passes() {
        let reverse = FnTransform::new(
            |s| s.chars().rev().collect(),
            |s| s.chars().rev().collect(),
        );
        verify_transform(&reverse, &mut rng()).unwrap();
    }

    #[test]
    fn one_sided_transform_fails() {
        let broken = FnTransform::new(|s| format!("x{s}"), |s| s.to_string());
        let err = verify_transform(&broken, &mut rng()).unwrap_err();
        assert!(matches!(err, CoreError::SerializationAsymmetry { .. }));
    }

    #[test]
    fn newline_output_fails() {
        let multiline = FnTransform::new(
            |s| format!("{s}\n"),
            |s| s.trim_end_matches('\n').to_string(),
        );
        assert!(verify_transform(&multiline, &mut rng()).is_err());
    }

    #[test]
    fn lossy_on_long_input_fails() {
        let truncating = FnTransform::new(
            |s| s.chars().take(20).collect(),
            |s| s.to_string(),
        );
        assert!(verify_transform(&truncating, &mut rng()).is_err());
    }
}

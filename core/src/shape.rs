//! Input geometry of an export.
use crate::internal::*;

/// Images are always RGB.
pub const CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeSpec {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ShapeSpec {
    pub fn shape(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    /// Standard normal input of this shape, reproducible for a given seed.
    pub fn random_input(&self, seed: u64) -> Tensor {
        Tensor::random_normal(&self.shape(), seed)
    }
}

impl std::fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}x{}x{}x{}", self.batch, self.channels, self.height, self.width)
    }
}

fn configuration(msg: String) -> anyhow::Error {
    ExportError::Configuration(msg).into()
}

/// Resolve the input shape.
///
/// An explicit `[h, w]` wins, a single value means a square input, an empty
/// explicit size falls back to the model default.
pub fn resolve_shape(
    explicit: Option<&[usize]>,
    default: Option<(usize, usize)>,
    batch: usize,
) -> ExportResult<ShapeSpec> {
    if batch == 0 {
        return Err(configuration("batch size must be positive".into()));
    }
    let (height, width) = match explicit {
        Some([h, w]) => (*h, *w),
        Some([s]) => (*s, *s),
        Some([]) | None => default.ok_or_else(|| {
            configuration("no input size given and the model has no default".into())
        })?,
        Some(more) => {
            return Err(configuration(format!(
                "input size must be [height, width], got {more:?}"
            )));
        }
    };
    if height == 0 || width == 0 {
        return Err(configuration(format!("input size must be positive, got {height}x{width}")));
    }
    Ok(ShapeSpec { batch, channels: CHANNELS, height, width })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kind(r: ExportResult<ShapeSpec>) -> Option<ExportError> {
        r.err().and_then(|e| ExportError::of(&e).cloned())
    }

    #[test]
    fn explicit_pair() {
        let s = resolve_shape(Some(&[640, 640]), None, 1).unwrap();
        assert_eq!(s.shape(), [1, 3, 640, 640]);
        assert_eq!(s.to_string(), "1x3x640x640");
    }

    #[test]
    fn square_and_default() {
        assert_eq!(resolve_shape(Some(&[416]), None, 2).unwrap().shape(), [2, 3, 416, 416]);
        let s = resolve_shape(Some(&[]), Some((320, 256)), 1).unwrap();
        assert_eq!(s.shape(), [1, 3, 320, 256]);
    }

    #[test]
    fn errors() {
        assert!(matches!(kind(resolve_shape(None, None, 1)), Some(ExportError::Configuration(_))));
        let bad = [
            resolve_shape(Some(&[1, 2, 3]), None, 1),
            resolve_shape(Some(&[0, 640]), None, 1),
            resolve_shape(Some(&[640, 640]), None, 0),
        ];
        for r in bad {
            assert!(matches!(kind(r), Some(ExportError::Configuration(_))));
        }
    }

    #[test]
    fn random_input_is_seeded() {
        let s = resolve_shape(Some(&[8, 6]), None, 1).unwrap();
        assert_eq!(s.random_input(0), s.random_input(0));
        assert_eq!(s.random_input(0).shape(), &[1, 3, 8, 6]);
    }

    proptest! {
        #[test]
        fn explicit_wins(
            h in 1usize..2048,
            w in 1usize..2048,
            default in proptest::option::of((1usize..2048, 1usize..2048)),
            b in 1usize..16,
        ) {
            let s = resolve_shape(Some(&[h, w]), default, b).unwrap();
            prop_assert_eq!(s.shape(), [b, CHANNELS, h, w]);
        }

        #[test]
        fn empty_means_default(h in 1usize..2048, w in 1usize..2048, b in 1usize..16) {
            let s = resolve_shape(Some(&[]), Some((h, w)), b).unwrap();
            prop_assert_eq!((s.height, s.width, s.batch), (h, w, b));
            prop_assert_eq!(resolve_shape(None, Some((h, w)), b).unwrap(), s);
        }
    }
}

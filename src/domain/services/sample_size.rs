//! Power-of-two downsampling calculation.

use crate::domain::entities::{Dimensions, TargetBounds};

/// Returns the largest power-of-two divisor that keeps every bounded
/// dimension at or above its bound.
///
/// Only the axes that carry a bound constrain the result. Without any bound
/// the image is decoded at full size and the sample size is 1.
#[must_use]
pub fn calculate_sample_size(dimensions: Dimensions, bounds: TargetBounds) -> u32 {
    let width_bound = bounds.width.filter(|bound| *bound > 0);
    let height_bound = bounds.height.filter(|bound| *bound > 0);
    if width_bound.is_none() && height_bound.is_none() {
        return 1;
    }

    let fits = |dimension: u32, bound: Option<u32>, divisor: u32| {
        bound.is_none_or(|bound| dimension / divisor >= bound)
    };

    let mut sample_size = 1u32;
    while let Some(next) = sample_size.checked_mul(2) {
        if fits(dimensions.width, width_bound, next) && fits(dimensions.height, height_bound, next)
        {
            sample_size = next;
        } else {
            break;
        }
    }
    sample_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(512, 512, Some(256), None, 2 ; "exact_half_width")]
    #[test_case(512, 512, Some(257), None, 1 ; "just_above_half")]
    #[test_case(512, 512, None, None, 1 ; "no_bounds")]
    #[test_case(512, 512, Some(100), None, 4 ; "width_only")]
    #[test_case(4000, 1000, Some(500), Some(500), 2 ; "height_limits")]
    #[test_case(1000, 4000, None, Some(250), 16 ; "height_only")]
    #[test_case(100, 100, Some(400), Some(400), 1 ; "bound_larger_than_image")]
    #[test_case(512, 512, Some(0), None, 1 ; "zero_bound_ignored")]
    fn test_sample_size(
        width: u32,
        height: u32,
        bound_width: Option<u32>,
        bound_height: Option<u32>,
        expected: u32,
    ) {
        let bounds = TargetBounds {
            width: bound_width,
            height: bound_height,
        };
        assert_eq!(
            calculate_sample_size(Dimensions::new(width, height), bounds),
            expected
        );
    }
}

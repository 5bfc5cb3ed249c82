/// Alignment of every block header and therefore of every payload handed out.
pub const ALIGNMENT: usize = 16;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use firstfit::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(100), 112);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of
/// two.
///
/// Overflow is the caller's problem; use [`checked_align`] where the input
/// comes from outside the allocator.
///
/// ```rust
/// use firstfit::align_to;
///
/// assert_eq!(align_to!(4097, 4096), 8192);
/// assert_eq!(align_to!(48, 16), 48);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` up to a multiple of `align` (a power of two), or `None` if
/// the result does not fit in a `usize`.
pub const fn checked_align(
  value: usize,
  align: usize,
) -> Option<usize> {
  debug_assert!(align.is_power_of_two());
  match value.checked_add(align - 1) {
    Some(bumped) => Some(bumped & !(align - 1)),
    None => None,
  }
}

/// Rounds `value` up to a multiple of an arbitrary non-zero `granularity`.
pub const fn checked_round_up(
  value: usize,
  granularity: usize,
) -> Option<usize> {
  assert!(granularity > 0);
  match value.checked_add(granularity - 1) {
    Some(bumped) => Some(bumped / granularity * granularity),
    None => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));

      let expected_alignment = ALIGNMENT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_checked_align_overflow() {
    assert_eq!(checked_align(usize::MAX, ALIGNMENT), None);
    assert_eq!(checked_align(usize::MAX - 14, ALIGNMENT), None);
    assert_eq!(checked_align(33, ALIGNMENT), Some(48));
  }

  #[test]
  fn test_checked_round_up() {
    assert_eq!(checked_round_up(1, 4096), Some(4096));
    assert_eq!(checked_round_up(4096, 4096), Some(4096));
    assert_eq!(checked_round_up(100, 48), Some(144));
    assert_eq!(checked_round_up(usize::MAX, 4096), None);
  }
}

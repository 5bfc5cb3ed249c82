use crate::{align::checked_round_up, block::HEADER_SIZE, error::AllocError};

const PAGE_SIZE: usize = 4096;

/// What to do with a request whose footprint exceeds
/// [`HeapConfig::max_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversizePolicy {
  /// Grow the heap by a one-off region sized to the request.
  #[default]
  Extend,
  /// Report out-of-memory.
  Fail,
}

/// Tuning knobs for how the heap talks to its grower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Bytes requested from the grower by [`Heap::initialize`](crate::Heap::initialize).
  pub initial_region: usize,
  /// A growth request asks for this many times the failing request's
  /// footprint, so that a run of similar allocations needs one growth.
  pub growth_factor: usize,
  /// Ceiling on a single growth request.
  pub max_region: usize,
  pub oversize: OversizePolicy,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      initial_region: 16 * PAGE_SIZE,
      growth_factor: 4,
      max_region: 256 * PAGE_SIZE,
      oversize: OversizePolicy::Extend,
    }
  }
}

impl HeapConfig {
  pub const fn with_initial_region(
    mut self,
    bytes: usize,
  ) -> Self {
    self.initial_region = bytes;
    self
  }

  pub const fn with_growth_factor(
    mut self,
    factor: usize,
  ) -> Self {
    self.growth_factor = factor;
    self
  }

  pub const fn with_max_region(
    mut self,
    bytes: usize,
  ) -> Self {
    self.max_region = bytes;
    self
  }

  pub const fn with_oversize(
    mut self,
    policy: OversizePolicy,
  ) -> Self {
    self.oversize = policy;
    self
  }

  /// Number of bytes to ask the grower for when no free block can hold a
  /// block of `need` bytes (header included).
  ///
  /// The request is `need * growth_factor`, clamped to `need..=max_region`
  /// and rounded up to `granularity`. A `need` above `max_region` is either
  /// requested as-is or refused, depending on [`OversizePolicy`].
  pub fn growth_request(
    &self,
    need: usize,
    granularity: usize,
  ) -> Result<usize, AllocError> {
    let oom = AllocError::OutOfMemory { requested: need };

    let request = if need > self.max_region {
      match self.oversize {
        OversizePolicy::Extend => need,
        OversizePolicy::Fail => return Err(oom),
      }
    } else {
      need
        .saturating_mul(self.growth_factor.max(1))
        .min(self.max_region)
    };

    let request = request.max(HEADER_SIZE * 2);
    checked_round_up(request, granularity).ok_or(oom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_growth_request_scales_with_need() {
    let config = HeapConfig::default();

    assert_eq!(config.growth_request(112, PAGE_SIZE), Ok(PAGE_SIZE));
    assert_eq!(config.growth_request(2048, PAGE_SIZE), Ok(2 * PAGE_SIZE));
    assert_eq!(config.growth_request(5000, PAGE_SIZE), Ok(5 * PAGE_SIZE));
  }

  #[test]
  fn test_growth_request_is_capped() {
    let config = HeapConfig::default().with_max_region(8 * PAGE_SIZE);

    assert_eq!(
      config.growth_request(3 * PAGE_SIZE, PAGE_SIZE),
      Ok(8 * PAGE_SIZE)
    );
  }

  #[test]
  fn test_oversize_policy() {
    let extend = HeapConfig::default().with_max_region(PAGE_SIZE);
    assert_eq!(
      extend.growth_request(PAGE_SIZE + 16, PAGE_SIZE),
      Ok(2 * PAGE_SIZE)
    );

    let fail = extend.with_oversize(OversizePolicy::Fail);
    assert_eq!(
      fail.growth_request(PAGE_SIZE + 16, PAGE_SIZE),
      Err(AllocError::OutOfMemory {
        requested: PAGE_SIZE + 16
      })
    );
  }

  #[test]
  fn test_growth_request_overflow() {
    let config = HeapConfig::default().with_max_region(usize::MAX);
    assert!(config.growth_request(usize::MAX - 8, PAGE_SIZE).is_err());
  }
}

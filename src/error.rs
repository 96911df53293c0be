use thiserror::Error;

/// Error kinds surfaced by the allocator.
///
/// Every kind carries a stable negative integer code (see [`AllocError::code`])
/// so callers holding the allocator behind a C-style boundary can still tell
/// the failure modes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The address is not the start of any allocated block.
  #[error("invalid address")]
  InvalidAddress,

  /// Zero or misaligned size, misaligned hint, or a length that is not a
  /// multiple of the page size where one is required.
  #[error("invalid argument")]
  InvalidArgument,

  /// The page provider could not satisfy a reservation request.
  #[error("out of memory")]
  OutOfMemory,

  /// The block backing the address is already free.
  #[error("double free")]
  DoubleFree,

  /// An internal invariant does not hold. Reported by `verify` only.
  #[error("heap corrupted")]
  Corrupted,

  /// The operation needs an initialized allocator and auto-init was not
  /// applicable or failed.
  #[error("allocator not initialized")]
  Uninitialized,
}

impl AllocError {
  /// Stable negative code for this error kind.
  pub fn code(self) -> i32 {
    match self {
      AllocError::InvalidAddress => -1,
      AllocError::InvalidArgument => -2,
      AllocError::OutOfMemory => -3,
      AllocError::DoubleFree => -5,
      AllocError::Corrupted => -6,
      AllocError::Uninitialized => -7,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::AllocError;

  #[test]
  fn codes_are_negative_and_distinct() {
    let kinds = [
      AllocError::InvalidAddress,
      AllocError::InvalidArgument,
      AllocError::OutOfMemory,
      AllocError::DoubleFree,
      AllocError::Corrupted,
      AllocError::Uninitialized,
    ];

    for kind in kinds {
      assert!(kind.code() < 0);
    }

    for (i, a) in kinds.iter().enumerate() {
      for b in kinds.iter().skip(i + 1) {
        assert_ne!(a.code(), b.code());
      }
    }
  }

  #[test]
  fn double_free_and_invalid_address_are_distinguishable() {
    assert_ne!(AllocError::DoubleFree.code(), AllocError::InvalidAddress.code());
  }
}

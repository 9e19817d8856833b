//! Address range of the code the runtime owns.

use crate::{FaultError, Result};

/// `[start, end]` of the runtime's text segment. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleTextRange {
    start: usize,
    end: usize,
}

impl ModuleTextRange {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start == 0 || end < start {
            return Err(FaultError::InvalidTextRange { start, end });
        }
        Ok(Self { start, end })
    }

    #[inline(always)]
    pub const fn contains(&self, ip: usize) -> bool {
        self.start <= ip && ip <= self.end
    }

    pub const fn start(&self) -> usize {
        self.start
    }

    pub const fn end(&self) -> usize {
        self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_inclusive() {
        let range = ModuleTextRange::new(0x40_1000, 0x40_2000).unwrap();
        assert!(range.contains(0x40_1000));
        assert!(range.contains(0x40_2000));
        assert!(!range.contains(0x40_0fff));
        assert!(!range.contains(0x40_2001));
    }

    #[test]
    fn test_rejects_empty_and_inverted() {
        assert!(matches!(
            ModuleTextRange::new(0, 0x1000),
            Err(FaultError::InvalidTextRange { .. })
        ));
        assert!(ModuleTextRange::new(0x2000, 0x1000).is_err());
        assert!(ModuleTextRange::new(0x1000, 0x1000).is_ok());
    }
}

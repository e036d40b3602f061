//! Work-size description for kernel dispatch.

use super::status::Status;

/// Global (and optional local) work size of a dispatch, 1 to 3 dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    dims: u32,
    global: [usize; 3],
    local: Option<[usize; 3]>,
}

impl NdRange {
    /// One-dimensional range covering `n` items, rounded up to a whole number
    /// of `local`-sized work groups.
    pub fn linear(n: usize, local: usize) -> Self {
        let local = local.max(1);
        Self {
            dims: 1,
            global: [n.div_ceil(local) * local, 1, 1],
            local: Some([local, 1, 1]),
        }
    }

    /// Two-dimensional range with one work item per pixel.
    pub fn planar(width: u32, height: u32) -> Self {
        Self {
            dims: 2,
            global: [width as usize, height as usize, 1],
            local: None,
        }
    }

    /// Range with explicit sizes; `global.len()` selects the dimension count.
    pub fn new(global: &[usize], local: Option<&[usize]>) -> Self {
        let dims = global.len().min(3) as u32;
        let mut g = [1usize; 3];
        g[..dims as usize].copy_from_slice(&global[..dims as usize]);
        let local = local.map(|l| {
            let mut out = [1usize; 3];
            let n = l.len().min(3);
            out[..n].copy_from_slice(&l[..n]);
            out
        });
        Self {
            dims,
            global: g,
            local,
        }
    }

    pub fn with_local(mut self, local: [usize; 3]) -> Self {
        self.local = Some(local);
        self
    }

    pub fn dims(&self) -> u32 {
        self.dims
    }

    pub fn global(&self) -> [usize; 3] {
        self.global
    }

    pub fn local(&self) -> Option<[usize; 3]> {
        self.local
    }

    /// Checks dimensions and that the local size evenly divides the global size.
    pub fn validate(&self) -> Result<(), Status> {
        let dims = self.dims as usize;
        if !(1..=3).contains(&dims) {
            return Err(Status::INVALID_WORK_DIMENSION);
        }
        if self.global[..dims].contains(&0) {
            return Err(Status::INVALID_GLOBAL_WORK_SIZE);
        }
        if let Some(local) = self.local {
            let uneven = (0..dims).any(|i| local[i] == 0 || self.global[i] % local[i] != 0);
            if uneven {
                return Err(Status::INVALID_WORK_GROUP_SIZE);
            }
        }
        Ok(())
    }

    /// Total number of work items.
    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }
}

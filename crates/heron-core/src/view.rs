use crate::backend::{Backend, BackendStorage};
use crate::error::Result;
use crate::region::Region;

// Views — Non-owning windows into backend storage
//
// A matrix owns its storage; a sub-matrix is only an offset + extent into it.
// These two types are the Rust rendering of that rule: they borrow a storage
// buffer and carry a Region that was checked against the buffer's size when
// the view was constructed. Nothing downstream ever sees raw offsets.

/// Read-only view of a region of a storage buffer.
pub struct MatrixRef<'a, B: Backend> {
    storage: &'a B::Storage,
    region: Region,
}

impl<B: Backend> Clone for MatrixRef<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for MatrixRef<'_, B> {}

impl<B: Backend> std::fmt::Debug for MatrixRef<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixRef")
            .field("region", &self.region)
            .finish()
    }
}

impl<'a, B: Backend> MatrixRef<'a, B> {
    /// Build a view, failing if `region` does not fit in `storage`.
    pub fn new(storage: &'a B::Storage, region: Region) -> Result<Self> {
        region.check_fits(storage.num_rows(), storage.num_cols())?;
        Ok(MatrixRef { storage, region })
    }

    /// View of the whole buffer.
    pub fn whole(storage: &'a B::Storage) -> Self {
        MatrixRef {
            storage,
            region: Region::whole(storage.num_rows(), storage.num_cols()),
        }
    }

    pub fn storage(&self) -> &'a B::Storage {
        self.storage
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn num_rows(&self) -> usize {
        self.region.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.region.num_cols
    }

    pub fn dims(&self) -> (usize, usize) {
        self.region.dims()
    }

    /// Narrow this view to rows `[start, start + len)`.
    pub fn rows(&self, start: usize, len: usize) -> Result<Self> {
        Ok(MatrixRef {
            storage: self.storage,
            region: self.region.narrow_rows(start, len)?,
        })
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        B::to_f32_vec(self)
    }
}

/// Mutable view of a region of a storage buffer.
pub struct MatrixMut<'a, B: Backend> {
    storage: &'a mut B::Storage,
    region: Region,
}

impl<B: Backend> std::fmt::Debug for MatrixMut<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixMut")
            .field("region", &self.region)
            .finish()
    }
}

impl<'a, B: Backend> MatrixMut<'a, B> {
    /// Build a view, failing if `region` does not fit in `storage`.
    pub fn new(storage: &'a mut B::Storage, region: Region) -> Result<Self> {
        region.check_fits(storage.num_rows(), storage.num_cols())?;
        Ok(MatrixMut { storage, region })
    }

    /// View of the whole buffer.
    pub fn whole(storage: &'a mut B::Storage) -> Self {
        let region = Region::whole(storage.num_rows(), storage.num_cols());
        MatrixMut { storage, region }
    }

    pub fn storage(&self) -> &B::Storage {
        &*self.storage
    }

    pub fn storage_mut(&mut self) -> &mut B::Storage {
        &mut *self.storage
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn num_rows(&self) -> usize {
        self.region.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.region.num_cols
    }

    pub fn dims(&self) -> (usize, usize) {
        self.region.dims()
    }

    /// Read-only view of the same region.
    pub fn view(&self) -> MatrixRef<'_, B> {
        MatrixRef {
            storage: &*self.storage,
            region: self.region,
        }
    }

    /// Shorter-lived mutable view of the same region.
    pub fn reborrow(&mut self) -> MatrixMut<'_, B> {
        MatrixMut {
            storage: &mut *self.storage,
            region: self.region,
        }
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        B::to_f32_vec(&self.view())
    }
}

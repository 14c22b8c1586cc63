use crate::error::{Result, SemanticAeError};
use candle_core::{DType, Device, Tensor};

/// Prototype embeddings: row 0 is padding, rows `1..=N` belong to the
/// attributes.
///
/// The table is a plain tensor, not a `Var`, and it is never handed to
/// an optimizer. Gradients computed through [`PrototypeTable::get`] stop
/// at the returned (detached) rows; [`PrototypeTable::reproject`] is the
/// only way rows `1..=N` change.
pub struct PrototypeTable {
    num_prototypes: usize,
    dim: usize,
    weight: Tensor,
}

impl PrototypeTable {
    /// Rows `1..=N` ~ N(0, 1), row 0 = 0
    pub fn new(num_prototypes: usize, dim: usize, device: &Device) -> Result<Self> {
        let padding = Tensor::zeros((1, dim), DType::F32, device)?;
        let learned = Tensor::randn(0f32, 1f32, (num_prototypes, dim), device)?;
        let weight = Tensor::cat(&[&padding, &learned], 0)?;
        Ok(Self {
            num_prototypes,
            dim,
            weight,
        })
    }

    pub fn num_prototypes(&self) -> usize {
        self.num_prototypes
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn device(&self) -> &Device {
        self.weight.device()
    }

    /// all `N + 1` rows, padding included
    pub fn weight(&self) -> Tensor {
        self.weight.detach()
    }

    /// rows `1..=N` as an `N x D` matrix
    pub fn learned(&self) -> Result<Tensor> {
        Ok(self.weight.narrow(0, 1, self.num_prototypes)?.detach())
    }

    fn check_index(&self, k: usize) -> Result<()> {
        if k == 0 || k > self.num_prototypes {
            return Err(SemanticAeError::PrototypeIndexOutOfRange {
                index: k,
                num_prototypes: self.num_prototypes,
            });
        }
        Ok(())
    }

    /// `D`-vector of prototype `k` in `1..=N`
    pub fn get(&self, k: usize) -> Result<Tensor> {
        self.check_index(k)?;
        Ok(self.weight.get(k)?.detach())
    }

    /// Overwrite row `k` with `vector` (any shape holding `D` values)
    pub fn reproject(&mut self, k: usize, vector: &Tensor) -> Result<()> {
        self.check_index(k)?;

        if vector.elem_count() != self.dim {
            return Err(SemanticAeError::EmbeddingDim {
                expected: self.dim,
                got: vector.elem_count(),
            });
        }

        let row = vector
            .detach()
            .to_device(self.weight.device())?
            .to_dtype(DType::F32)?
            .reshape((1, self.dim))?;

        let nrows = self.num_prototypes + 1;
        let mut pieces = vec![self.weight.narrow(0, 0, k)?, row];
        if k + 1 < nrows {
            pieces.push(self.weight.narrow(0, k + 1, nrows - k - 1)?);
        }
        self.weight = Tensor::cat(&pieces, 0)?;
        Ok(())
    }

    /// Replace the whole table, e.g., from saved weights
    pub fn load_weight(&mut self, weight: &Tensor) -> Result<()> {
        let expected = [self.num_prototypes + 1, self.dim];
        if weight.dims() != expected {
            return Err(SemanticAeError::InputShape {
                expected: expected.to_vec(),
                got: weight.dims().to_vec(),
            });
        }
        self.weight = weight
            .detach()
            .to_device(self.weight.device())?
            .to_dtype(DType::F32)?;
        Ok(())
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            num_prototypes: self.num_prototypes,
            dim: self.dim,
            weight: self.weight.to_device(device)?,
        })
    }
}

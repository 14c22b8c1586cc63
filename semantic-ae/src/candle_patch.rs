use crate::error::{Result, SemanticAeError};
use candle_core::Tensor;

/// A fixed window on the encoder's feature-map grid.
///
/// Patches carry no weights; the same descriptor slices any feature map
/// of the matching grid size, and `index` is its position in the
/// enumeration returned by [`Patch::from_spec`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Patch {
    index: usize,
    row: usize,
    col: usize,
    height: usize,
    width: usize,
    grid_height: usize,
    grid_width: usize,
}

/// Window offsets along one axis: step by `size`, plus one window flush
/// with the far edge when `size` does not divide `grid`.
fn window_offsets(grid: usize, size: usize) -> Vec<usize> {
    let mut offsets: Vec<usize> = (0..=grid - size).step_by(size).collect();
    let last = grid - size;
    if offsets.last() != Some(&last) {
        offsets.push(last);
    }
    offsets
}

impl Patch {
    /// Enumerate the windows of size `patch` over a grid of size `grid`
    /// in row-major order.
    pub fn from_spec(grid: (usize, usize), patch: (usize, usize)) -> Result<Vec<Patch>> {
        let (grid_height, grid_width) = grid;
        let (height, width) = patch;

        if height == 0 || width == 0 {
            return Err(SemanticAeError::ZeroPatchSize);
        }
        if height > grid_height || width > grid_width {
            return Err(SemanticAeError::PatchTooLarge {
                patch_size: height.max(width),
                output_size: grid_height.min(grid_width),
            });
        }

        let rows = window_offsets(grid_height, height);
        let cols = window_offsets(grid_width, width);

        let patches = rows
            .iter()
            .flat_map(|&row| cols.iter().map(move |&col| (row, col)))
            .enumerate()
            .map(|(index, (row, col))| Patch {
                index,
                row,
                col,
                height,
                width,
                grid_height,
                grid_width,
            })
            .collect();

        Ok(patches)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// top-left grid cell `(row, col)`
    pub fn offset(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// `(height, width)` in grid cells
    pub fn extent(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn area(&self) -> usize {
        self.height * self.width
    }

    /// embedding dimension for a feature map with `num_channels`
    pub fn dim(&self, num_channels: usize) -> usize {
        num_channels * self.area()
    }

    /// grid cells covered by this window
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.row..self.row + self.height)
            .flat_map(move |i| (self.col..self.col + self.width).map(move |j| (i, j)))
    }

    /// Slice the window out of `z_nchw` and flatten it into one
    /// embedding per batch element: `n x (c * h * w)`
    pub fn forward(&self, z_nchw: &Tensor) -> Result<Tensor> {
        let dims = z_nchw.dims();
        if dims.len() != 4 || dims[2] != self.grid_height || dims[3] != self.grid_width {
            return Err(SemanticAeError::InputShape {
                expected: vec![
                    dims.first().copied().unwrap_or(0),
                    dims.get(1).copied().unwrap_or(0),
                    self.grid_height,
                    self.grid_width,
                ],
                got: dims.to_vec(),
            });
        }

        Ok(z_nchw
            .narrow(2, self.row, self.height)?
            .narrow(3, self.col, self.width)?
            .flatten_from(1)?)
    }
}

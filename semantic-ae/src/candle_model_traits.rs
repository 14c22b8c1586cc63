use crate::error::Result;
use candle_core::Tensor;

pub trait ImageEncoderT {
    /// An encoder that maps an image batch to a square feature map
    ///
    /// # Arguments
    /// * `x_nchw` - images (n x 3 x r x r)
    ///
    /// # Returns `z_nchw` (n x c x s x s)
    fn forward(&self, x_nchw: &Tensor) -> Result<Tensor>;

    /// side length `r` of the expected input images
    fn input_size(&self) -> usize;

    /// side length `s` of the feature map
    fn output_size(&self) -> usize;

    /// channels `c` of the feature map
    fn num_out_channels(&self) -> usize;
}

pub trait ImageDecoderT {
    /// A decoder that spits out a reconstruction
    ///
    /// # Arguments
    /// * `z_nchw` - feature map (n x c x s x s)
    ///
    /// # Returns `x_nchw` (n x 3 x r x r)
    fn forward(&self, z_nchw: &Tensor) -> Result<Tensor>;

    fn num_in_channels(&self) -> usize;

    fn output_size(&self) -> usize;
}

/// Check that `x` has shape `(n, expected...)` for any batch size `n`
pub(crate) fn check_batch_shape(x: &Tensor, expected: &[usize]) -> Result<()> {
    let dims = x.dims();
    if dims.len() != expected.len() + 1 || &dims[1..] != expected {
        let mut want = vec![dims.first().copied().unwrap_or(0)];
        want.extend_from_slice(expected);
        return Err(crate::error::SemanticAeError::InputShape {
            expected: want,
            got: dims.to_vec(),
        });
    }
    Ok(())
}

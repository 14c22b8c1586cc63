use crate::candle_aux_layers::StackLayers;
use crate::candle_inference::ConvSpec;
use crate::candle_model_traits::*;
use crate::error::{Result, SemanticAeError};
use crate::candle_conv_encoder::IMAGE_CHANNELS;
use candle_core::Tensor;
use candle_nn::{ConvTranspose2d, ConvTranspose2dConfig, Module, VarBuilder};

/// Mirror of [`crate::candle_conv_encoder::ConvEncoder`]: transposed
/// convolutions walk the encoder's stage sizes and channels backwards,
/// ReLU in between, sigmoid on the reconstructed image.
pub struct ConvDecoder {
    num_in_channels: usize,
    input_size: usize,
    output_size: usize,
    deconvs: StackLayers<ConvTranspose2d>,
}

impl ImageDecoderT for ConvDecoder {
    fn forward(&self, z_nchw: &Tensor) -> Result<Tensor> {
        let s = self.input_size;
        check_batch_shape(z_nchw, &[self.num_in_channels, s, s])?;
        Ok(self.deconvs.forward(z_nchw)?)
    }

    fn num_in_channels(&self) -> usize {
        self.num_in_channels
    }

    fn output_size(&self) -> usize {
        self.output_size
    }
}

/// `output_padding` so that a transposed convolution maps `input_size`
/// exactly back onto `target_size`
fn output_padding(input_size: usize, target_size: usize, spec: &ConvSpec) -> Result<usize> {
    let base = (input_size.saturating_sub(1) * spec.stride + spec.kernel_size)
        .checked_sub(2 * spec.padding);

    match base.and_then(|b| target_size.checked_sub(b)) {
        Some(pad) if pad < spec.stride.max(1) => Ok(pad),
        _ => Err(SemanticAeError::ConvGeometry(format!(
            "cannot upsample {} to {} with {:?}",
            input_size, target_size, spec
        ))),
    }
}

impl ConvDecoder {
    /// Will create a new decoder with these variables:
    ///
    /// * `deconv.{}.weight` and `deconv.{}.bias` where {} runs from
    ///   the deepest volume to the image
    ///
    /// # Arguments
    /// * `stage_sizes` - encoder spatial sizes, input first
    /// * `stage_channels` - encoder output channels per volume
    /// * `spec` - encoder convolution spec
    /// * `vs` - variable builder
    pub fn new(
        stage_sizes: &[usize],
        stage_channels: &[usize],
        spec: ConvSpec,
        vs: VarBuilder,
    ) -> Result<Self> {
        let depth = stage_channels.len();
        if depth == 0 || stage_sizes.len() != depth + 1 {
            return Err(SemanticAeError::ConvGeometry(format!(
                "{} stage sizes for {} volumes",
                stage_sizes.len(),
                depth
            )));
        }

        let mut deconvs = StackLayers::<ConvTranspose2d>::new();

        for (step, j) in (0..depth).rev().enumerate() {
            let in_channels = stage_channels[j];
            let out_channels = if j == 0 {
                IMAGE_CHANNELS
            } else {
                stage_channels[j - 1]
            };

            let config = ConvTranspose2dConfig {
                padding: spec.padding,
                output_padding: output_padding(stage_sizes[j + 1], stage_sizes[j], &spec)?,
                stride: spec.stride,
                dilation: 1,
            };

            let _name = format!("deconv.{}", step);
            let layer = candle_nn::conv_transpose2d(
                in_channels,
                out_channels,
                spec.kernel_size,
                config,
                vs.pp(_name),
            )?;

            if j == 0 {
                deconvs.push_with_act(layer, candle_nn::Activation::Sigmoid);
            } else {
                deconvs.push_with_act(layer, candle_nn::Activation::Relu);
            }
        }

        Ok(Self {
            num_in_channels: stage_channels[depth - 1],
            input_size: stage_sizes[depth],
            output_size: stage_sizes[0],
            deconvs,
        })
    }
}

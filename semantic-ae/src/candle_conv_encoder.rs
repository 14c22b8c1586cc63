use crate::candle_aux_layers::StackLayers;
use crate::candle_inference::ConvSpec;
use crate::candle_model_traits::*;
use crate::error::{Result, SemanticAeError};
use candle_core::Tensor;
use candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder};

pub const IMAGE_CHANNELS: usize = 3;
pub const BASE_CHANNELS: usize = 128;
pub const CHANNEL_GROWTH_FACTOR: usize = 2;

/// `out = 1 + (in - k + 2p) / s`, or `None` if the window does not fit
pub fn conv_output_size(input_size: usize, spec: &ConvSpec) -> Option<usize> {
    if spec.stride == 0 {
        return None;
    }
    (input_size + 2 * spec.padding)
        .checked_sub(spec.kernel_size)
        .map(|span| 1 + span / spec.stride)
}

/// Spatial size after each volume, starting with the input size, so the
/// result has `num_conv_volumes + 1` entries.
pub fn stage_sizes(
    input_size: usize,
    num_conv_volumes: usize,
    spec: &ConvSpec,
) -> Result<Vec<usize>> {
    let mut sizes = Vec::with_capacity(num_conv_volumes + 1);
    sizes.push(input_size);
    let mut size = input_size;
    for stage in 0..num_conv_volumes {
        size = conv_output_size(size, spec).ok_or_else(|| {
            SemanticAeError::ConvGeometry(format!(
                "volume {} cannot convolve a {}x{} map with {:?}",
                stage, size, size, spec
            ))
        })?;
        sizes.push(size);
    }
    Ok(sizes)
}

/// Output channels after each volume: 128, 256, 512, ...
pub fn stage_channels(num_conv_volumes: usize) -> Vec<usize> {
    (0..num_conv_volumes)
        .map(|j| BASE_CHANNELS * CHANNEL_GROWTH_FACTOR.pow(j as u32))
        .collect()
}

/// Stack of strided convolutions, each followed by ReLU
pub struct ConvEncoder {
    input_size: usize,
    spec: ConvSpec,
    stage_sizes: Vec<usize>,
    stage_channels: Vec<usize>,
    convs: StackLayers<Conv2d>,
}

impl ImageEncoderT for ConvEncoder {
    fn forward(&self, x_nchw: &Tensor) -> Result<Tensor> {
        let r = self.input_size;
        check_batch_shape(x_nchw, &[IMAGE_CHANNELS, r, r])?;
        Ok(self.convs.forward(x_nchw)?)
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn output_size(&self) -> usize {
        *self.stage_sizes.last().unwrap_or(&self.input_size)
    }

    fn num_out_channels(&self) -> usize {
        *self.stage_channels.last().unwrap_or(&IMAGE_CHANNELS)
    }
}

impl ConvEncoder {
    /// Will create a new convolutional encoder with these variables:
    ///
    /// * `conv.{}.weight` and `conv.{}.bias` where {} is the volume index
    ///
    /// # Arguments
    /// * `input_size` - side length of the square input images
    /// * `num_conv_volumes` - number of convolution volumes (depth)
    /// * `spec` - kernel size, stride, padding of every volume
    /// * `vs` - variable builder
    pub fn new(
        input_size: usize,
        num_conv_volumes: usize,
        spec: ConvSpec,
        vs: VarBuilder,
    ) -> Result<Self> {
        if num_conv_volumes == 0 {
            return Err(SemanticAeError::ConvGeometry(
                "need at least one convolution volume".into(),
            ));
        }

        let stage_sizes = stage_sizes(input_size, num_conv_volumes, &spec)?;
        let stage_channels = stage_channels(num_conv_volumes);

        let config = Conv2dConfig {
            padding: spec.padding,
            stride: spec.stride,
            ..Default::default()
        };

        let mut convs = StackLayers::<Conv2d>::new();
        let mut in_channels = IMAGE_CHANNELS;
        for (j, &out_channels) in stage_channels.iter().enumerate() {
            let _name = format!("conv.{}", j);
            convs.push_with_act(
                candle_nn::conv2d(in_channels, out_channels, spec.kernel_size, config, vs.pp(_name))?,
                candle_nn::Activation::Relu,
            );
            in_channels = out_channels;
        }

        Ok(Self {
            input_size,
            spec,
            stage_sizes,
            stage_channels,
            convs,
        })
    }

    pub fn spec(&self) -> &ConvSpec {
        &self.spec
    }

    pub fn num_conv_volumes(&self) -> usize {
        self.convs.len()
    }

    pub fn stage_sizes(&self) -> &[usize] {
        &self.stage_sizes
    }

    pub fn stage_channels(&self) -> &[usize] {
        &self.stage_channels
    }

    /// Feature map after the first `num_volumes` volumes only
    pub fn forward_volumes(&self, x_nchw: &Tensor, num_volumes: usize) -> Result<Tensor> {
        let r = self.input_size;
        check_batch_shape(x_nchw, &[IMAGE_CHANNELS, r, r])?;
        Ok(self.convs.forward_upto(x_nchw, num_volumes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn analytic_sizes() {
        let spec = ConvSpec::default();
        assert_eq!(stage_sizes(64, 3, &spec).unwrap(), vec![64, 32, 16, 8]);
        assert_eq!(stage_sizes(32, 2, &spec).unwrap(), vec![32, 16, 8]);
        assert_eq!(stage_channels(3), vec![128, 256, 512]);

        let valid = ConvSpec {
            kernel_size: 5,
            stride: 1,
            padding: 0,
        };
        assert_eq!(stage_sizes(7, 1, &valid).unwrap(), vec![7, 3]);
        assert!(stage_sizes(7, 2, &valid).is_err());
    }

    #[test]
    fn every_volume_matches_analytic_size() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let spec = ConvSpec {
            kernel_size: 4,
            stride: 3,
            padding: 2,
        };
        let encoder = ConvEncoder::new(30, 2, spec, vb.pp("enc"))?;

        let x = Tensor::rand(0f32, 1f32, (2, 3, 30, 30), &device)?;
        for j in 0..=encoder.num_conv_volumes() {
            let z = encoder.forward_volumes(&x, j)?;
            let s = encoder.stage_sizes()[j];
            assert_eq!(z.dims()[2..], [s, s]);
        }
        let z = encoder.forward(&x)?;
        assert_eq!(
            z.dims(),
            &[2, encoder.num_out_channels(), encoder.output_size(), encoder.output_size()]
        );
        Ok(())
    }

    #[test]
    fn rejects_wrong_input_shape() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = ConvEncoder::new(16, 1, ConvSpec::default(), vb)?;

        let x = Tensor::zeros((1, 3, 15, 16), DType::F32, &device)?;
        assert!(matches!(
            encoder.forward(&x),
            Err(SemanticAeError::InputShape { .. })
        ));

        let x = Tensor::zeros((1, 1, 16, 16), DType::F32, &device)?;
        assert!(matches!(
            encoder.forward(&x),
            Err(SemanticAeError::InputShape { .. })
        ));
        Ok(())
    }
}

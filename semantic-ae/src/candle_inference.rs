use serde::{Deserialize, Serialize};

fn default_num_conv_volumes() -> usize {
    3
}

fn default_kernel_size() -> usize {
    3
}

fn default_conv_stride() -> usize {
    2
}

fn default_conv_padding() -> usize {
    1
}

/// Kernel size, stride and padding shared by every convolution volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl Default for ConvSpec {
    fn default() -> Self {
        Self {
            kernel_size: default_kernel_size(),
            stride: default_conv_stride(),
            padding: default_conv_padding(),
        }
    }
}

/// Model construction parameters.
///
/// The field names follow the run `config.json` written next to model
/// weights; the encoder fields may be omitted there and take the
/// defaults (3 volumes, 3x3 kernels, stride 2, padding 1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticAeConfig {
    pub input_image_size: usize,
    pub patch_size: usize,
    pub num_prototypes: usize,
    #[serde(default = "default_num_conv_volumes")]
    pub num_conv_volumes: usize,
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    #[serde(default = "default_conv_stride")]
    pub conv_stride: usize,
    #[serde(default = "default_conv_padding")]
    pub conv_padding: usize,
}

impl SemanticAeConfig {
    pub fn new(input_image_size: usize, patch_size: usize, num_prototypes: usize) -> Self {
        Self {
            input_image_size,
            patch_size,
            num_prototypes,
            num_conv_volumes: default_num_conv_volumes(),
            kernel_size: default_kernel_size(),
            conv_stride: default_conv_stride(),
            conv_padding: default_conv_padding(),
        }
    }

    pub fn with_num_conv_volumes(mut self, num_conv_volumes: usize) -> Self {
        self.num_conv_volumes = num_conv_volumes;
        self
    }

    pub fn with_conv_spec(mut self, spec: ConvSpec) -> Self {
        self.kernel_size = spec.kernel_size;
        self.conv_stride = spec.stride;
        self.conv_padding = spec.padding;
        self
    }

    pub fn conv_spec(&self) -> ConvSpec {
        ConvSpec {
            kernel_size: self.kernel_size,
            stride: self.conv_stride,
            padding: self.conv_padding,
        }
    }
}

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SemanticAeError {
    #[error("patch size must be positive")]
    ZeroPatchSize,

    #[error("patch size {patch_size} exceeds encoder output size {output_size}")]
    PatchTooLarge {
        patch_size: usize,
        output_size: usize,
    },

    #[error("input shape mismatch: expected {expected:?}, got {got:?}")]
    InputShape {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("invalid convolution geometry: {0}")]
    ConvGeometry(String),

    #[error("patch index {patch_idx} out of range ({num_patches} patches)")]
    PatchIndexOutOfRange { patch_idx: usize, num_patches: usize },

    #[error("prototype index {index} out of range (1..={num_prototypes})")]
    PrototypeIndexOutOfRange { index: usize, num_prototypes: usize },

    #[error("image {image_idx} carries attribute {attribute}, expected 1..={num_prototypes}")]
    InvalidAttribute {
        image_idx: usize,
        attribute: usize,
        num_prototypes: usize,
    },

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    EmbeddingDim { expected: usize, got: usize },

    #[error("no input gradient above threshold for patch {patch_idx}")]
    DegenerateReceptiveField { patch_idx: usize },

    #[error("no candidate patches for prototype {prototype}")]
    EmptyCandidateSet { prototype: usize },

    #[error("weight `{0}` is missing")]
    MissingWeight(String),

    #[error("sample index {index} out of range ({num_samples} samples)")]
    SampleIndexOutOfRange { index: usize, num_samples: usize },

    #[error("run directory {0:?} has no config.json")]
    MissingConfig(PathBuf),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SemanticAeError>;

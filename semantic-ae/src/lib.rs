pub mod candle_attribute_data_loader;
pub mod candle_aux_layers;
pub mod candle_conv_decoder;
pub mod candle_conv_encoder;
pub mod candle_inference;
pub mod candle_model_traits;
pub mod candle_nearest_patch;
pub mod candle_patch;
pub mod candle_prototype_table;
pub mod candle_receptive_field;
pub mod candle_semantic_ae;
pub mod cli;
pub mod context;
pub mod error;

pub use candle_core;
pub use candle_nn;

use crate::candle_attribute_data_loader::AttributeDataLoader;
use crate::candle_aux_layers::vars_with_prefix;
use crate::candle_conv_decoder::ConvDecoder;
use crate::candle_conv_encoder::{ConvEncoder, IMAGE_CHANNELS};
use crate::candle_inference::SemanticAeConfig;
use crate::candle_model_traits::*;
use crate::candle_nearest_patch::*;
use crate::candle_patch::Patch;
use crate::candle_prototype_table::PrototypeTable;
use crate::candle_receptive_field::*;
use crate::error::{Result, SemanticAeError};

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// key of the prototype table in saved weights
pub const PROTOTYPE_WEIGHT_KEY: &str = "prototypes.weight";

pub struct SemanticAeOutput {
    /// `n x c x s x s`
    pub feature_map: Tensor,
    /// `n x num_patches x dim_prototypes`, in patch enumeration order
    pub patch_embeddings: Tensor,
    /// `n x 3 x r x r`
    pub reconstruction: Tensor,
}

/// Convolutional autoencoder with a prototype per semantic attribute.
///
/// Encoder and decoder weights live in a `VarMap` and are what
/// [`SemanticAutoencoder::trainable_vars`] hands to an optimizer. The
/// prototype table is kept outside of it and only moves through
/// [`SemanticAutoencoder::reproject_prototypes`].
pub struct SemanticAutoencoder {
    config: SemanticAeConfig,
    device: Device,
    varmap: VarMap,
    encoder: ConvEncoder,
    decoder: ConvDecoder,
    patches: Vec<Patch>,
    prototypes: PrototypeTable,
    receptive_fields: HashMap<usize, ReceptiveField>,
    show_progress: bool,
}

impl SemanticAutoencoder {
    /// Will create a new model with these variables:
    ///
    /// * `enc.conv.{}.weight`, `enc.conv.{}.bias`
    /// * `dec.deconv.{}.weight`, `dec.deconv.{}.bias`
    ///
    /// and a frozen prototype table of `num_prototypes + 1` rows.
    pub fn new(config: SemanticAeConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let encoder = ConvEncoder::new(
            config.input_image_size,
            config.num_conv_volumes,
            config.conv_spec(),
            vs.pp("enc"),
        )?;

        let decoder = ConvDecoder::new(
            encoder.stage_sizes(),
            encoder.stage_channels(),
            config.conv_spec(),
            vs.pp("dec"),
        )?;

        let output_size = encoder.output_size();
        if config.patch_size == 0 {
            return Err(SemanticAeError::ZeroPatchSize);
        }
        if config.patch_size > output_size {
            return Err(SemanticAeError::PatchTooLarge {
                patch_size: config.patch_size,
                output_size,
            });
        }

        let patches = Patch::from_spec(
            (output_size, output_size),
            (config.patch_size, config.patch_size),
        )?;

        let dim_prototypes = encoder.num_out_channels() * config.patch_size.pow(2);
        let prototypes = PrototypeTable::new(config.num_prototypes, dim_prototypes, device)?;

        info!(
            "encoder: {0}x{0} image -> {1} x {2}x{2} feature map",
            config.input_image_size,
            encoder.num_out_channels(),
            output_size
        );
        info!(
            "{} patches of {}x{}, {} prototypes of dim {}",
            patches.len(),
            config.patch_size,
            config.patch_size,
            config.num_prototypes,
            dim_prototypes
        );

        Ok(Self {
            config,
            device: device.clone(),
            varmap,
            encoder,
            decoder,
            patches,
            prototypes,
            receptive_fields: HashMap::new(),
            show_progress: false,
        })
    }

    pub fn config(&self) -> &SemanticAeConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn encoder(&self) -> &ConvEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &ConvDecoder {
        &self.decoder
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn num_patches(&self) -> usize {
        self.patches.len()
    }

    pub fn num_prototypes(&self) -> usize {
        self.prototypes.num_prototypes()
    }

    pub fn dim_prototypes(&self) -> usize {
        self.prototypes.dim()
    }

    pub fn prototype_table(&self) -> &PrototypeTable {
        &self.prototypes
    }

    /// prototype `k` in `1..=N`
    pub fn prototype(&self, k: usize) -> Result<Tensor> {
        self.prototypes.get(k)
    }

    /// learned prototypes as `N x D`
    pub fn prototypes(&self) -> Result<Tensor> {
        self.prototypes.learned()
    }

    /// encoder and decoder parameters; never the prototypes
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn set_show_progress(&mut self, show_progress: bool) {
        self.show_progress = show_progress;
    }

    /// image -> (feature map, patch embeddings, reconstruction)
    pub fn forward(&self, x_nchw: &Tensor) -> Result<SemanticAeOutput> {
        let feature_map = self.encoder.forward(x_nchw)?;
        let reconstruction = self.decoder.forward(&feature_map)?;
        let patch_embeddings = self.patch_embeddings(&feature_map)?;
        Ok(SemanticAeOutput {
            feature_map,
            patch_embeddings,
            reconstruction,
        })
    }

    /// feature map -> `n x num_patches x D`
    pub fn patch_embeddings(&self, z_nchw: &Tensor) -> Result<Tensor> {
        let z_patches = self
            .patches
            .iter()
            .map(|patch| patch.forward(z_nchw))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&z_patches, 1)?)
    }

    /// cached receptive field, if it has been computed already
    pub fn cached_receptive_field(&self, patch_idx: usize) -> Option<ReceptiveField> {
        self.receptive_fields.get(&patch_idx).copied()
    }

    /// Input pixels that affect patch `patch_idx`, computed on the first
    /// call by back-propagating the patch sum to a random input image.
    pub fn get_receptive_field(&mut self, patch_idx: usize) -> Result<ReceptiveField> {
        if let Some(rf) = self.receptive_fields.get(&patch_idx) {
            return Ok(*rf);
        }

        let patch = *self
            .patches
            .get(patch_idx)
            .ok_or(SemanticAeError::PatchIndexOutOfRange {
                patch_idx,
                num_patches: self.patches.len(),
            })?;

        let rf = self.receptive_field_by_gradient(&patch)?;
        debug!(
            "patch {} at {:?}: receptive field {:?} of size {:?}",
            patch_idx,
            patch.offset(),
            rf.offset(),
            rf.size()
        );

        self.receptive_fields.insert(patch_idx, rf);
        Ok(rf)
    }

    /// receptive fields of all patches in enumeration order
    pub fn receptive_fields(&mut self) -> Result<Vec<ReceptiveField>> {
        (0..self.patches.len())
            .map(|j| self.get_receptive_field(j))
            .collect()
    }

    // The input is a fresh leaf variable and the gradient store is local
    // to this call, so nothing is left behind in the model's parameters
    // whether the scan succeeds or not.
    fn receptive_field_by_gradient(&self, patch: &Patch) -> Result<ReceptiveField> {
        let r = self.config.input_image_size;
        let x = Var::rand(0f32, 1f32, (1, IMAGE_CHANNELS, r, r), &self.device)?;

        let z = self.encoder.forward(x.as_tensor())?;
        let grads = patch.forward(&z)?.sum_all()?.backward()?;

        let grad_hw: Vec<Vec<f32>> = match grads.get(x.as_tensor()) {
            Some(grad) => grad.get(0)?.get(0)?.to_vec2()?,
            None => vec![],
        };
        drop(grads);

        bounding_box_above(&grad_hw, GRADIENT_THRESHOLD).ok_or(
            SemanticAeError::DegenerateReceptiveField {
                patch_idx: patch.index(),
            },
        )
    }

    /// For each prototype `k`, the patch nearest to it among all patches
    /// of images that carry attribute `k`.
    ///
    /// Every patch of an image is a candidate for every attribute of
    /// that image. Prototypes whose attribute never occurs are recorded
    /// as empty.
    pub fn find_nearest_patches_for_prototypes<D>(&self, data: &D) -> Result<NearestPatchRecord>
    where
        D: AttributeDataLoader,
    {
        let num_samples = data.num_samples();
        let num_prototypes = self.num_prototypes();
        let num_patches = self.num_patches();

        let pb = ProgressBar::new(num_samples as u64);
        if !self.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        // image -> num_patches x D
        let mut image_patches = Vec::with_capacity(num_samples);
        // prototype -> images carrying its attribute
        let mut images_for_prototype: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for i in 0..num_samples {
            let sample = data.sample(i, &self.device)?;
            let x = sample.image.unsqueeze(0)?;
            let z = self.encoder.forward(&x)?;
            image_patches.push(self.patch_embeddings(&z)?.squeeze(0)?.detach());

            let attributes: BTreeSet<usize> = sample.active_attributes().iter().copied().collect();
            for k in attributes {
                if k == 0 || k > num_prototypes {
                    return Err(SemanticAeError::InvalidAttribute {
                        image_idx: i,
                        attribute: k,
                        num_prototypes,
                    });
                }
                images_for_prototype.entry(k).or_default().push(i);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let mut record = NearestPatchRecord::new();

        for k in 1..=num_prototypes {
            let images = match images_for_prototype.get(&k) {
                Some(images) => images,
                None => {
                    record.insert(k, None);
                    continue;
                }
            };

            let candidates = images
                .iter()
                .map(|&i| &image_patches[i])
                .collect::<Vec<_>>();
            let candidates_md = Tensor::cat(&candidates, 0)?;

            let prototype_d = self.prototypes.get(k)?;
            let nearest = nearest_row(&prototype_d, &candidates_md)?
                .map(|(row, distance)| -> Result<NearestPatch> {
                    Ok(NearestPatch {
                        image_idx: images[row / num_patches],
                        patch_idx: row % num_patches,
                        distance,
                        embedding: candidates_md.get(row)?,
                    })
                })
                .transpose()?;

            record.insert(k, nearest);
        }

        info!(
            "nearest patches found for {} of {} prototypes over {} images",
            record.num_found(),
            num_prototypes,
            num_samples
        );

        Ok(record)
    }

    /// Overwrite each prototype with its recorded nearest patch.
    /// Prototypes without candidates stay as they are.
    ///
    /// # Returns the number of prototypes overwritten
    pub fn reproject_prototypes(&mut self, record: &NearestPatchRecord) -> Result<usize> {
        let mut num_reprojected = 0;
        for (k, nearest) in record.iter() {
            self.prototypes.reproject(k, &nearest.embedding)?;
            num_reprojected += 1;
        }
        for k in record.empty_prototypes() {
            warn!("prototype {} has no candidate patches; not reprojected", k);
        }
        Ok(num_reprojected)
    }

    /// all weights by name, prototypes included
    pub fn named_weights(&self) -> HashMap<String, Tensor> {
        let mut ret: HashMap<String, Tensor> = vars_with_prefix(&self.varmap, "")
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect();
        ret.insert(PROTOTYPE_WEIGHT_KEY.to_string(), self.prototypes.weight());
        ret
    }

    /// Overwrite every weight from `tensors`, matching by name
    pub fn assign_weights(&mut self, tensors: &HashMap<String, Tensor>) -> Result<()> {
        for (name, var) in vars_with_prefix(&self.varmap, "") {
            let value = tensors
                .get(&name)
                .ok_or_else(|| SemanticAeError::MissingWeight(name.clone()))?;
            var.set(&value.to_device(&self.device)?.to_dtype(DType::F32)?)?;
        }

        let prototypes = tensors
            .get(PROTOTYPE_WEIGHT_KEY)
            .ok_or_else(|| SemanticAeError::MissingWeight(PROTOTYPE_WEIGHT_KEY.to_string()))?;
        self.prototypes.load_weight(prototypes)
    }

    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        candle_core::safetensors::save(&self.named_weights(), path.as_ref())?;
        info!("saved weights to {:?}", path.as_ref());
        Ok(())
    }

    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let tensors = candle_core::safetensors::load(path.as_ref(), &self.device)?;
        self.assign_weights(&tensors)?;
        info!("loaded weights from {:?}", path.as_ref());
        Ok(())
    }

    /// Same model on `device`, weights and receptive fields carried over
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        let mut other = Self::new(self.config.clone(), device)?;
        other.assign_weights(&self.named_weights())?;
        other.receptive_fields = self.receptive_fields.clone();
        other.show_progress = self.show_progress;
        info!("moved model to {:?}", device);
        Ok(other)
    }
}

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer};
use semantic_ae::candle_attribute_data_loader::*;
use semantic_ae::candle_inference::SemanticAeConfig;
use semantic_ae::candle_model_traits::ImageEncoderT;
use semantic_ae::candle_semantic_ae::SemanticAutoencoder;
use semantic_ae::context::ModelContext;
use semantic_ae::error::SemanticAeError;

fn small_config() -> SemanticAeConfig {
    SemanticAeConfig::new(16, 1, 4).with_num_conv_volumes(2)
}

fn flat(x: &Tensor) -> anyhow::Result<Vec<f32>> {
    Ok(x.flatten_all()?.to_vec1::<f32>()?)
}

#[test]
fn end_to_end_shapes() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let model = SemanticAutoencoder::new(SemanticAeConfig::new(64, 1, 10), &device)?;

    let encoder = model.encoder();
    assert_eq!(encoder.output_size(), 8);
    assert_eq!(encoder.num_out_channels(), 512);
    assert_eq!(model.dim_prototypes(), encoder.num_out_channels());
    assert_eq!(model.num_patches(), 64);

    let x = Tensor::rand(0f32, 1f32, (5, 3, 64, 64), &device)?;
    let out = model.forward(&x)?;

    assert_eq!(out.feature_map.dims(), &[5, 512, 8, 8]);
    assert_eq!(out.patch_embeddings.dims(), &[5, 64, model.dim_prototypes()]);
    assert_eq!(out.reconstruction.dims(), &[5, 3, 64, 64]);
    Ok(())
}

#[test]
fn patch_embeddings_follow_enumeration_order() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let config = SemanticAeConfig::new(16, 2, 3).with_num_conv_volumes(2);
    let model = SemanticAutoencoder::new(config, &device)?;

    let x = Tensor::rand(0f32, 1f32, (2, 3, 16, 16), &device)?;
    let out = model.forward(&x)?;
    assert_eq!(out.patch_embeddings.dims(), &[2, 4, 256 * 4]);

    for patch in model.patches() {
        let expected = patch.forward(&out.feature_map)?;
        let got = out.patch_embeddings.narrow(1, patch.index(), 1)?.squeeze(1)?;
        assert_eq!(flat(&expected)?, flat(&got)?);
    }
    Ok(())
}

#[test]
fn forward_is_reproducible() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let model = SemanticAutoencoder::new(small_config(), &device)?;
    let x = Tensor::rand(0f32, 1f32, (3, 3, 16, 16), &device)?;

    let a = model.forward(&x)?;
    let b = model.forward(&x)?;
    assert_eq!(flat(&a.feature_map)?, flat(&b.feature_map)?);
    assert_eq!(flat(&a.patch_embeddings)?, flat(&b.patch_embeddings)?);
    assert_eq!(flat(&a.reconstruction)?, flat(&b.reconstruction)?);
    Ok(())
}

#[test]
fn forward_rejects_wrong_image_size() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let model = SemanticAutoencoder::new(small_config(), &device)?;
    let x = Tensor::rand(0f32, 1f32, (1, 3, 32, 32), &device)?;
    assert!(matches!(
        model.forward(&x),
        Err(SemanticAeError::InputShape { .. })
    ));
    Ok(())
}

#[test]
fn prototypes_stay_frozen_under_training() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let model = SemanticAutoencoder::new(small_config(), &device)?;
    let before = flat(&model.prototype_table().weight())?;
    let enc_before = flat(model.trainable_vars()[0].as_tensor())?;

    let mut adam = AdamW::new_lr(model.trainable_vars(), 1e-2)?;
    let x = Tensor::rand(0f32, 1f32, (4, 3, 16, 16), &device)?;

    for _ in 0..3 {
        let out = model.forward(&x)?;
        let recon = (&out.reconstruction - &x)?.sqr()?.mean_all()?;
        let pull = out
            .patch_embeddings
            .broadcast_sub(&model.prototype(1)?)?
            .sqr()?
            .mean_all()?;
        let loss = (recon + pull)?;
        adam.backward_step(&loss)?;
    }

    let after = flat(&model.prototype_table().weight())?;
    assert_eq!(before, after);

    let enc_after = flat(model.trainable_vars()[0].as_tensor())?;
    assert_ne!(enc_before, enc_after);
    Ok(())
}

#[test]
fn reprojection_makes_prototypes_real_patches() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut model = SemanticAutoencoder::new(small_config(), &device)?;

    let images = Tensor::rand(0f32, 1f32, (4, 3, 16, 16), &device)?;
    let data = InMemoryAttributeData::from_batch(
        &images,
        vec![vec![1, 2], vec![2, 2], vec![1, 3], vec![3]],
    )?;

    let record = model.find_nearest_patches_for_prototypes(&data)?;
    assert_eq!(record.len(), 4);
    assert_eq!(record.num_found(), 3);
    assert_eq!(record.empty_prototypes(), vec![4]);
    assert!(matches!(
        record.get(4),
        Err(SemanticAeError::EmptyCandidateSet { prototype: 4 })
    ));

    // candidates come only from images carrying the attribute
    assert!([0, 2].contains(&record.get(1)?.image_idx));
    assert!([0, 1].contains(&record.get(2)?.image_idx));
    assert!([2, 3].contains(&record.get(3)?.image_idx));

    // the recorded embedding is the real patch of that image
    for k in 1..=3 {
        let nearest = record.get(k)?;
        let x = images.get(nearest.image_idx)?.unsqueeze(0)?;
        let emb = model.forward(&x)?.patch_embeddings.get(0)?.get(nearest.patch_idx)?;
        assert_eq!(flat(&emb)?, flat(&nearest.embedding)?);
    }

    let untouched = flat(&model.prototype(4)?)?;
    assert_eq!(model.reproject_prototypes(&record)?, 3);
    assert_eq!(flat(&model.prototype(4)?)?, untouched);

    let again = model.find_nearest_patches_for_prototypes(&data)?;
    for k in 1..=3 {
        let nearest = again.get(k)?;
        assert_eq!(nearest.distance, 0.0);
        assert_eq!(flat(&model.prototype(k)?)?, flat(&nearest.embedding)?);
    }
    Ok(())
}

#[test]
fn attributes_outside_prototype_range_are_rejected() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let model = SemanticAutoencoder::new(small_config(), &device)?;
    let images = Tensor::rand(0f32, 1f32, (2, 3, 16, 16), &device)?;

    for bad in [0, 5] {
        let data = InMemoryAttributeData::from_batch(&images, vec![vec![1], vec![bad]])?;
        match model.find_nearest_patches_for_prototypes(&data) {
            Err(SemanticAeError::InvalidAttribute {
                image_idx,
                attribute,
                ..
            }) => {
                assert_eq!(image_idx, 1);
                assert_eq!(attribute, bad);
            }
            _ => panic!("attribute {} should be rejected", bad),
        }
    }
    Ok(())
}

#[test]
fn receptive_field_of_first_patch_is_near_origin() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut model = SemanticAutoencoder::new(SemanticAeConfig::new(64, 1, 10), &device)?;
    assert_eq!(model.encoder().output_size(), 8);

    // three 3x3 stride-2 volumes: output cell (0, 0) sees pixels 0..8
    let rf = model.get_receptive_field(0)?;
    let (top, left) = rf.offset();
    assert!(top <= 2 && left <= 2, "offset {:?}", rf.offset());
    assert!(rf.top + rf.height <= 8 && rf.left + rf.width <= 8);

    // output cell (1, 1) sees pixels 1..16 on both axes
    let rf = model.get_receptive_field(9)?;
    assert_eq!(model.patches()[9].offset(), (1, 1));
    assert!(rf.top >= 1 && rf.left >= 1);
    assert!(rf.top + rf.height <= 16 && rf.left + rf.width <= 16);
    Ok(())
}

#[test]
fn larger_patches_have_larger_receptive_fields() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut small = SemanticAutoencoder::new(SemanticAeConfig::new(64, 1, 10), &device)?;
    let mut large = SemanticAutoencoder::new(SemanticAeConfig::new(64, 2, 10), &device)?;

    let rf_small = small.get_receptive_field(0)?;
    let rf_large = large.get_receptive_field(0)?;
    assert!(rf_large.area() > rf_small.area());
    Ok(())
}

#[test]
fn weights_round_trip_through_safetensors() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut model = SemanticAutoencoder::new(small_config(), &device)?;

    let images = Tensor::rand(0f32, 1f32, (2, 3, 16, 16), &device)?;
    let data = InMemoryAttributeData::from_batch(&images, vec![vec![1, 4], vec![2]])?;
    let record = model.find_nearest_patches_for_prototypes(&data)?;
    model.reproject_prototypes(&record)?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("model.safetensors");
    model.save_weights(&path)?;

    let mut other = SemanticAutoencoder::new(small_config(), &device)?;
    assert_ne!(flat(&other.prototypes()?)?, flat(&model.prototypes()?)?);
    other.load_weights(&path)?;

    assert_eq!(flat(&other.prototypes()?)?, flat(&model.prototypes()?)?);
    let a = model.forward(&images)?;
    let b = other.forward(&images)?;
    assert_eq!(flat(&a.reconstruction)?, flat(&b.reconstruction)?);
    Ok(())
}

#[test]
fn run_directory_context_round_trip() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;

    assert!(matches!(
        ModelContext::load(dir.path(), &device),
        Err(SemanticAeError::MissingConfig(_))
    ));

    let model = SemanticAutoencoder::new(small_config(), &device)?;
    let prototypes = flat(&model.prototypes()?)?;
    ModelContext::new(dir.path(), model).save()?;

    let ctx = ModelContext::load(dir.path(), &device)?;
    assert_eq!(ctx.config, small_config());
    assert_eq!(flat(&ctx.model.prototypes()?)?, prototypes);
    Ok(())
}

#[test]
fn device_move_keeps_weights_and_receptive_fields() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut model = SemanticAutoencoder::new(small_config(), &device)?;
    let rf = model.get_receptive_field(3)?;

    let moved = model.to_device(&Device::Cpu)?;
    assert_eq!(moved.cached_receptive_field(3), Some(rf));

    let x = Tensor::rand(0f32, 1f32, (1, 3, 16, 16), &device)?;
    assert_eq!(
        flat(&model.forward(&x)?.patch_embeddings)?,
        flat(&moved.forward(&x)?.patch_embeddings)?
    );
    assert_eq!(flat(&model.prototypes()?)?, flat(&moved.prototypes()?)?);
    Ok(())
}

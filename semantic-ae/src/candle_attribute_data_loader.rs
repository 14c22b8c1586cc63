use crate::error::{Result, SemanticAeError};
use candle_core::{Device, Tensor};
use rand::seq::index::sample;
use rand::Rng;

/// One image with its class label and attribute annotations
pub struct AttributeSample {
    /// `3 x r x r`
    pub image: Tensor,
    pub label: usize,
    /// attribute indices in `1..=N`, possibly padded beyond
    /// `num_attributes`
    pub attributes: Vec<usize>,
    pub num_attributes: usize,
}

impl AttributeSample {
    /// the first `num_attributes` entries of `attributes`
    pub fn active_attributes(&self) -> &[usize] {
        &self.attributes[..self.num_attributes.min(self.attributes.len())]
    }
}

/// `AttributeDataLoader` for the nearest patch search
pub trait AttributeDataLoader {
    fn sample(&self, index: usize, target_device: &Device) -> Result<AttributeSample>;

    fn num_samples(&self) -> usize;
}

///
/// A simple data loader for in-memory images. Each image is kept as a
/// `3 x r x r` tensor together with its label and attribute list.
///
pub struct InMemoryAttributeData {
    images: Vec<Tensor>,
    labels: Vec<usize>,
    attributes: Vec<Vec<usize>>,
}

impl InMemoryAttributeData {
    pub fn new(images: Vec<Tensor>, labels: Vec<usize>, attributes: Vec<Vec<usize>>) -> Result<Self> {
        if images.len() != labels.len() || images.len() != attributes.len() {
            return Err(SemanticAeError::InputShape {
                expected: vec![images.len(); 3],
                got: vec![images.len(), labels.len(), attributes.len()],
            });
        }
        Ok(Self {
            images,
            labels,
            attributes,
        })
    }

    ///
    /// Split an `n x 3 x r x r` batch into one sample per row; every
    /// image gets label 0
    ///
    pub fn from_batch(images_nchw: &Tensor, attributes: Vec<Vec<usize>>) -> Result<Self> {
        let n = images_nchw.dim(0)?;
        let images = (0..n)
            .map(|i| images_nchw.get(i))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Self::new(images, vec![0; n], attributes)
    }

    ///
    /// Uniform random images, each tagged with `attributes_per_image`
    /// distinct attributes drawn from `1..=num_attributes`
    ///
    pub fn runif(
        num_samples: usize,
        image_size: usize,
        num_attributes: usize,
        attributes_per_image: usize,
        device: &Device,
    ) -> Result<Self> {
        let mut rng = rand::rng();
        let take = attributes_per_image.min(num_attributes);

        let mut images = Vec::with_capacity(num_samples);
        let mut labels = Vec::with_capacity(num_samples);
        let mut attributes = Vec::with_capacity(num_samples);

        for _ in 0..num_samples {
            images.push(Tensor::rand(0f32, 1f32, (3, image_size, image_size), device)?);
            labels.push(rng.random_range(0..num_attributes.max(1)));
            let mut attr: Vec<usize> = sample(&mut rng, num_attributes, take)
                .into_iter()
                .map(|a| a + 1)
                .collect();
            attr.sort_unstable();
            attributes.push(attr);
        }

        Self::new(images, labels, attributes)
    }
}

impl AttributeDataLoader for InMemoryAttributeData {
    fn sample(&self, index: usize, target_device: &Device) -> Result<AttributeSample> {
        let image = self
            .images
            .get(index)
            .ok_or(SemanticAeError::SampleIndexOutOfRange {
                index,
                num_samples: self.images.len(),
            })?;
        let attributes = self.attributes[index].clone();
        Ok(AttributeSample {
            image: image.to_device(target_device)?,
            label: self.labels[index],
            num_attributes: attributes.len(),
            attributes,
        })
    }

    fn num_samples(&self) -> usize {
        self.images.len()
    }
}

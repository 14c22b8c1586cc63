use serde::{Deserialize, Serialize};

/// input gradients at or below this magnitude count as "not reached"
pub const GRADIENT_THRESHOLD: f32 = 1e-6;

/// Axis-aligned pixel box of the input image that affects one patch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceptiveField {
    pub top: usize,
    pub left: usize,
    pub width: usize,
    pub height: usize,
}

impl ReceptiveField {
    /// top-left pixel `(row, col)`
    pub fn offset(&self) -> (usize, usize) {
        (self.top, self.left)
    }

    /// `(width, height)` in pixels
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.top
            && row < self.top + self.height
            && col >= self.left
            && col < self.left + self.width
    }
}

/// Bounding box of all pixels whose gradient magnitude exceeds
/// `threshold`, or `None` if there are none.
///
/// * `grad_hw` - gradient of one input channel, row by row
pub fn bounding_box_above(grad_hw: &[Vec<f32>], threshold: f32) -> Option<ReceptiveField> {
    let mut bbox: Option<(usize, usize, usize, usize)> = None;

    for (i, row) in grad_hw.iter().enumerate() {
        for (j, g) in row.iter().enumerate() {
            if g.abs() > threshold {
                bbox = Some(match bbox {
                    None => (i, j, i, j),
                    Some((top, left, bottom, right)) => {
                        (top.min(i), left.min(j), bottom.max(i), right.max(j))
                    }
                });
            }
        }
    }

    bbox.map(|(top, left, bottom, right)| ReceptiveField {
        top,
        left,
        width: right - left + 1,
        height: bottom - top + 1,
    })
}

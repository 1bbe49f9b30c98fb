use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::dtype::DataType;

/// Tensor shape. Dimensions are positive; most models stay under six axes
/// so the dims live inline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape(pub SmallVec<[u64; 6]>);

impl Shape {
    pub fn from_slice(dims: &[u64]) -> Self {
        Self(dims.iter().copied().collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn num_elements(&self) -> u64 {
        self.0.iter().product::<u64>().max(1)
    }

    pub fn dims(&self) -> &[u64] {
        &self.0
    }
}

impl From<Vec<u64>> for Shape {
    fn from(dims: Vec<u64>) -> Self {
        Self(dims.into_iter().collect())
    }
}

/// Describes one named tensor: what a worker declares it accepts or
/// produces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub shape: Shape,
    pub datatype: DataType,
}

impl TensorDesc {
    pub fn new(name: impl Into<String>, dims: &[u64], datatype: DataType) -> Self {
        Self {
            name: name.into(),
            shape: Shape::from_slice(dims),
            datatype,
        }
    }

    pub fn num_elements(&self) -> u64 {
        self.shape.num_elements()
    }

    /// Total byte size for one instance of this tensor. String tensors are
    /// sized per element and excluded from this accounting.
    pub fn byte_size(&self) -> usize {
        self.num_elements() as usize * self.datatype.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_is_dim_product() {
        let desc = TensorDesc::new("input", &[2, 3, 4], DataType::Fp32);
        assert_eq!(desc.num_elements(), 24);
        assert_eq!(desc.byte_size(), 96);
    }

    #[test]
    fn scalar_shape_counts_one() {
        let shape = Shape::from_slice(&[]);
        assert_eq!(shape.num_elements(), 1);
        assert_eq!(shape.rank(), 0);
    }
}

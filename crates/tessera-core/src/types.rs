//! Core types for element types, tensor shapes and memory layouts.

/// Element data type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    /// Half precision, stored as raw 2-byte words.
    F16,
    I32,
    I64,
    U8,
    /// One byte per element, `0` is false and anything else is true.
    Bool,
}

impl DataType {
    /// Size of this data type in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I64 => 8,
            DataType::U8 | DataType::Bool => 1,
        }
    }
}

/// Declared shape of an operand.
///
/// Only `Static` operands get a fixed-size buffer up front. Everything else
/// starts out as a dynamic tensor whose shape is applied at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorShape {
    /// All dimensions are known at compile time.
    Static(Vec<usize>),

    /// Known rank, with `None` for dimensions only known at run time.
    Dynamic(Vec<Option<usize>>),

    /// Rank and dimensions are not known until run time.
    Unknown,
}

impl TensorShape {
    /// Check if the shape is fully static.
    pub fn is_static(&self) -> bool {
        matches!(self, TensorShape::Static(_))
    }

    /// Get static dimensions if available.
    pub fn as_static(&self) -> Option<&[usize]> {
        match self {
            TensorShape::Static(dims) => Some(dims),
            _ => None,
        }
    }

    /// Number of dimensions, if known.
    pub fn ndim(&self) -> Option<usize> {
        match self {
            TensorShape::Static(dims) => Some(dims.len()),
            TensorShape::Dynamic(dims) => Some(dims.len()),
            TensorShape::Unknown => None,
        }
    }
}

/// Memory layout of a 4-D tensor.
///
/// Lower-rank tensors ignore the layout. The permute layer transposes between
/// layouts when a copy crosses backends that disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    #[default]
    Nhwc,
    Nchw,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DataType::F32.size(), 4);
        assert_eq!(DataType::F16.size(), 2);
        assert_eq!(DataType::I64.size(), 8);
        assert_eq!(DataType::Bool.size(), 1);
    }

    #[test]
    fn test_shape_queries() {
        let s = TensorShape::Static(vec![2, 3]);
        assert!(s.is_static());
        assert_eq!(s.as_static(), Some(&[2usize, 3][..]));
        assert_eq!(s.ndim(), Some(2));

        let d = TensorShape::Dynamic(vec![None, Some(4)]);
        assert!(!d.is_static());
        assert_eq!(d.as_static(), None);
        assert_eq!(d.ndim(), Some(2));

        assert_eq!(TensorShape::Unknown.ndim(), None);
    }
}

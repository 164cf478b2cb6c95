//! Tensor handles and per-executor tensor arenas.

use crate::error::{Result, RuntimeError};
use bytemuck::Pod;
use tessera_core::{DataType, Layout, OperandIndex, Subgraph, TensorShape};

/// Rust element types with a direct `DataType` counterpart.
pub trait Element: Pod {
    const DTYPE: DataType;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;
}

impl Element for i64 {
    const DTYPE: DataType = DataType::I64;
}

impl Element for u8 {
    const DTYPE: DataType = DataType::U8;
}

/// A block of tensor data with shape, element type and layout.
///
/// A tensor is either static (its shape never changes after allocation) or
/// dynamic. Only dynamic tensors accept a new shape; consumers of a dynamic
/// tensor must re-check its shape before every use.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<u8>,
    shape: Vec<usize>,
    dtype: DataType,
    layout: Layout,
    dynamic: bool,
}

impl Tensor {
    /// Create a zero-filled static tensor.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: vec![0; len * dtype.size()],
            shape: shape.to_vec(),
            dtype,
            layout: Layout::default(),
            dynamic: false,
        }
    }

    /// Create a tensor from a vector with a given shape.
    ///
    /// # Example
    /// ```
    /// # use tessera_runtime::Tensor;
    /// let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]);
    /// assert_eq!(tensor.num_elements(), 4);
    /// ```
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: bytemuck::cast_slice(&data).to_vec(),
            shape: shape.to_vec(),
            dtype: T::DTYPE,
            layout: Layout::default(),
            dynamic: false,
        }
    }

    /// Create a boolean tensor.
    pub fn from_bools(data: Vec<bool>, shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: data.into_iter().map(u8::from).collect(),
            shape: shape.to_vec(),
            dtype: DataType::Bool,
            layout: Layout::default(),
            dynamic: false,
        }
    }

    /// Create a rank-0 tensor holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_vec(vec![value], &[])
    }

    /// Create a tensor from raw bytes.
    ///
    /// # Errors
    /// Returns an error if the byte length doesn't match shape and type.
    pub fn from_raw(data: Vec<u8>, shape: &[usize], dtype: DataType) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * dtype.size();
        if data.len() != expected {
            return Err(RuntimeError::Execution(format!(
                "{} bytes don't fit a {dtype:?} tensor of shape {shape:?} ({expected} bytes)",
                data.len()
            )));
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
            dtype,
            layout: Layout::default(),
            dynamic: false,
        })
    }

    /// Allocate the tensor backing a declared operand shape.
    ///
    /// Unknown dimensions start at zero and the tensor is dynamic.
    fn for_declared(dtype: DataType, shape: &TensorShape) -> Self {
        match shape {
            TensorShape::Static(dims) => Self::zeros(dtype, dims),
            TensorShape::Dynamic(dims) => {
                let dims: Vec<usize> = dims.iter().map(|d| d.unwrap_or(0)).collect();
                let mut tensor = Self::zeros(dtype, &dims);
                tensor.dynamic = true;
                tensor
            }
            TensorShape::Unknown => {
                let mut tensor = Self::zeros(dtype, &[0]);
                tensor.dynamic = true;
                tensor
            }
        }
    }

    /// Set the memory layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Get the memory layout of the tensor.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Get the total number of elements in the tensor.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check if the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }

    /// Size of the data buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Whether the shape of this tensor may change between executions.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Switch this tensor to dynamic-shape mode.
    ///
    /// There is no way back: once consumers were told to re-check the shape,
    /// they keep doing so.
    pub fn set_dynamic(&mut self) {
        self.dynamic = true;
    }

    /// Give the tensor a new shape.
    ///
    /// A no-op if the shape is unchanged. A dynamic tensor gets a fresh
    /// zero-filled buffer of the new size.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the tensor is static and the shape differs.
    pub fn apply_shape(&mut self, shape: &[usize]) -> Result<()> {
        if self.shape == shape {
            return Ok(());
        }
        if !self.dynamic {
            return Err(RuntimeError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: shape.to_vec(),
            });
        }
        let len: usize = shape.iter().product();
        self.shape = shape.to_vec();
        self.data = vec![0; len * self.dtype.size()];
        Ok(())
    }

    /// Raw bytes of the tensor data.
    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw bytes of the tensor data.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Run `f` with read access to the tensor.
    pub fn access<R>(&self, f: impl FnOnce(&Tensor) -> R) -> R {
        f(self)
    }

    /// Get a slice view of the tensor data.
    ///
    /// # Errors
    /// Returns an error if the element type doesn't match or the buffer is
    /// not suitably aligned for `T`.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_dtype(T::DTYPE)?;
        bytemuck::try_cast_slice(&self.data)
            .map_err(|e| RuntimeError::Execution(format!("Cannot view tensor data: {e}")))
    }

    /// Convert tensor data to a Vec.
    ///
    /// # Errors
    /// Returns an error if the element type doesn't match.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype(T::DTYPE)?;
        Ok(self
            .data
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Convert boolean tensor data to a Vec.
    ///
    /// # Errors
    /// Returns an error if the tensor is not `Bool`.
    pub fn to_bools(&self) -> Result<Vec<bool>> {
        self.check_dtype(DataType::Bool)?;
        Ok(self.data.iter().map(|&b| b != 0).collect())
    }

    /// Overwrite this tensor with a copy of `src`.
    ///
    /// # Errors
    /// Returns an error if element types differ, or if the shapes differ and
    /// this tensor is static.
    pub fn write_from(&mut self, src: &Tensor) -> Result<()> {
        self.check_dtype(src.dtype)?;
        self.apply_shape(&src.shape)?;
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    fn check_dtype(&self, expected: DataType) -> Result<()> {
        if self.dtype != expected {
            return Err(RuntimeError::DataTypeMismatch {
                expected,
                actual: self.dtype,
            });
        }
        Ok(())
    }
}

/// The tensors owned by one executor, one per operand of its subgraph.
///
/// Tensors are addressed by the `OperandIndex` they back. Other executors
/// and control-flow kernels only ever hold indices into an arena, never the
/// tensors themselves.
#[derive(Debug, Clone)]
pub struct TensorArena {
    tensors: Vec<Tensor>,
}

impl TensorArena {
    /// Allocate a tensor for every operand of `graph`.
    ///
    /// Operands with a static declared shape get a static tensor, constants
    /// are filled in, and everything else starts out dynamic.
    ///
    /// # Errors
    /// Returns an error if a constant's bytes don't match its declaration.
    pub fn for_subgraph(graph: &Subgraph) -> Result<Self> {
        let tensors = graph
            .operands()
            .iter()
            .map(|operand| {
                let tensor = match (operand.constant(), &operand.shape) {
                    (Some(bytes), TensorShape::Static(dims)) => {
                        Tensor::from_raw(bytes.to_vec(), dims, operand.dtype).map_err(|e| {
                            RuntimeError::Execution(format!(
                                "Constant '{}' is malformed: {e}",
                                operand.name
                            ))
                        })?
                    }
                    _ => Tensor::for_declared(operand.dtype, &operand.shape),
                };
                Ok(tensor.with_layout(operand.layout))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { tensors })
    }

    /// Wrap loose tensors; the `i`-th tensor is addressed as `OperandIndex(i)`.
    pub fn from_tensors(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }

    /// Get a tensor.
    pub fn get(&self, index: OperandIndex) -> Result<&Tensor> {
        self.tensors
            .get(index.index())
            .ok_or_else(|| RuntimeError::TensorNotFound(format!("operand {}", index.index())))
    }

    /// Get a mutable tensor.
    pub fn get_mut(&mut self, index: OperandIndex) -> Result<&mut Tensor> {
        self.tensors
            .get_mut(index.index())
            .ok_or_else(|| RuntimeError::TensorNotFound(format!("operand {}", index.index())))
    }

    /// Borrow the tensor at `src` and the one at `dst` at the same time.
    ///
    /// # Errors
    /// Returns an error if either slot is missing or both are the same slot.
    pub fn split_pair(
        &mut self,
        src: OperandIndex,
        dst: OperandIndex,
    ) -> Result<(&Tensor, &mut Tensor)> {
        self.get(src)?;
        self.get(dst)?;
        let (s, d) = (src.index(), dst.index());
        match s.cmp(&d) {
            std::cmp::Ordering::Less => {
                let (head, tail) = self.tensors.split_at_mut(d);
                Ok((&head[s], &mut tail[0]))
            }
            std::cmp::Ordering::Greater => {
                let (head, tail) = self.tensors.split_at_mut(s);
                Ok((&tail[0], &mut head[d]))
            }
            std::cmp::Ordering::Equal => Err(RuntimeError::Execution(format!(
                "operand {s} cannot be copied onto itself"
            ))),
        }
    }

    /// Number of tensors in the arena.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Check if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

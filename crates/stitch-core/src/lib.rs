#![forbid(unsafe_code)]

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    Str,
}

impl DType {
    /// Fixed element width in bytes, or `None` for the variable-length
    /// string kind. `Bool` is stored one byte per element.
    #[must_use]
    pub const fn size_in_bytes(self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 | Self::Bool => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::F32 | Self::I32 | Self::U32 => Some(4),
            Self::F64 | Self::I64 | Self::U64 => Some(8),
            Self::Str => None,
        }
    }

    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::Str)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::Bool => "bool",
            Self::Str => "str",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisError {
    OutOfRange { axis: i64, rank: usize },
}

impl fmt::Display for AxisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { axis, rank } => {
                write!(f, "axis {axis} out of range for rank {rank}")
            }
        }
    }
}

impl std::error::Error for AxisError {}

/// Resolves a possibly negative axis attribute against a rank: `-1` means
/// the last dimension. The result always satisfies `axis < rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize, AxisError> {
    let rank_i64 = rank as i64;
    let resolved = if axis < 0 { axis + rank_i64 } else { axis };
    if resolved < 0 || resolved >= rank_i64 {
        return Err(AxisError::OutOfRange { axis, rank });
    }
    Ok(resolved as usize)
}

/// Total element count of a shape with overflow detection. The empty shape
/// (a scalar) counts one element.
#[must_use]
pub fn element_count(shape: &[usize]) -> Option<usize> {
    let mut count = 1usize;
    for &dim in shape {
        count = count.checked_mul(dim)?;
    }
    Some(count)
}

/// Number of scalar elements spanned by one step along the dimensions at or
/// after `axis` in row-major storage: the product of `shape[axis..]`.
///
/// At `axis == 0` the pitch covers the whole tensor; at `axis == rank - 1`
/// it equals the trailing dimension.
#[must_use]
pub fn axis_pitch(shape: &[usize], axis: usize) -> Option<usize> {
    let mut pitch = 1usize;
    for &dim in shape.get(axis..)? {
        pitch = pitch.checked_mul(dim)?;
    }
    Some(pitch)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    ElementCountOverflow {
        shape: Vec<usize>,
    },
    StorageLengthMismatch {
        dtype: DType,
        expected: usize,
        actual: usize,
    },
    StorageKindMismatch {
        dtype: DType,
    },
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementCountOverflow { shape } => {
                write!(f, "element count overflow for shape {shape:?}")
            }
            Self::StorageLengthMismatch {
                dtype,
                expected,
                actual,
            } => write!(
                f,
                "storage length mismatch for dtype {dtype}: expected={expected}, actual={actual}"
            ),
            Self::StorageKindMismatch { dtype } => {
                write!(f, "storage kind does not match dtype {dtype}")
            }
        }
    }
}

impl std::error::Error for TensorError {}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TensorData {
    Pod(Vec<u8>),
    Str(Vec<String>),
}

/// An owned, contiguous, row-major tensor. Storage is a raw byte buffer for
/// fixed-width kinds and owned `String` values for the string kind; the
/// constructor ties storage length to the shape's element count, so views
/// handed to kernels never run past their buffers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    data: TensorData,
}

impl Tensor {
    pub fn new(dtype: DType, shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
        let count = element_count(&shape).ok_or(TensorError::ElementCountOverflow {
            shape: shape.clone(),
        })?;
        match (&data, dtype.size_in_bytes()) {
            (TensorData::Pod(bytes), Some(width)) => {
                let expected = count
                    .checked_mul(width)
                    .ok_or(TensorError::ElementCountOverflow {
                        shape: shape.clone(),
                    })?;
                if bytes.len() != expected {
                    return Err(TensorError::StorageLengthMismatch {
                        dtype,
                        expected,
                        actual: bytes.len(),
                    });
                }
            }
            (TensorData::Str(values), None) => {
                if values.len() != count {
                    return Err(TensorError::StorageLengthMismatch {
                        dtype,
                        expected: count,
                        actual: values.len(),
                    });
                }
            }
            _ => return Err(TensorError::StorageKindMismatch { dtype }),
        }
        Ok(Self { shape, dtype, data })
    }

    /// Allocates a tensor of `shape` filled with zero bytes (or empty
    /// strings). Plays the host-allocator role for kernel outputs.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Result<Self, TensorError> {
        let count = element_count(&shape).ok_or(TensorError::ElementCountOverflow {
            shape: shape.clone(),
        })?;
        let data = match dtype.size_in_bytes() {
            Some(width) => {
                let bytes = count
                    .checked_mul(width)
                    .ok_or(TensorError::ElementCountOverflow {
                        shape: shape.clone(),
                    })?;
                TensorData::Pod(vec![0u8; bytes])
            }
            None => TensorData::Str(vec![String::new(); count]),
        };
        Ok(Self { shape, dtype, data })
    }

    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self, TensorError> {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::new(DType::F32, shape, TensorData::Pod(bytes))
    }

    pub fn from_f64(shape: Vec<usize>, values: &[f64]) -> Result<Self, TensorError> {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::new(DType::F64, shape, TensorData::Pod(bytes))
    }

    pub fn from_i32(shape: Vec<usize>, values: &[i32]) -> Result<Self, TensorError> {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::new(DType::I32, shape, TensorData::Pod(bytes))
    }

    pub fn from_i64(shape: Vec<usize>, values: &[i64]) -> Result<Self, TensorError> {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::new(DType::I64, shape, TensorData::Pod(bytes))
    }

    pub fn from_u8(shape: Vec<usize>, values: &[u8]) -> Result<Self, TensorError> {
        Self::new(DType::U8, shape, TensorData::Pod(values.to_vec()))
    }

    pub fn from_bool(shape: Vec<usize>, values: &[bool]) -> Result<Self, TensorError> {
        let bytes = values.iter().map(|&v| u8::from(v)).collect();
        Self::new(DType::Bool, shape, TensorData::Pod(bytes))
    }

    pub fn from_strings(shape: Vec<usize>, values: Vec<String>) -> Result<Self, TensorError> {
        Self::new(DType::Str, shape, TensorData::Str(values))
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Construction guarantees the product cannot overflow.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.shape.iter().copied().product()
    }

    #[must_use]
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    #[must_use]
    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    pub fn strings(&self) -> Result<&[String], TensorError> {
        match &self.data {
            TensorData::Str(values) => Ok(values),
            TensorData::Pod(_) => Err(TensorError::StorageKindMismatch { dtype: self.dtype }),
        }
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        self.pod_chunks(DType::F32)
            .map(|chunks| chunks.map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect())
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>, TensorError> {
        self.pod_chunks(DType::F64).map(|chunks| {
            chunks
                .map(|c| f64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()
        })
    }

    pub fn to_i32_vec(&self) -> Result<Vec<i32>, TensorError> {
        self.pod_chunks(DType::I32)
            .map(|chunks| chunks.map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect())
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>, TensorError> {
        self.pod_chunks(DType::I64).map(|chunks| {
            chunks
                .map(|c| i64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()
        })
    }

    pub fn to_bool_vec(&self) -> Result<Vec<bool>, TensorError> {
        self.pod_chunks(DType::Bool)
            .map(|chunks| chunks.map(|c| c[0] != 0).collect())
    }

    fn pod_chunks(&self, expected: DType) -> Result<std::slice::Chunks<'_, u8>, TensorError> {
        if self.dtype != expected {
            return Err(TensorError::StorageKindMismatch { dtype: self.dtype });
        }
        // expected is always a fixed-width kind here
        let width = expected.size_in_bytes().unwrap_or(1);
        match &self.data {
            TensorData::Pod(bytes) => Ok(bytes.chunks(width)),
            TensorData::Str(_) => Err(TensorError::StorageKindMismatch { dtype: self.dtype }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceError {
    DTypeMismatch { expected: DType, actual: DType },
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DTypeMismatch { expected, actual } => {
                write!(f, "sequence dtype mismatch: expected={expected}, actual={actual}")
            }
        }
    }
}

impl std::error::Error for SequenceError {}

/// Runtime-length, dtype-homogeneous sequence of tensors, as consumed by
/// the sequence-concatenation operator. Homogeneity is enforced on `push`;
/// shape compatibility is the concat kernel's concern, not the container's.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorSeq {
    dtype: DType,
    tensors: Vec<Tensor>,
}

impl TensorSeq {
    #[must_use]
    pub fn new(dtype: DType) -> Self {
        Self {
            dtype,
            tensors: Vec::new(),
        }
    }

    pub fn push(&mut self, tensor: Tensor) -> Result<(), SequenceError> {
        if tensor.dtype() != self.dtype {
            return Err(SequenceError::DTypeMismatch {
                expected: self.dtype,
                actual: tensor.dtype(),
            });
        }
        self.tensors.push(tensor);
        Ok(())
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    #[must_use]
    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        AxisError, DType, SequenceError, Tensor, TensorData, TensorError, TensorSeq, axis_pitch,
        element_count, normalize_axis,
    };

    #[test]
    fn dtype_widths_cover_all_fixed_kinds() {
        assert_eq!(DType::I8.size_in_bytes(), Some(1));
        assert_eq!(DType::U8.size_in_bytes(), Some(1));
        assert_eq!(DType::Bool.size_in_bytes(), Some(1));
        assert_eq!(DType::I16.size_in_bytes(), Some(2));
        assert_eq!(DType::U16.size_in_bytes(), Some(2));
        assert_eq!(DType::F32.size_in_bytes(), Some(4));
        assert_eq!(DType::I32.size_in_bytes(), Some(4));
        assert_eq!(DType::U32.size_in_bytes(), Some(4));
        assert_eq!(DType::F64.size_in_bytes(), Some(8));
        assert_eq!(DType::I64.size_in_bytes(), Some(8));
        assert_eq!(DType::U64.size_in_bytes(), Some(8));
        assert_eq!(DType::Str.size_in_bytes(), None);
        assert!(DType::Str.is_string());
        assert!(!DType::F32.is_string());
    }

    #[test]
    fn normalize_axis_accepts_in_range_values() {
        assert_eq!(normalize_axis(0, 3).expect("axis 0"), 0);
        assert_eq!(normalize_axis(2, 3).expect("axis 2"), 2);
    }

    #[test]
    fn normalize_axis_resolves_negative_values() {
        assert_eq!(normalize_axis(-1, 3).expect("axis -1"), 2);
        assert_eq!(normalize_axis(-3, 3).expect("axis -3"), 0);
    }

    #[test]
    fn normalize_axis_rejects_out_of_range_values() {
        let err = normalize_axis(3, 3).expect_err("axis == rank must fail");
        assert_eq!(err, AxisError::OutOfRange { axis: 3, rank: 3 });

        let err = normalize_axis(-4, 3).expect_err("axis < -rank must fail");
        assert_eq!(err, AxisError::OutOfRange { axis: -4, rank: 3 });
    }

    #[test]
    fn normalize_axis_rejects_everything_at_rank_zero() {
        assert!(normalize_axis(0, 0).is_err());
        assert!(normalize_axis(-1, 0).is_err());
    }

    #[test]
    fn element_count_of_empty_shape_is_one() {
        assert_eq!(element_count(&[]), Some(1));
    }

    #[test]
    fn element_count_detects_overflow() {
        assert_eq!(element_count(&[usize::MAX, 2]), None);
    }

    #[test]
    fn axis_pitch_boundaries() {
        let shape = [2usize, 3, 4];
        assert_eq!(axis_pitch(&shape, 0), Some(24));
        assert_eq!(axis_pitch(&shape, 1), Some(12));
        assert_eq!(axis_pitch(&shape, 2), Some(4));
        assert_eq!(axis_pitch(&shape, 3), Some(1));
        assert_eq!(axis_pitch(&shape, 4), None);
    }

    #[test]
    fn tensor_new_rejects_storage_length_mismatch() {
        let err = Tensor::new(DType::F32, vec![2, 2], TensorData::Pod(vec![0u8; 15]))
            .expect_err("short buffer must fail");
        assert_eq!(
            err,
            TensorError::StorageLengthMismatch {
                dtype: DType::F32,
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn tensor_new_rejects_storage_kind_mismatch() {
        let err = Tensor::new(DType::Str, vec![2], TensorData::Pod(vec![0u8; 2]))
            .expect_err("byte storage for string dtype must fail");
        assert_eq!(err, TensorError::StorageKindMismatch { dtype: DType::Str });

        let err = Tensor::new(
            DType::F32,
            vec![1],
            TensorData::Str(vec![String::from("x")]),
        )
        .expect_err("string storage for pod dtype must fail");
        assert_eq!(err, TensorError::StorageKindMismatch { dtype: DType::F32 });
    }

    #[test]
    fn typed_constructors_round_trip() {
        let t = Tensor::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).expect("f32 tensor");
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.element_count(), 4);
        assert_eq!(t.to_f32_vec().expect("read back"), vec![1.0, 2.0, 3.0, 4.0]);

        let t = Tensor::from_i64(vec![3], &[-1, 0, 7]).expect("i64 tensor");
        assert_eq!(t.to_i64_vec().expect("read back"), vec![-1, 0, 7]);

        let t = Tensor::from_bool(vec![2], &[true, false]).expect("bool tensor");
        assert_eq!(t.to_bool_vec().expect("read back"), vec![true, false]);

        let t = Tensor::from_strings(vec![2], vec!["a".into(), "b".into()]).expect("str tensor");
        assert_eq!(t.strings().expect("strings"), ["a", "b"]);
    }

    #[test]
    fn typed_readback_rejects_wrong_dtype() {
        let t = Tensor::from_f32(vec![1], &[1.0]).expect("f32 tensor");
        let err = t.to_i32_vec().expect_err("i32 readback of f32 must fail");
        assert_eq!(err, TensorError::StorageKindMismatch { dtype: DType::F32 });
    }

    #[test]
    fn zeros_allocates_exact_storage() {
        let t = Tensor::zeros(DType::F64, vec![2, 3]).expect("f64 zeros");
        assert_eq!(t.to_f64_vec().expect("read back"), vec![0.0; 6]);

        let t = Tensor::zeros(DType::Str, vec![2]).expect("string zeros");
        assert_eq!(t.strings().expect("strings"), [String::new(), String::new()]);
    }

    #[test]
    fn zero_sized_tensor_is_valid() {
        let t = Tensor::from_f32(vec![0, 3], &[]).expect("empty tensor");
        assert_eq!(t.element_count(), 0);
        assert_eq!(t.rank(), 2);
    }

    #[test]
    fn sequence_rejects_dtype_mismatch_on_push() {
        let mut seq = TensorSeq::new(DType::F32);
        seq.push(Tensor::from_f32(vec![1], &[1.0]).expect("f32 tensor"))
            .expect("matching dtype");

        let err = seq
            .push(Tensor::from_i32(vec![1], &[1]).expect("i32 tensor"))
            .expect_err("dtype mismatch must fail");
        assert_eq!(
            err,
            SequenceError::DTypeMismatch {
                expected: DType::F32,
                actual: DType::I32
            }
        );
        assert_eq!(seq.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_element_count_matches_product(shape in prop::collection::vec(0usize..=6, 0..=4)) {
            let expected: usize = shape.iter().copied().product();
            prop_assert_eq!(element_count(shape.as_slice()), Some(expected));
        }

        #[test]
        fn prop_axis_pitch_divides_element_count(
            shape in prop::collection::vec(1usize..=6, 1..=4),
        ) {
            let count = element_count(shape.as_slice()).expect("small shapes cannot overflow");
            for axis in 0..shape.len() {
                let pitch = axis_pitch(shape.as_slice(), axis).expect("axis in range");
                prop_assert!(pitch > 0);
                prop_assert_eq!(count % pitch, 0);
            }
            prop_assert_eq!(axis_pitch(shape.as_slice(), 0), Some(count));
            prop_assert_eq!(
                axis_pitch(shape.as_slice(), shape.len() - 1),
                shape.last().copied()
            );
        }

        #[test]
        fn prop_negative_axis_resolves_like_positive(
            rank in 1usize..=6,
            axis in 0usize..6,
        ) {
            prop_assume!(axis < rank);
            let positive = normalize_axis(axis as i64, rank).expect("positive in range");
            let negative = normalize_axis(axis as i64 - rank as i64, rank).expect("negative in range");
            prop_assert_eq!(positive, negative);
            prop_assert_eq!(positive, axis);
        }
    }
}

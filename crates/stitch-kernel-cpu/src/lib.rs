#![forbid(unsafe_code)]

use std::fmt;

use stitch_core::{
    AxisError, DType, Tensor, TensorData, TensorSeq, axis_pitch, element_count, normalize_axis,
};

/// Caller-supplied shapes, axis, or dtypes violate the concatenation
/// contract. Always raised during planning, before any output is allocated,
/// so a failed call has no observable side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    NoInputs,
    ScalarInput,
    AxisOutOfRange {
        axis: i64,
        rank: usize,
    },
    RankMismatch {
        input: usize,
        expected: usize,
        actual: usize,
    },
    DimMismatch {
        input: usize,
        axis: usize,
        expected: usize,
        actual: usize,
    },
    DTypeMismatch {
        input: usize,
        expected: DType,
        actual: DType,
    },
    ElementCountOverflow,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoInputs => f.write_str("must have 1 or more inputs"),
            Self::ScalarInput => f.write_str("cannot concatenate scalars"),
            Self::AxisOutOfRange { axis, rank } => {
                write!(f, "axis {axis} out of range for rank {rank}")
            }
            Self::RankMismatch {
                input,
                expected,
                actual,
            } => write!(
                f,
                "rank mismatch on input {input}: expected={expected}, actual={actual}"
            ),
            Self::DimMismatch {
                input,
                axis,
                expected,
                actual,
            } => write!(
                f,
                "non-concat axis dimensions must match on input {input}: axis {axis} has {actual}, expected {expected}"
            ),
            Self::DTypeMismatch {
                input,
                expected,
                actual,
            } => write!(
                f,
                "dtype mismatch on input {input}: expected={expected}, actual={actual}"
            ),
            Self::ElementCountOverflow => f.write_str("output element count overflows"),
        }
    }
}

impl std::error::Error for PlanError {}

impl From<AxisError> for PlanError {
    fn from(value: AxisError) -> Self {
        match value {
            AxisError::OutOfRange { axis, rank } => Self::AxisOutOfRange { axis, rank },
        }
    }
}

/// The output buffer handed to [`execute`] does not match the plan. This is
/// a contract violation between plan construction and execution, not bad
/// user input: correct callers never observe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    OutputDTypeMismatch {
        expected: DType,
        actual: DType,
    },
    OutputShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    OutputStorageMismatch {
        needed: usize,
        available: usize,
    },
    StorageKindMismatch {
        dtype: DType,
    },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputDTypeMismatch { expected, actual } => {
                write!(f, "output dtype mismatch: expected={expected}, actual={actual}")
            }
            Self::OutputShapeMismatch { expected, actual } => {
                write!(f, "output shape mismatch: expected={expected:?}, actual={actual:?}")
            }
            Self::OutputStorageMismatch { needed, available } => {
                write!(f, "output storage mismatch: needed={needed}, available={available}")
            }
            Self::StorageKindMismatch { dtype } => {
                write!(f, "storage kind does not match dtype {dtype}")
            }
        }
    }
}

impl std::error::Error for ExecError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ConcatError {
    Plan(PlanError),
    Exec(ExecError),
}

impl fmt::Display for ConcatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan(error) => write!(f, "concat planning failed: {error}"),
            Self::Exec(error) => write!(f, "concat execution failed: {error}"),
        }
    }
}

impl std::error::Error for ConcatError {}

impl From<PlanError> for ConcatError {
    fn from(value: PlanError) -> Self {
        Self::Plan(value)
    }
}

impl From<ExecError> for ConcatError {
    fn from(value: ExecError) -> Self {
        Self::Exec(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanInput<'a> {
    tensor: &'a Tensor,
    element_count: usize,
    axis_pitch: usize,
}

impl<'a> PlanInput<'a> {
    #[must_use]
    pub fn tensor(&self) -> &'a Tensor {
        self.tensor
    }

    #[must_use]
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Elements spanned by one step along the dimensions at or after the
    /// concat axis in this input.
    #[must_use]
    pub fn axis_pitch(&self) -> usize {
        self.axis_pitch
    }
}

/// Validated per-call metadata for one concatenation: normalized axis,
/// derived output shape and pitches, and a borrow of every input. Built
/// fresh per invocation; inputs must not be mutated between planning and
/// execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatPlan<'a> {
    axis: usize,
    dtype: DType,
    output_shape: Vec<usize>,
    output_element_count: usize,
    output_axis_pitch: usize,
    inputs: Vec<PlanInput<'a>>,
}

impl<'a> ConcatPlan<'a> {
    #[must_use]
    pub fn axis(&self) -> usize {
        self.axis
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    #[must_use]
    pub fn output_element_count(&self) -> usize {
        self.output_element_count
    }

    #[must_use]
    pub fn output_axis_pitch(&self) -> usize {
        self.output_axis_pitch
    }

    #[must_use]
    pub fn inputs(&self) -> &[PlanInput<'a>] {
        &self.inputs
    }

    /// An empty output is a valid plan: the caller still allocates the
    /// correctly shaped zero-length output and the copy phase is a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.output_element_count == 0
    }
}

/// Validates `inputs` against `requested_axis` and derives the copy plan.
///
/// All inputs must share the first input's rank and dtype; only the size
/// along the concat axis may differ. The axis may be negative, resolving
/// from the last dimension. Fails fast on the first violated rule.
pub fn build_plan<'a>(
    inputs: &[&'a Tensor],
    requested_axis: i64,
) -> Result<ConcatPlan<'a>, PlanError> {
    let Some(first) = inputs.first() else {
        return Err(PlanError::NoInputs);
    };
    let rank = first.rank();
    if rank == 0 {
        return Err(PlanError::ScalarInput);
    }
    let axis = normalize_axis(requested_axis, rank)?;

    for (index, tensor) in inputs.iter().enumerate().skip(1) {
        if tensor.rank() != rank {
            return Err(PlanError::RankMismatch {
                input: index,
                expected: rank,
                actual: tensor.rank(),
            });
        }
        for (dim, (&expected, &actual)) in
            first.shape().iter().zip(tensor.shape().iter()).enumerate()
        {
            if dim != axis && expected != actual {
                return Err(PlanError::DimMismatch {
                    input: index,
                    axis: dim,
                    expected,
                    actual,
                });
            }
        }
        if tensor.dtype() != first.dtype() {
            return Err(PlanError::DTypeMismatch {
                input: index,
                expected: first.dtype(),
                actual: tensor.dtype(),
            });
        }
    }

    let mut concat_axis_size = 0usize;
    for tensor in inputs {
        concat_axis_size = concat_axis_size
            .checked_add(tensor.shape()[axis])
            .ok_or(PlanError::ElementCountOverflow)?;
    }

    let mut output_shape = first.shape().to_vec();
    output_shape[axis] = concat_axis_size;
    let output_element_count =
        element_count(&output_shape).ok_or(PlanError::ElementCountOverflow)?;
    let output_axis_pitch =
        axis_pitch(&output_shape, axis).ok_or(PlanError::ElementCountOverflow)?;

    let mut plan_inputs = Vec::with_capacity(inputs.len());
    for &tensor in inputs {
        // Individually bounded by the output, so these cannot overflow once
        // the output products are known to fit.
        let count = element_count(tensor.shape()).ok_or(PlanError::ElementCountOverflow)?;
        let pitch = axis_pitch(tensor.shape(), axis).ok_or(PlanError::ElementCountOverflow)?;
        plan_inputs.push(PlanInput {
            tensor,
            element_count: count,
            axis_pitch: pitch,
        });
    }

    Ok(ConcatPlan {
        axis,
        dtype: first.dtype(),
        output_shape,
        output_element_count,
        output_axis_pitch,
        inputs: plan_inputs,
    })
}

/// Fills `out` with the concatenated inputs described by `plan`.
///
/// The copy walks each input row by row: one row is `axis_pitch` contiguous
/// elements, the repetition unit across all dimensions before the concat
/// axis. For every `axis_pitch` elements copied, the destination advances by
/// the output's axis pitch; between inputs the base offset advances by the
/// finished input's axis pitch. Fixed-width kinds move as raw byte runs,
/// strings as owned per-element clones.
///
/// `out` must be allocated to exactly the plan's shape and dtype; shape and
/// dtype compatibility of the inputs themselves was settled by
/// [`build_plan`] and is not re-checked.
pub fn execute(plan: &ConcatPlan<'_>, out: &mut Tensor) -> Result<(), ExecError> {
    if out.dtype() != plan.dtype {
        return Err(ExecError::OutputDTypeMismatch {
            expected: plan.dtype,
            actual: out.dtype(),
        });
    }
    if out.shape() != plan.output_shape() {
        return Err(ExecError::OutputShapeMismatch {
            expected: plan.output_shape.clone(),
            actual: out.shape().to_vec(),
        });
    }
    if plan.is_empty() {
        return Ok(());
    }

    match out.data_mut() {
        TensorData::Pod(out_bytes) => {
            let Some(width) = plan.dtype.size_in_bytes() else {
                return Err(ExecError::StorageKindMismatch { dtype: plan.dtype });
            };
            let needed = plan.output_element_count * width;
            if out_bytes.len() != needed {
                return Err(ExecError::OutputStorageMismatch {
                    needed,
                    available: out_bytes.len(),
                });
            }

            let mut output_base = 0usize;
            for entry in &plan.inputs {
                if entry.element_count == 0 {
                    continue;
                }
                let TensorData::Pod(src) = entry.tensor.data() else {
                    return Err(ExecError::StorageKindMismatch { dtype: plan.dtype });
                };
                let row_count = entry.element_count / entry.axis_pitch;
                let run = entry.axis_pitch * width;
                for row in 0..row_count {
                    let src_start = row * run;
                    let dst_start = (row * plan.output_axis_pitch + output_base) * width;
                    out_bytes[dst_start..dst_start + run]
                        .copy_from_slice(&src[src_start..src_start + run]);
                }
                output_base += entry.axis_pitch;
            }
        }
        TensorData::Str(out_values) => {
            if !plan.dtype.is_string() {
                return Err(ExecError::StorageKindMismatch { dtype: plan.dtype });
            }
            if out_values.len() != plan.output_element_count {
                return Err(ExecError::OutputStorageMismatch {
                    needed: plan.output_element_count,
                    available: out_values.len(),
                });
            }

            let mut output_base = 0usize;
            for entry in &plan.inputs {
                if entry.element_count == 0 {
                    continue;
                }
                let TensorData::Str(src) = entry.tensor.data() else {
                    return Err(ExecError::StorageKindMismatch { dtype: plan.dtype });
                };
                let row_count = entry.element_count / entry.axis_pitch;
                for row in 0..row_count {
                    let src_start = row * entry.axis_pitch;
                    let dst_start = row * plan.output_axis_pitch + output_base;
                    // Owned values: raw byte moves would alias the source
                    // allocations instead of duplicating them.
                    out_values[dst_start..dst_start + entry.axis_pitch]
                        .clone_from_slice(&src[src_start..src_start + entry.axis_pitch]);
                }
                output_base += entry.axis_pitch;
            }
        }
    }

    Ok(())
}

/// The fixed-argument concatenation operator: plans, allocates the output,
/// and executes in one call.
pub fn concat(inputs: &[&Tensor], axis: i64) -> Result<Tensor, ConcatError> {
    let plan = build_plan(inputs, axis)?;
    let mut out = Tensor::zeros(plan.dtype(), plan.output_shape().to_vec())
        .map_err(|_| PlanError::ElementCountOverflow)?;
    execute(&plan, &mut out)?;
    Ok(out)
}

/// The sequence-concatenation operator: unpacks the runtime-length sequence
/// into the same ordered list form and delegates to the shared core, so
/// both operators keep identical semantics.
pub fn concat_from_sequence(seq: &TensorSeq, axis: i64) -> Result<Tensor, ConcatError> {
    let inputs: Vec<&Tensor> = seq.tensors().iter().collect();
    concat(&inputs, axis)
}

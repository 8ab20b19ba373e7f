//! Combinators that thread a tensor through a list of widgets.
//!
//! A widget is one transformation stage: a closure, a framework layer, a closure
//! with extra arguments, or a placeholder that is skipped. [`setup`] applies
//! widgets left to right. [`setup_sequence`] does the same for every step of a
//! sequence, optionally feeding the processed steps through a [`RecurrentCell`].

use std::fmt;

use anyhow::{Result, anyhow, ensure};
use candle_core::Tensor;
use candle_nn::Module;
use sprig_tensor::fdtype;
use tracing::{instrument, trace};

/// Sequence axis swapped with the batch axis by default.
pub const DEFAULT_SEQ_AXIS: usize = 1;

pub type WidgetFn<'a> = Box<dyn Fn(&Tensor) -> Result<Tensor> + 'a>;
pub type WidgetArgsFn<'a> = Box<dyn Fn(&Tensor, &[WidgetArg]) -> Result<Tensor> + 'a>;

/// Extra argument handed to a [`Widget::ApplyWith`] closure after the running value.
#[derive(Clone, Debug)]
pub enum WidgetArg {
    Float(f64),
    Int(i64),
    Usize(usize),
    Tensor(Tensor),
}

impl From<f64> for WidgetArg {
    fn from(value: f64) -> Self {
        WidgetArg::Float(value)
    }
}

impl From<i64> for WidgetArg {
    fn from(value: i64) -> Self {
        WidgetArg::Int(value)
    }
}

impl From<usize> for WidgetArg {
    fn from(value: usize) -> Self {
        WidgetArg::Usize(value)
    }
}

impl From<Tensor> for WidgetArg {
    fn from(value: Tensor) -> Self {
        WidgetArg::Tensor(value)
    }
}

impl From<&Tensor> for WidgetArg {
    fn from(value: &Tensor) -> Self {
        WidgetArg::Tensor(value.clone())
    }
}

impl WidgetArg {
    /// Numeric arguments widen to f64.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            WidgetArg::Float(v) => Ok(*v),
            WidgetArg::Int(v) => Ok(*v as f64),
            WidgetArg::Usize(v) => Ok(*v as f64),
            WidgetArg::Tensor(t) => Err(anyhow!(
                "widget argument: expected a number, got a tensor of shape {:?}",
                t.shape()
            )),
        }
    }

    pub fn as_usize(&self) -> Result<usize> {
        match self {
            WidgetArg::Usize(v) => Ok(*v),
            WidgetArg::Int(v) if *v >= 0 => Ok(*v as usize),
            other => Err(anyhow!(
                "widget argument: expected a non-negative integer, got {:?}",
                other
            )),
        }
    }

    pub fn as_tensor(&self) -> Result<&Tensor> {
        match self {
            WidgetArg::Tensor(t) => Ok(t),
            other => Err(anyhow!("widget argument: expected a tensor, got {:?}", other)),
        }
    }
}

/// One stage of a [`setup`] pipeline.
pub enum Widget<'a> {
    /// `y = f(y)`
    Apply(WidgetFn<'a>),
    /// `y = module.forward(y)`
    Module(&'a dyn Module),
    /// `y = f(y, args)`
    ApplyWith(WidgetArgsFn<'a>, Vec<WidgetArg>),
    /// Placeholder, leaves the running value alone.
    Skip,
}

impl<'a> Widget<'a> {
    pub fn apply<F>(f: F) -> Self
    where
        F: Fn(&Tensor) -> Result<Tensor> + 'a,
    {
        Widget::Apply(Box::new(f))
    }

    pub fn module<M: Module>(module: &'a M) -> Self {
        Widget::Module(module)
    }

    pub fn with_args<F, I, A>(f: F, args: I) -> Self
    where
        F: Fn(&Tensor, &[WidgetArg]) -> Result<Tensor> + 'a,
        I: IntoIterator<Item = A>,
        A: Into<WidgetArg>,
    {
        Widget::ApplyWith(Box::new(f), args.into_iter().map(Into::into).collect())
    }

    /// Runs this widget on `x`. `Skip` returns `x` unchanged.
    pub fn call(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Widget::Apply(f) => f(x),
            Widget::Module(m) => Ok(m.forward(x)?),
            Widget::ApplyWith(f, args) => f(x, args),
            Widget::Skip => Ok(x.clone()),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Widget::Skip)
    }
}

impl fmt::Debug for Widget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Widget::Apply(_) => f.write_str("Widget::Apply(..)"),
            Widget::Module(_) => f.write_str("Widget::Module(..)"),
            Widget::ApplyWith(_, args) => f.debug_tuple("Widget::ApplyWith").field(args).finish(),
            Widget::Skip => f.write_str("Widget::Skip"),
        }
    }
}

impl Default for Widget<'_> {
    fn default() -> Self {
        Widget::Skip
    }
}

// Lets a lone widget be passed wherever a widget list is expected.
impl<'a> AsRef<[Widget<'a>]> for Widget<'a> {
    fn as_ref(&self) -> &[Widget<'a>] {
        std::slice::from_ref(self)
    }
}

/// Applies `widgets` to `x` in order, each output feeding the next widget.
///
/// Widget errors are returned as-is.
#[instrument(level = "trace", fields(shape = ?x.shape()), skip_all)]
pub fn setup<'a, W>(x: &Tensor, widgets: &W) -> Result<Tensor>
where
    W: AsRef<[Widget<'a>]> + ?Sized,
{
    let mut y = x.clone();
    for (i, widget) in widgets.as_ref().iter().enumerate() {
        if widget.is_skip() {
            continue;
        }
        y = widget.call(&y)?;
        trace!(widget = i, shape = ?y.shape(), "applied widget");
    }
    Ok(y)
}

/// Exchanges the batch axis (0) and `seq_axis`, leaving the other axes in place.
///
/// Applying it twice with the same axis gives back the original layout.
pub fn transpose_sequence(seq: &Tensor, seq_axis: usize) -> Result<Tensor> {
    Ok(seq.transpose(0, seq_axis)?)
}

/// Collapses every axis after the first: `(b, ...) -> (b, rest)`.
pub fn flatten(x: &Tensor) -> Result<Tensor> {
    let batch_size = x.dim(0)?;
    let rest = if batch_size == 0 {
        0
    } else {
        x.elem_count() / batch_size
    };
    Ok(x.reshape((batch_size, rest))?)
}

/// A recurrent transition used by [`setup_sequence`].
pub trait RecurrentCell {
    /// Width of the state, used to build the default zero state `(batch, state_size)`.
    fn state_size(&self) -> usize;

    /// Consumes one processed step and the previous state, returns the new state.
    fn step(&self, input: &Tensor, state: &Tensor) -> Result<Tensor>;
}

#[derive(Clone, Debug)]
pub struct SequenceOptions {
    /// Swap `seq_axis` to the front before processing.
    pub transpose_in: bool,
    /// Swap the leading axis back to `seq_axis` after processing.
    pub transpose_out: bool,
    pub seq_axis: usize,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            transpose_in: false,
            transpose_out: false,
            seq_axis: DEFAULT_SEQ_AXIS,
        }
    }
}

impl SequenceOptions {
    /// Batch-major in and out: `(batch, seq, ...)`.
    pub fn batch_major() -> Self {
        Self {
            transpose_in: true,
            transpose_out: true,
            ..Self::default()
        }
    }
}

/// Runs [`setup`] over every step of `seq` (leading axis after the optional transpose).
///
/// - Without a cell each step is processed on its own.
/// - With a cell the steps are scanned left to right:
///   `state = cell.step(setup(seq[t]), state)`, and each new state is that step's
///   output. The initial state defaults to zeros `(seq.dim(1), cell.state_size())`.
///
/// Outputs are stacked along axis 0. An empty sequence scanned with a cell gives
/// an empty `(0, ..state dims)` result; without a cell the step shape is unknown
/// and an empty sequence is an error.
#[instrument(
    level = "debug",
    fields(shape = ?seq.shape(), recurrent = cell.is_some(), transpose_in = options.transpose_in, transpose_out = options.transpose_out),
    skip_all
)]
pub fn setup_sequence<'a, W>(
    seq: &Tensor,
    widgets: &W,
    options: &SequenceOptions,
    cell: Option<&dyn RecurrentCell>,
    init_state: Option<Tensor>,
) -> Result<Tensor>
where
    W: AsRef<[Widget<'a>]> + ?Sized,
{
    let seq = if options.transpose_in {
        transpose_sequence(seq, options.seq_axis)?
    } else {
        seq.clone()
    };
    let seq_len = seq.dim(0)?;

    let y = match cell {
        None => {
            ensure!(
                seq_len > 0,
                "setup_sequence: sequence must have at least one step, got shape {:?}",
                seq.shape()
            );
            let outputs = (0..seq_len)
                .map(|t| -> Result<Tensor> { setup(&seq.get(t)?, widgets) })
                .collect::<Result<Vec<_>>>()?;
            Tensor::stack(&outputs, 0)?
        }
        Some(cell) => {
            let mut state = match init_state {
                Some(state) => state,
                None => Tensor::zeros((seq.dim(1)?, cell.state_size()), fdtype(), seq.device())?,
            };
            if seq_len == 0 {
                // Nothing to scan: (0, ..state dims)
                let mut dims = vec![0];
                dims.extend_from_slice(state.dims());
                Tensor::zeros(dims, state.dtype(), state.device())?
            } else {
                let mut outputs = Vec::with_capacity(seq_len);
                for t in 0..seq_len {
                    let input = setup(&seq.get(t)?, widgets)?;
                    state = cell.step(&input, &state)?;
                    trace!(step = t, state_shape = ?state.shape(), "recurrent step");
                    outputs.push(state.clone());
                }
                Tensor::stack(&outputs, 0)?
            }
        }
    };

    if options.transpose_out {
        transpose_sequence(&y, options.seq_axis)
    } else {
        Ok(y)
    }
}

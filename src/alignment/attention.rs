use candle_core::{DType, Device, Tensor, D};

use crate::error::AlignmentError;

#[derive(Debug, Clone, Copy)]
pub struct CostMatrixParams {
    pub medfilt_width: usize,
    pub qk_scale: f64,
    pub top_layers: Option<usize>,
}

/// Turn stacked cross-attention `(layers, heads, tokens, frames)` into a
/// `tokens × frames` DTW cost matrix restricted to `frame_start..frame_end`.
///
/// The window is moved to the CPU and normalized in `f64` whatever the
/// decoder's device and dtype. Weights are median-filtered along frames, softmaxed along frames,
/// normalized along tokens, averaged over (the top) layers and heads, and
/// negated so that strong attention means low cost.
pub fn attention_cost_matrix(
    weights: &Tensor,
    frame_start: usize,
    frame_end: usize,
    params: CostMatrixParams,
) -> Result<Vec<Vec<f64>>, AlignmentError> {
    cost_matrix(weights, frame_start, frame_end, params)
        .map_err(|e| AlignmentError::runtime("attention cost matrix", e))
}

fn cost_matrix(
    weights: &Tensor,
    frame_start: usize,
    frame_end: usize,
    params: CostMatrixParams,
) -> candle_core::Result<Vec<Vec<f64>>> {
    let (layers, _heads, _tokens, _frames) = weights.dims4()?;
    let w = weights
        .narrow(D::Minus1, frame_start, frame_end - frame_start)?
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .contiguous()?;

    let w = median_filter_last_dim(&w, params.medfilt_width)?;
    let w = candle_nn::ops::softmax(&(w * params.qk_scale)?, D::Minus1)?;
    let norm = w.sqr()?.sum_keepdim(D::Minus2)?.sqrt()?;
    let w = w.broadcast_div(&norm)?;

    let w = match params.top_layers {
        Some(top) if top < layers => w.narrow(0, layers - top, top)?,
        _ => w,
    };
    w.mean(0)?.mean(0)?.neg()?.to_vec2::<f64>()
}

/// 1-D median filter along the last axis with zero padding at both edges.
pub(crate) fn median_filter_last_dim(x: &Tensor, width: usize) -> candle_core::Result<Tensor> {
    if width <= 1 {
        return Ok(x.clone());
    }
    let frames = x.dim(D::Minus1)?;
    let values = x.flatten_all()?.to_vec1::<f64>()?;
    let mut out = Vec::with_capacity(values.len());
    for row in values.chunks(frames) {
        out.extend(median_filter_row(row, width));
    }
    Tensor::from_vec(out, x.shape(), x.device())
}

fn median_filter_row(row: &[f64], width: usize) -> Vec<f64> {
    let half = width / 2;
    let mut window = Vec::with_capacity(width);
    (0..row.len())
        .map(|center| {
            window.clear();
            for offset in 0..width {
                let idx = (center + offset).checked_sub(half);
                window.push(idx.and_then(|i| row.get(i)).copied().unwrap_or(0.0));
            }
            window.sort_by(f64::total_cmp);
            window[half]
        })
        .collect()
}

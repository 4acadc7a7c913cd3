//! Manual sample-rate conversion for the two transport adapters.
//!
//! Specific, simple algorithms per direction rather than a general FFT
//! resampler: linear interpolation for upsampling, stride
//! decimation for downsampling. This keeps conversion latency flat and
//! matches `examples/original_source/scheduling/channels/*.py` exactly.

/// Upsample by an integer factor using linear interpolation between
/// consecutive input samples. The final input sample is repeated to fill
/// the last segment, so output length is exactly `input.len() * factor`.
pub fn upsample_linear(input: &[i16], factor: usize) -> Vec<i16> {
    assert!(factor >= 1);
    if input.is_empty() {
        return Vec::new();
    }
    let mut output = Vec::with_capacity(input.len() * factor);
    for window in input.windows(2) {
        let (a, b) = (window[0] as f32, window[1] as f32);
        for step in 0..factor {
            let t = step as f32 / factor as f32;
            output.push((a + (b - a) * t).round() as i16);
        }
    }
    // Last input sample has no successor to interpolate towards; repeat it.
    let last = *input.last().unwrap();
    for _ in 0..factor {
        output.push(last);
    }
    output
}

/// Downsample by an integer factor by taking every `factor`-th sample.
pub fn downsample_stride(input: &[i16], factor: usize) -> Vec<i16> {
    assert!(factor >= 1);
    input.iter().step_by(factor).copied().collect()
}

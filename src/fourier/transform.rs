use ndarray::{Array3, Axis, Zip};
use num_complex::Complex64;
use rustfft::{FftDirection, FftPlanner};

/// In-place 3D DFT over all three axes.
///
/// Each axis is handled as a batch of independent 1D transforms along its
/// lanes, run in parallel. The forward transform is unnormalised.
pub fn fft_3d(field: &mut Array3<Complex64>) {
    transform_axes(field, FftDirection::Forward);
}

/// In-place inverse 3D DFT, normalised by `1 / (nx·ny·nz)` so that
/// `ifft_3d(fft_3d(x)) == x`.
pub fn ifft_3d(field: &mut Array3<Complex64>) {
    transform_axes(field, FftDirection::Inverse);
    let norm = 1.0 / field.len().max(1) as f64;
    field.par_mapv_inplace(|v| v * norm);
}

fn transform_axes(field: &mut Array3<Complex64>, direction: FftDirection) {
    let mut planner = FftPlanner::<f64>::new();
    for axis in 0..3 {
        let n = field.len_of(Axis(axis));
        if n <= 1 {
            continue;
        }
        let fft = planner.plan_fft(n, direction);
        Zip::from(field.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
            let mut buf: Vec<Complex64> = lane.iter().copied().collect();
            fft.process(&mut buf);
            for (dst, src) in lane.iter_mut().zip(buf) {
                *dst = src;
            }
        });
    }
}

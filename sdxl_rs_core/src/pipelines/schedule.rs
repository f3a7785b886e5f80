/// Number of timesteps the SDXL models were trained with.
pub const TRAIN_TIMESTEPS: usize = 1000;

/// Split a descending schedule at `high_noise_frac` of the denoising trajectory.
///
/// The first half runs every timestep at or above the cutoff
/// `round(train_timesteps * (1 - high_noise_frac))`, the second half everything below it, so the
/// two halves always cover the schedule exactly once. A fraction of `1.0` hands the refiner an
/// empty slice, `0.0` hands the base stage an empty slice.
pub fn split_timesteps(
    timesteps: &[usize],
    train_timesteps: usize,
    high_noise_frac: f64,
) -> (&[usize], &[usize]) {
    let train = train_timesteps as f64;
    let cutoff = (train - high_noise_frac * train).round().max(0.) as usize;
    let at = timesteps.partition_point(|&t| t >= cutoff);
    timesteps.split_at(at)
}

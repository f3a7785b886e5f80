use indicatif::{ProgressBar, ProgressBarIter, ProgressDrawTarget, ProgressStyle};

/// Wraps an exact-size iterator in a styled progress bar.
///
/// `COLOR` picks the bar color: `'g'` green, `'b'` blue, `'r'` red, anything else white.
/// The third field hides the bar entirely.
pub struct NiceProgressBar<T: ExactSizeIterator, const COLOR: char>(pub T, pub &'static str, pub bool);

impl<T: ExactSizeIterator, const COLOR: char> IntoIterator for NiceProgressBar<T, COLOR> {
    type IntoIter = ProgressBarIter<T>;
    type Item = T::Item;

    fn into_iter(self) -> Self::IntoIter {
        let color = match COLOR {
            'g' => "green",
            'b' => "blue",
            'r' => "red",
            _ => "white",
        };
        let bar = ProgressBar::new(self.0.len() as u64);
        if self.2 {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_style(
            ProgressStyle::with_template(&format!(
                "{{msg}} [{{elapsed_precise}}] [{{bar:40.{color}/{color}}}] {{pos}}/{{len}} ({{eta}})"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        bar.set_message(self.1);
        bar.wrap_iter(self.0)
    }
}

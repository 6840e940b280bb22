// Stacking command file
// Fixed-format parameter file read by the adaptive-stacking executable

use crate::pipeline::config::StackingParams;

impl StackingParams {
    /// Render the command file for a container named `input_name`.
    ///
    /// Line order: iterations, stacking index, power, error bounds, window
    /// start and length, input file name, then the diff bounds on two lines
    /// with no trailing newline.
    pub fn to_command_file(&self, input_name: &str) -> String {
        format!(
            "{}\n{:.1}\n{:.4}\n{:.1}\t{:.1}\n{:.1}\t{:.1}\n{}\n{:.1}\n{:.1}",
            self.iterations,
            self.stack_index,
            self.power,
            self.min_error,
            self.max_error,
            self.window_start,
            self.window_length,
            input_name,
            self.min_diff,
            self.max_diff,
        )
    }
}

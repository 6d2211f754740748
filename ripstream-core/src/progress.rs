use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{msg} {wide_bar} {pos}/{len} {prefix} [{elapsed_precise}]";
const SPINNER_TEMPLATE: &str = "{spinner} {msg} {pos} {prefix} [{elapsed_precise}]";

/// Bar for a known number of items, spinner with a counter otherwise.
pub(crate) fn counter(visible: bool, total: Option<u64>, message: &str, unit: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template(BAR_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template(SPINNER_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    };
    bar.set_message(message.to_string());
    bar.set_prefix(unit.to_string());
    bar
}

// src/utils/progress.rs

//! Progress indicators for long-running fetch loops.

use indicatif::{ProgressBar, ProgressStyle};

const ITEM_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})";

/// Create a per-item progress bar, or a hidden one when `visible` is false.
pub fn item_bar(total: u64, message: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let style = ProgressStyle::default_bar()
        .template(ITEM_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");

    let pb = ProgressBar::new(total);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_bar_length() {
        let pb = item_bar(42, "Downloading", true);
        assert_eq!(pb.length(), Some(42));
        pb.finish_and_clear();
    }

    #[test]
    fn test_hidden_bar_still_counts() {
        let pb = item_bar(3, "quiet", false);
        pb.inc(2);
        assert_eq!(pb.position(), 2);
    }
}

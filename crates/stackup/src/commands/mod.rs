pub mod down;
pub mod status;
pub mod up;
pub mod validate;

use colored::Colorize;
use stackup_cloud::ResourceKind;

/// Fixed-width resource label for tabular output
pub(crate) fn kind_label(kind: ResourceKind) -> String {
    format!("{:<15}", kind.as_str())
}

pub(crate) fn heading(text: &str) {
    println!();
    println!("{}", text.bold());
}

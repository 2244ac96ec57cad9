// Terminal output helpers

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn print_success(message: &str) {
    println!("{}", format!("✅ {message}").bright_green().bold());
}

pub fn print_error(message: &str) {
    eprintln!("{}", format!("❌ {message}").bright_red().bold());
}

pub fn print_warning(message: &str) {
    println!("{}", format!("⚠️  {message}").bright_yellow());
}

/// Spinner shown while connecting, analyzing and planning.
pub fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .expect("static template is valid"),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

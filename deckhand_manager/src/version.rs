//! Version information.

use colored::*;

pub fn print_version_info() {
    println!(
        "{} {}",
        "deckhand".cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("Local engine + dashboard cluster launcher");
}

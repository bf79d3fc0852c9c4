use std::path::Path;

use colored::*;
use terminal_size::{terminal_size, Height, Width};

fn rule() -> String {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat(width.0 as usize)
}

pub fn print_gateway_banner(addr: &str, model: &str, workspace: &Path) {
    let line = rule();
    println!("{}", line.black().bold());

    let name = "Emergent Mind".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    println!("{}", format!("  ws://{}/ws  •  {}", addr, model).cyan());
    println!("  {}", format!("http://{}/", addr).cyan());
    println!("  {}", workspace.to_string_lossy().black().bold());

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "❌".red().bold(), msg.red());
}

/// Suggest starting the gateway after a refused connection.
pub fn print_gateway_hint(url: &str) {
    print_warning(&format!("No gateway is listening on {}", url));
    eprintln!("  Start one with {}", "emergent-mind gateway".bold());
    eprintln!("  or run without it using {}", "--no-gateway".bold());
}

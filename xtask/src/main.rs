//! RepDev xtask - Build automation tasks
//!
//! ## Usage
//!
//! ```bash
//! # Run all tests
//! cargo xtask test
//!
//! # Run lints
//! cargo xtask lint
//!
//! # Format code
//! cargo xtask fmt
//!
//! # Validate and dry-run the demo template
//! cargo xtask smoke
//!
//! # Everything CI runs
//! cargo xtask ci
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{cmd, Shell};

const DEMO_TEMPLATE: &str = "demos/repdev.yml";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for RepDev")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the repdev binary
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run tests
    Test {
        /// Run tests in release mode
        #[arg(long)]
        release: bool,
        /// Only run tests matching this filter
        filter: Option<String>,
    },
    /// Run clippy and the format check
    Lint,
    /// Format code
    Fmt {
        /// Check formatting without modifying files
        #[arg(long)]
        check: bool,
    },
    /// Validate the demo template and preview `up` without a runtime
    Smoke,
    /// Generate documentation
    Doc {
        /// Open in browser
        #[arg(long)]
        open: bool,
    },
    /// Install repdev locally
    Install,
    /// Clean build artifacts
    Clean,
    /// Run all CI checks
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to project root
    let project_root = project_root()?;
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build { release } => build(&sh, release)?,
        Commands::Test { release, filter } => test(&sh, release, filter.as_deref())?,
        Commands::Lint => lint(&sh)?,
        Commands::Fmt { check } => fmt(&sh, check)?,
        Commands::Smoke => smoke(&sh)?,
        Commands::Doc { open } => doc(&sh, open)?,
        Commands::Install => install(&sh)?,
        Commands::Clean => clean(&sh)?,
        Commands::Ci => ci(&sh)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)?;
    let manifest = PathBuf::from(path.trim());

    manifest
        .parent()
        .map(|p| p.to_path_buf())
        .context("Failed to find project root")
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    println!("🔨 Building repdev...");

    if release {
        cmd!(sh, "cargo build --release --bin repdev").run()?;
    } else {
        cmd!(sh, "cargo build --bin repdev").run()?;
    }

    println!("✅ Build complete!");
    Ok(())
}

fn test(sh: &Shell, release: bool, filter: Option<&str>) -> Result<()> {
    println!("🧪 Running tests...");

    let release_flag = release.then_some("--release");
    cmd!(sh, "cargo test --package repdev {release_flag...} {filter...}").run()?;

    println!("✅ Tests passed!");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 Running lints...");

    println!("  Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;

    println!("  Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;

    println!("✅ Lints passed!");
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    println!("📝 Formatting code...");

    if check {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    } else {
        cmd!(sh, "cargo fmt --all").run()?;
    }

    println!("✅ Formatting complete!");
    Ok(())
}

fn smoke(sh: &Shell) -> Result<()> {
    println!("💨 Smoke testing the demo template...");

    cmd!(sh, "cargo run --quiet --bin repdev -- --template {DEMO_TEMPLATE} validate").run()?;
    cmd!(sh, "cargo run --quiet --bin repdev -- --template {DEMO_TEMPLATE} up --dry-run").run()?;

    println!("✅ Smoke test passed!");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("📚 Generating documentation...");

    if open {
        cmd!(sh, "cargo doc --no-deps --open").run()?;
    } else {
        cmd!(sh, "cargo doc --no-deps").run()?;
    }

    println!("✅ Documentation generated!");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📥 Installing repdev locally...");

    cmd!(sh, "cargo install --path .").run()?;

    println!("✅ Installation complete!");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 Cleaning build artifacts...");

    cmd!(sh, "cargo clean").run()?;

    println!("✅ Clean complete!");
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    println!("🔄 Running CI checks...");

    println!("\n📋 Step 1/4: Lint");
    lint(sh)?;

    println!("\n📋 Step 2/4: Tests");
    test(sh, false, None)?;

    println!("\n📋 Step 3/4: Smoke");
    smoke(sh)?;

    println!("\n📋 Step 4/4: Release build");
    build(sh, true)?;

    println!("\n✅ All CI checks passed!");
    Ok(())
}

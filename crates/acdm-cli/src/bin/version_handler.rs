use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use acdm_cli::releases::{GithubReleases, DEFAULT_API_URL};
use acdm_cli::version::{branch_name, read_cmake_version, DEV_BRANCH};
use acdm_cli::{determine_dev_release, VersionOutput};
use anyhow::{Context, Result};
use clap::Parser;

/// Derive the build version and append it to the CI environment file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Repository to look up releases in (owner/name)
    #[arg(long, env = "REPOSITORY")]
    repository: String,

    /// Git ref that triggered the build
    #[arg(long = "ref", env = "REF")]
    git_ref: String,

    /// File receiving the VERSION and DEV_RELEASE lines
    #[arg(long, env = "GITHUB_ENV")]
    env_file: PathBuf,

    /// CMake file declaring the project version
    #[arg(long, default_value = "CMakeLists.txt")]
    cmake_file: PathBuf,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Token for authenticated release listing
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let branch = branch_name(&args.git_ref)?;
    println!("Determined branch name: {}", branch);

    let version = read_cmake_version(&args.cmake_file)?;
    println!("Found version number in {}: {}", args.cmake_file.display(), version);

    let output = if branch == DEV_BRANCH {
        let releases = GithubReleases::new(args.api_url, args.token);
        let last = determine_dev_release(&version, || releases.list(&args.repository)).await?;
        println!("Determined dev release version as {}", last);
        VersionOutput::development(&version, last)
    } else {
        VersionOutput::release(version)
    };

    let mut env_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.env_file)
        .with_context(|| format!("Failed to open {}", args.env_file.display()))?;
    env_file
        .write_all(output.env_lines().as_bytes())
        .with_context(|| format!("Failed to write {}", args.env_file.display()))?;

    println!("VERSION={}", output.version);
    Ok(())
}

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "stowzip")]
#[command(version)]
#[command(about = "Package files into a store-only ZIP archive and read them back", long_about = None)]
#[command(after_help = "Examples:\n  \
  stowzip create scene.zip export/          archive a directory tree\n  \
  stowzip extract scene.zip -x '*.tmp'      extract all files except *.tmp\n  \
  stowzip extract -p scene.zip notes.txt    send one entry to stdout\n  \
  stowzip list -v https://example.com/scene.zip   list a remote archive")]
pub struct Cli {
    /// Show debug logs (RUST_LOG overrides)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an archive from files and directories
    Create(CreateArgs),
    /// List archive contents
    List(ListArgs),
    /// Extract entries from an archive
    Extract(ExtractArgs),
    /// Verify the CRC32 of every entry
    Test(TestArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Archive to write
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Files and directories to add, in order
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<String>,

    /// Archive comment
    #[arg(short = 'c', long, value_name = "TEXT")]
    pub comment: Option<String>,

    /// Quiet mode
    #[arg(short = 'q')]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// List verbosely with sizes, dates and CRCs
    #[arg(short = 'v')]
    pub long_format: bool,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode
    #[arg(short = 'q')]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Quiet mode: only report failures
    #[arg(short = 'q')]
    pub quiet: bool,
}

pub fn is_http_url(file: &str) -> bool {
    file.starts_with("http://") || file.starts_with("https://")
}

impl ExtractArgs {
    pub fn is_quiet(&self) -> bool {
        self.quiet || self.pipe
    }
}

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Pivot(PivotArgs),
    Render(RenderArgs),
    Toc(TocArgs),
    Print(PrintArgs),
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Debug, Args)]
pub struct PivotArgs {
    /// Input TSV file with a header row.
    #[arg(long)]
    pub tsv: String,

    /// Output JSON path (default: stdout).
    #[arg(long)]
    pub out: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ResourceArgs {
    /// Directory holding `catalog.yaml` and one directory or zip per repository.
    #[arg(long)]
    pub resources: String,

    /// Catalog entry: `owner/repo`, `repo`, or `language/abbreviation`.
    #[arg(long)]
    pub resource: String,

    /// Book id (required for Bibles, notes and questions).
    #[arg(long)]
    pub book: Option<String>,

    /// Optional YAML config file.
    #[arg(long)]
    pub config: Option<String>,

    /// Skip the HTML cache even when one is configured.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    #[command(flatten)]
    pub resource: ResourceArgs,

    /// Output directory for `sections.json` and `index.html`.
    #[arg(long)]
    pub out: String,
}

#[derive(Debug, Args)]
pub struct TocArgs {
    /// HTML body fragment.
    #[arg(long)]
    pub html: String,

    /// Output path (default: stdout).
    #[arg(long)]
    pub out: Option<String>,
}

#[derive(Debug, Args)]
pub struct PrintArgs {
    #[command(flatten)]
    pub resource: ResourceArgs,

    /// Output path for the print-ready HTML document.
    #[arg(long)]
    pub out: String,

    /// Named page size (a4, a5, letter, trade, crown-quarto, a4-landscape, letter-landscape).
    #[arg(long, default_value = "a4")]
    pub page_size: String,

    /// Columns for Bible text.
    #[arg(long, default_value_t = 1)]
    pub columns: u32,

    /// Top-level section ids to keep (repeatable; default: all).
    #[arg(long = "include")]
    pub included_names: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub hide_cover: bool,

    #[arg(long, default_value_t = false)]
    pub hide_copyright: bool,

    #[arg(long, default_value_t = false)]
    pub hide_toc: bool,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    Get(CacheGetArgs),
}

#[derive(Debug, Args)]
pub struct CacheGetArgs {
    /// Cache directory (default: `cache.dir` from the config).
    #[arg(long)]
    pub dir: Option<String>,

    /// Optional YAML config file; its `cache.verification_key` guards reads.
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub owner: String,

    #[arg(long)]
    pub repo: String,

    /// Branch or tag.
    #[arg(long = "ref", default_value = "master")]
    pub git_ref: String,

    #[arg(long)]
    pub book: Option<String>,

    /// Verification key presented to the cache.
    #[arg(long)]
    pub key: Option<String>,

    /// Output JSON path (default: stdout).
    #[arg(long)]
    pub out: Option<String>,
}

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sinyfy",
    about = "Clone a single web page into a static, offline-renderable copy",
    version,
    long_about = "Fetches one page, merges its inline and linked CSS into a single stylesheet, downloads every referenced image (substituting a placeholder graphic when one cannot be retrieved), strips scripts and event handlers, and writes the result plus a resource manifest to an output directory."
)]
pub struct CloneCommand {
    /// The URL of the page to clone
    #[arg(required = true)]
    pub url: String,

    /// Output directory for the cloned page
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Skip image localization entirely (image references are left untouched)
    #[arg(long)]
    pub no_images: bool,

    /// Print the full failure trace when the run aborts
    #[arg(long)]
    pub debug: bool,
}

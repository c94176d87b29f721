//! Quick commandline utility to load a directory of nifti files.
//!
//! Every image in the input directory is classified by its pixel type.
//! Intensity volumes are copied into the output directory as they are, while
//! all 8-bit label images are merged into a single `Structures.seg.nrrd`
//! segmentation with one named segment per label file.

use clap::Parser;
use std::path::PathBuf;

use loadnii::{DirectoryImport, ExportScene, ImportOptions};

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the directory containing the images to load
    input_dir: PathBuf,

    /// the directory where loaded volumes and the merged segmentation are stored
    #[arg(short, long, default_value = "./loaded")]
    output: PathBuf,

    /// skip files that cannot be read as images instead of stopping
    #[arg(short, long)]
    skip_unreadable: bool,

    /// file name of the merged archive; its stem names the segmentation
    #[arg(short, long, default_value = loadnii::loader::DEFAULT_ARCHIVE_NAME)]
    archive_name: String,

    /// increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// main function parses commandline arguments and runs the program
fn main() {
    let cli = Args::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    if !cli.input_dir.exists() {
        eprintln!("Error! Did not find input directory.");
        std::process::exit(-2);
    } else if !cli.input_dir.is_dir() {
        eprintln!("Error! Input is not a directory!");
        std::process::exit(-2);
    }

    let mut scene = ExportScene::new(&cli.output).unwrap_or_else(|e| {
        eprintln!("Error! {}", e);
        std::process::exit(-2);
    });
    let options = ImportOptions::new()
        .skip_unreadable(cli.skip_unreadable)
        .archive_name(cli.archive_name);

    let summary = DirectoryImport::new(options)
        .run(&cli.input_dir, &mut scene)
        .unwrap_or_else(|e| {
            eprintln!("Error! {}", e);
            std::process::exit(-2);
        });

    println!("Loaded {} volumes", summary.volumes.len());
    if summary.loaded_segmentation() {
        println!(
            "Merged {} structures: {}",
            summary.structures.len(),
            summary.structures.join(", ")
        );
    }
    for path in &summary.skipped {
        println!("Skipped: {}", path.display());
    }
    println!("Output: {}", scene.output_dir().display());
}

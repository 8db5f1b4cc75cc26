use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::EnvFilter;

use image_organizer::error::AppError;
use image_organizer::services::classifier::model_manager::{ModelKind, ModelManager};
use image_organizer::services::organizer;

const DEFAULT_OUTPUT_DIR: &str = "organized_images";

/// Classify a directory of images and sort them into per-class folders.
#[derive(Parser, Debug)]
#[command(name = "image-organizer")]
#[command(about = "Classify images with a local ONNX model and sort them into per-class folders")]
struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify the images in a directory and move each one into a folder
    /// named after its predicted class (the default command)
    Organize {
        /// Directory of images to organize (prompted for when omitted)
        #[arg(short, long)]
        input: Option<String>,

        /// Directory that receives the class folders
        #[arg(short, long)]
        output: Option<String>,

        /// Directory holding the model files
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,

        /// Which pretrained classification model to use
        #[arg(long, value_enum, default_value_t = ModelKind::Base)]
        model: ModelKind,
    },
    /// Download the classification model and its label table
    Download {
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,

        #[arg(long, value_enum, default_value_t = ModelKind::Base)]
        model: ModelKind,
    },
    /// Show whether the model files are present on disk
    Status {
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,

        #[arg(long, value_enum, default_value_t = ModelKind::Base)]
        model: ModelKind,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let command = cli.command.unwrap_or(Commands::Organize {
        input: None,
        output: None,
        model_dir: PathBuf::from("models"),
        model: ModelKind::Base,
    });

    match command {
        Commands::Organize {
            input,
            output,
            model_dir,
            model,
        } => run_organize(input, output, model_dir, model).await,
        Commands::Download { model_dir, model } => {
            ModelManager::new(model_dir, model).download().await
        }
        Commands::Status { model_dir, model } => {
            let status = ModelManager::new(model_dir, model).status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn run_organize(
    input: Option<String>,
    output: Option<String>,
    model_dir: PathBuf,
    model: ModelKind,
) -> Result<(), AppError> {
    // When no input was given on the command line, collect both paths
    // interactively, the way a form would.
    let interactive = input.is_none();

    let input = match input {
        Some(dir) => dir,
        None => prompt("Enter the path to the directory of images: ")?,
    };
    if input.trim().is_empty() {
        return Err("Please enter a valid directory path.".into());
    }

    let output = match output {
        Some(dir) => dir,
        None if interactive => {
            let answer = prompt(&format!(
                "Enter the directory to store organized images [{}]: ",
                DEFAULT_OUTPUT_DIR
            ))?;
            if answer.trim().is_empty() {
                DEFAULT_OUTPUT_DIR.to_string()
            } else {
                answer
            }
        }
        None => DEFAULT_OUTPUT_DIR.to_string(),
    };

    let input_dir = Path::new(&input);
    if !input_dir.is_dir() {
        return Err(format!("The directory `{}` does not exist.", input).into());
    }

    let manager = ModelManager::new(model_dir, model);
    if !manager.is_downloaded() {
        manager.download().await?;
    }
    let classifier = manager.load().await?;

    let input_path = input_dir.to_path_buf();
    let output_path = PathBuf::from(&output);
    let report = tokio::task::spawn_blocking(move || {
        organizer::organize(&input_path, &output_path, &classifier)
    })
    .await
    .map_err(|e| AppError {
        message: format!("Task join failed: {}", e),
    })??;

    println!("Images classified and organized successfully!");
    println!(
        "Moved {} image(s) into `{}`.",
        report.files_moved, report.output_dir
    );

    Ok(())
}

fn prompt(message: &str) -> Result<String, AppError> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

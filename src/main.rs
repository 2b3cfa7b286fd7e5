use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use asafw::{
    build_default_tree, copy_extent, parse_root_with, wrap_boot, write_root, Block, BlockId,
    FieldValue, Metadata, ParseOptions, Payload, DEFAULT_SERIAL, DEFAULT_SIGNING_KEY,
};

#[derive(Parser)]
#[command(name = "asafw", about = "ASA firmware block container tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display a firmware image's block tree and extract its payloads
    Extract {
        /// Image file to extract
        file: PathBuf,
        /// Directory to extract block payloads to
        #[arg(long, default_value = "/tmp")]
        output_dir: PathBuf,
        /// Only display the block tree (do not extract)
        #[arg(long)]
        display_only: bool,
    },
    /// Build firmware artifacts
    Create {
        #[command(subcommand)]
        artifact: CreateCommands,
    },
}

#[derive(Subcommand)]
enum CreateCommands {
    /// Package a boot binary as a compressed boot envelope
    Boot {
        /// Input boot binary to package
        file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Assemble a full firmware image
    Fw {
        /// Input kernel (wrapped into a boot envelope automatically)
        #[arg(long)]
        kernel: PathBuf,
        /// Input root filesystem image
        #[arg(long)]
        rootfs: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Certificate serial number for the root metadata
        #[arg(long, default_value = DEFAULT_SERIAL)]
        serial: String,
        /// Kernel command line carried by the kernel-params leaf
        #[arg(long, default_value = "console=ttyS0")]
        kernel_options: String,
        /// File whose contents become the firmware container's metadata
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { file, output_dir, display_only } => {
            let mut image = File::open(&file)?;
            let options = ParseOptions {
                expand_boot:    !display_only,
                defer_payloads: true,
                ..ParseOptions::default()
            };
            let tree = parse_root_with(&mut image, &options)?;
            print_tree(&tree);

            if !display_only {
                std::fs::create_dir_all(&output_dir)?;
                let count = extract_payloads(&mut image, &tree, &output_dir)?;
                println!("Extracted {count} payload(s) to {}", output_dir.display());
            }
        }

        // ── Create boot ──────────────────────────────────────────────────────
        Commands::Create { artifact: CreateCommands::Boot { file, output } } => {
            let input = File::open(&file)?;
            let mut sink = File::create(&output)?;
            wrap_boot(&mut sink, input)?;
            println!("Created boot envelope: {}", output.display());
        }

        // ── Create fw ────────────────────────────────────────────────────────
        Commands::Create {
            artifact: CreateCommands::Fw { kernel, rootfs, output, serial, kernel_options, metadata },
        } => {
            let metadata_blob = match metadata {
                Some(path) => std::fs::read(path)?,
                None       => vec![0u8; 256],
            };

            // The boot leaf expects an already-compressed envelope.
            let mut envelope = Vec::new();
            wrap_boot(&mut envelope, File::open(&kernel)?)?;

            let tree = build_default_tree(
                &serial,
                &DEFAULT_SIGNING_KEY,
                metadata_blob,
                &kernel_options,
                File::open(&rootfs)?,
                Cursor::new(envelope),
            )?;

            let mut sink = File::create(&output)?;
            write_root(&mut sink, tree)?;
            println!("Created firmware image: {}", output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn print_tree(tree: &Block) {
    for (depth, block) in tree.iter() {
        let header = block.header();
        let role = header
            .block_id()
            .map(BlockId::name)
            .unwrap_or("unknown");
        let kind = if header.has_children() { "container" } else { "leaf" };

        println!(
            "{:indent$}{} ({role}, {kind})  meta={}  data={}",
            "",
            header.uuid(),
            header.metadata_length(),
            header.data_length(),
            indent = depth * 2,
        );

        match block.metadata() {
            Some(Metadata::Opaque(bytes)) => {
                let preview = &bytes[..bytes.len().min(16)];
                println!(
                    "{:indent$}  metadata: {}{}",
                    "",
                    hex::encode(preview),
                    if bytes.len() > 16 { "…" } else { "" },
                    indent = depth * 2,
                );
            }
            Some(Metadata::Structured(records)) => {
                for record in records {
                    let desc = match &record.value {
                        FieldValue::Opaque(v) => format!("{} bytes", v.len()),
                        FieldValue::Group(g)  => format!("group of {}", g.len()),
                    };
                    println!(
                        "{:indent$}  field {:>2}: {desc}",
                        "",
                        record.tag,
                        indent = depth * 2,
                    );
                }
            }
            None => {}
        }
    }
}

/// Write every leaf payload to `<output_dir>/<uuid>`.  Deferred extents are
/// streamed straight from the image; payloads buffered during boot
/// expansion are written from memory.
fn extract_payloads(
    image: &mut File,
    tree: &Block,
    output_dir: &Path,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut count = 0usize;
    for (_, block) in tree.iter() {
        let target = output_dir.join(block.header().uuid().to_string());
        match block.payload() {
            Payload::Extent(extent) => {
                let mut sink = File::create(&target)?;
                copy_extent(image, extent, &mut sink)?;
                count += 1;
            }
            Payload::Opaque(bytes) if !bytes.is_empty() => {
                File::create(&target)?.write_all(bytes)?;
                count += 1;
            }
            _ => {}
        }
    }
    Ok(count)
}

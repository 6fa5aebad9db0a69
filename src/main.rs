//! lamina CLI - capture, reproduce, compare and merge directory tree
//! manifests

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use lamina::{
    decode, encode, ops, Config, ContentStore, Context, ContextOptions, Digest, Manifest,
    Resource, ResourceKind,
};

#[derive(Parser)]
#[command(name = "lamina")]
#[command(about = "portable, content-addressed manifests of directory trees")]
#[command(version)]
struct Cli {
    /// content store location (default: config, then ~/.local/lamina/blobs)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// build a manifest from a directory tree
    Build {
        /// directory to capture
        source: PathBuf,

        /// write the encoded manifest to a file instead of storing it
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// ingest file content into the store while digesting
        #[arg(long)]
        ingest: bool,

        /// record symbolic user/group names when they resolve
        #[arg(long)]
        resolve_names: bool,
    },

    /// recreate a manifest's tree at a target directory
    Apply {
        /// manifest file, or a digest resolved via the store
        manifest: String,

        /// directory to populate
        target: PathBuf,
    },

    /// list the resources of a manifest
    Ls {
        /// manifest file, or a digest resolved via the store
        manifest: String,
    },

    /// show differences between two manifests
    Diff {
        /// old manifest
        before: String,

        /// new manifest
        after: String,
    },

    /// merge an upper layer manifest onto a lower one
    Merge {
        /// lower manifest
        lower: String,

        /// upper (delta) manifest
        upper: String,

        /// whiteout convention of the upper layer
        #[arg(long, value_enum, default_value = "overlay")]
        flavor: Flavor,

        /// write the merged manifest to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// check a directory tree against a manifest
    Verify {
        /// directory to check
        source: PathBuf,

        /// manifest file, or a digest resolved via the store
        manifest: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Flavor {
    Overlay,
    Aufs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("lamina: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> lamina::Result<ExitCode> {
    let store_path = match &cli.store {
        Some(path) => path.clone(),
        None => Config::load_default()?.store_path(),
    };

    match cli.command {
        Commands::Build {
            source,
            output,
            ingest,
            resolve_names,
        } => {
            let ctx = Context::with_options(
                &source,
                ContextOptions {
                    resolve_names,
                    store: if ingest {
                        Some(ContentStore::open_at(&store_path)?)
                    } else {
                        None
                    },
                    ..Default::default()
                },
            )?;
            let manifest = ops::build(&ctx)?;
            let bytes = encode(&manifest)?;

            match output {
                Some(path) => std::fs::write(&path, bytes).map_err(|source| {
                    lamina::Error::Io { path, source }
                })?,
                None => {
                    // no output file: store the manifest and hand back
                    // its address
                    let digest = match ctx.store() {
                        Some(store) => store.put_bytes(&bytes)?,
                        None => ContentStore::open_at(&store_path)?.put_bytes(&bytes)?,
                    };
                    println!("{}", digest);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Apply { manifest, target } => {
            let store = ContentStore::open_at(&store_path)?;
            let manifest = load_manifest(&manifest, &store)?;
            std::fs::create_dir_all(&target).map_err(|source| lamina::Error::Io {
                path: target.clone(),
                source,
            })?;
            let ctx = Context::new(&target)?;
            ops::apply(&ctx, &manifest, &store)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Ls { manifest } => {
            let store = ContentStore::open_at(&store_path)?;
            let manifest = load_manifest(&manifest, &store)?;
            for resource in manifest.resources() {
                print_resource(resource);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Diff { before, after } => {
            let store = ContentStore::open_at(&store_path)?;
            let before = load_manifest(&before, &store)?;
            let after = load_manifest(&after, &store)?;
            let diff = ops::diff(&before, &after);
            print_diff(&diff);
            Ok(exit_for_diff(&diff))
        }

        Commands::Merge {
            lower,
            upper,
            flavor,
            output,
        } => {
            let store = ContentStore::open_at(&store_path)?;
            let lower = load_manifest(&lower, &store)?;
            let upper = load_manifest(&upper, &store)?;

            let merged = match flavor {
                Flavor::Overlay => ops::merge_overlay(&lower, &upper)?,
                Flavor::Aufs => ops::merge_aufs(&lower, &upper)?,
            };

            let bytes = encode(&merged)?;
            match output {
                Some(path) => std::fs::write(&path, bytes).map_err(|source| {
                    lamina::Error::Io { path, source }
                })?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout
                        .write_all(&bytes)
                        .map_err(|source| lamina::Error::Io {
                            path: PathBuf::from("<stdout>"),
                            source,
                        })?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Verify { source, manifest } => {
            let store = ContentStore::open_at(&store_path)?;
            let expected = load_manifest(&manifest, &store)?;
            let ctx = Context::new(&source)?;
            let actual = ops::build(&ctx)?;
            let diff = ops::diff(&expected, &actual);
            print_diff(&diff);
            Ok(exit_for_diff(&diff))
        }
    }
}

/// load a manifest from a file path, or from the store when the
/// argument parses as a digest
fn load_manifest(arg: &str, store: &ContentStore) -> lamina::Result<Manifest> {
    let bytes = match Digest::parse(arg) {
        Ok(digest) => store.read(&digest)?,
        Err(_) => std::fs::read(arg).map_err(|source| lamina::Error::Io {
            path: PathBuf::from(arg),
            source,
        })?,
    };
    decode(&bytes)
}

fn print_resource(resource: &Resource) {
    let path = display_path(resource);
    let detail = match &resource.kind {
        ResourceKind::Regular { size, .. } => size.to_string(),
        ResourceKind::Directory { .. } => "-".to_string(),
        ResourceKind::Symlink { .. } => "-".to_string(),
        ResourceKind::BlockDevice { major, minor }
        | ResourceKind::CharDevice { major, minor } => format!("{},{}", major, minor),
        ResourceKind::Fifo | ResourceKind::Socket => "-".to_string(),
    };

    let mut line = format!(
        "{:06o} {}:{} {:>10} {}",
        resource.mode, resource.uid, resource.gid, detail, path
    );
    if let ResourceKind::Symlink { target } = &resource.kind {
        line.push_str(&format!(" -> {}", target));
    }
    println!("{}", line);

    if let ResourceKind::Regular { hardlinks, .. } = &resource.kind {
        for link in hardlinks {
            println!(
                "{:06o} {}:{} {:>10} {} => {}",
                resource.mode, resource.uid, resource.gid, detail, link, resource.path
            );
        }
    }
}

fn print_diff(diff: &ops::ManifestDiff) {
    let mut lines: Vec<(String, String)> = Vec::new();

    for resource in &diff.additions {
        let p = display_path(resource);
        lines.push((p.clone(), format!("++ {}", p)));
    }
    for resource in &diff.deletions {
        let p = display_path(resource);
        lines.push((p.clone(), format!("-- {}", p)));
    }
    for update in &diff.updates {
        let p = display_path(&update.original);
        lines.push((p.clone(), format!("<> {}", p)));
    }

    lines.sort();
    for (_, line) in &lines {
        println!("{}", line);
    }
    println!(
        "additions: {} deletions: {} updates: {}",
        diff.additions.len(),
        diff.deletions.len(),
        diff.updates.len()
    );
}

fn exit_for_diff(diff: &ops::ManifestDiff) -> ExitCode {
    if diff.has_diff() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn display_path(resource: &Resource) -> String {
    if resource.is_directory() {
        format!("{}/", resource.path)
    } else {
        resource.path.clone()
    }
}

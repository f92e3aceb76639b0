use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pvbm::init::{PbufPoolConfig, PvbmConfig, PvbufPoolConfig};
use pvbm::manager::BufferManager;
use pvbm::{diag, traverse};

#[derive(Debug, Parser)]
#[command(name = "pvbmctl", about = "Inspect a packet-vector buffer manager")]
struct Cli {
    /// Pbufs to reserve per size class
    #[clap(long, default_value_t = 1024)]
    pbufs_per_class: usize,

    /// Pvbufs to reserve per size class
    #[clap(long, default_value_t = 1024)]
    pvbufs_per_class: usize,

    /// Overflow throttle numerator out of 65536
    #[clap(long, default_value_t = pvbm::pvbuf_alloc::DEFAULT_FRACT)]
    overflow_fract: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print per-size-class allocator stats for a freshly built manager.
    Stats,
    /// Read a file, chain it into a pvbuf in fixed-size chunks, and print
    /// its shape and RFC 1071 checksum.
    Pack {
        /// File to load; reads stdin when omitted.
        path: Option<PathBuf>,

        /// Bytes per pbuf chunk.
        #[clap(long, default_value_t = 1500)]
        chunk_size: usize,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = PvbmConfig {
        pbuf_pool: PbufPoolConfig {
            objs_per_class: cli.pbufs_per_class,
        },
        pvbuf_pool: PvbufPoolConfig {
            objs_per_class: cli.pvbufs_per_class,
            overflow_fract: cli.overflow_fract,
        },
        external: pvbm::init::ExternalRegionConfig::default(),
    };
    let manager = BufferManager::new(config.into());

    match cli.command {
        Command::Stats => {
            print!("{}", diag::show_buffer_manager(&manager));
            return Ok(());
        }
        Command::Pack { path, chunk_size } => {
            let data = match path {
                Some(path) => fs::read(path)?,
                None => {
                    use std::io::Read;
                    let mut buf = Vec::new();
                    std::io::stdin().lock().read_to_end(&mut buf)?;
                    buf
                }
            };
            if data.is_empty() {
                anyhow::bail!("no input bytes to pack");
            }

            let mut chunks = data.chunks(chunk_size);
            let mut root = manager.alloc_pbuf(chunks.next().unwrap())?;
            let ops = manager.ops();
            for chunk in chunks {
                root = ops.append_bytes(root, chunk)?;
            }

            print!("{}", diag::pvbuf_print(root, &manager));
            let sum = traverse::checksum(root, manager.pvbufs(), manager.pbufs())?;
            println!("checksum: 0x{sum:04x}");

            manager.release(root)?;
        }
    }

    print!("{}", diag::show_buffer_manager(&manager));
    Ok(())
}

use std::fs::File;
use std::io::{self, Read};
use std::net::UdpSocket;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rkspy::{RecordFormatter, Session};

#[derive(Parser, Debug)]
#[command(author, version, about = "Decodes rk-spy trace streams")]
struct Opts {
    /// Prefix each record with reception time and target timestamp.
    #[arg(short, long, global = true)]
    timestamps: bool,

    /// Print one JSON object per record.
    #[arg(long, global = true)]
    json: bool,

    /// Only show these record groups (act, tmr, eq, mp, sched, info, user).
    #[arg(short, long = "filter", value_name = "GROUP", global = true)]
    filters: Vec<String>,

    #[command(subcommand)]
    source: Option<Source>,
}

#[derive(Subcommand, Debug)]
enum Source {
    /// Decode a captured trace file.
    File { path: PathBuf },
    /// Listen for trace datagrams.
    Udp {
        #[arg(long, default_value_t = 7701)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },
    /// Decode bytes piped on stdin (the default).
    Stdin,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let mut formatter = RecordFormatter::new(opts.timestamps, opts.json);
    if !opts.filters.is_empty() {
        for name in formatter.set_filters(&opts.filters) {
            eprintln!("ignoring unknown filter '{name}'");
        }
    }
    let mut session = Session::new(formatter);

    match opts.source.unwrap_or(Source::Stdin) {
        Source::File { path } => {
            let file =
                File::open(&path).with_context(|| format!("opening {}", path.display()))?;
            pump(file, &mut session)?;
        }
        Source::Stdin => pump(io::stdin().lock(), &mut session)?,
        Source::Udp { port, bind } => listen(&bind, port, &mut session)?,
    }

    if session.corrupt_frames() > 0 {
        eprintln!("{} corrupt frames skipped", session.corrupt_frames());
    }
    Ok(())
}

fn pump(mut reader: impl Read, session: &mut Session) -> Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        let len = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("reading trace stream"),
        };
        for line in session.feed(&buf[..len]) {
            println!("{line}");
        }
    }
}

fn listen(bind: &str, port: u16, session: &mut Session) -> Result<()> {
    let addr = format!("{bind}:{port}");
    let socket = UdpSocket::bind(&addr).with_context(|| format!("binding udp://{addr}"))?;
    println!("rkspy listening on udp://{addr}");

    let mut buf = [0u8; 4096];
    let mut last_peer = None;
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if last_peer != Some(peer) {
                    println!("telemetry from {peer}");
                    last_peer = Some(peer);
                }
                for line in session.feed(&buf[..len]) {
                    println!("{line}");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("receiving trace datagram"),
        }
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use minifi_binding::command::{dispatch, Command as RemoteCommand, CommandSink};
use minifi_binding::config::{SessionConfig, GET_FILE, INPUT_DIRECTORY};
use minifi_binding::{FlowFileRecord, NativeLibrary, RpgEndpoint, Session};

#[derive(Parser, Debug)]
#[clap(name = "minifi-cli")]
#[clap(about = "Pull flow files from a remote process group", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct Remote {
    /// Shared object exporting the engine's C API
    #[clap(short = 's', long = "dll")]
    dll_file: PathBuf,
    /// URL of the remote instance
    #[clap(short = 'n', long = "nifi")]
    nifi_instance: String,
    /// Remote input port id
    #[clap(short = 'i', long = "input")]
    input_port: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch a directory with GetFile and print what comes back
    Get {
        #[clap(flatten)]
        remote: Remote,
        /// Directory for GetFile to monitor
        #[clap(short = 'd', long = "dir")]
        dir: String,
        #[clap(short = 'c', long, default_value_t = 1)]
        count: usize,
        /// Interpret each flow file's `command` attribute
        #[clap(long)]
        commands: bool,
    },
    /// Build the session described by a JSON config file
    Run {
        #[clap(long)]
        config: PathBuf,
        #[clap(short = 'c', long, default_value_t = 1)]
        count: usize,
        #[clap(long)]
        commands: bool,
    },
    /// Send a file, or every file in a directory, to the remote port
    Send {
        #[clap(flatten)]
        remote: Remote,
        path: PathBuf,
    },
}

/// Prints what a vehicle controller would have been told to do.
struct PrintSink;

impl CommandSink for PrintSink {
    fn drive(&mut self, forward: bool, speed: Option<i32>) {
        let direction = if forward { "forward" } else { "backward" };
        match speed {
            Some(speed) => println!("  -> drive {} at {}", direction, speed),
            None => println!("  -> drive {}", direction),
        }
    }

    fn stop(&mut self) {
        println!("  -> stop");
    }

    fn steer(&mut self, angle: Option<i32>) {
        match angle {
            Some(angle) => println!("  -> steer {}", angle),
            None => println!("  -> steer home"),
        }
    }

    fn set_speed(&mut self, speed: u16) {
        println!("  -> speed {}", speed);
    }

    fn pan_camera(&mut self, dx: i8, dy: i8) {
        println!("  -> camera {:+} {:+}", dx, dy);
    }

    fn report_cpu_temp(&mut self) {
        println!("  -> cpu temperature requested");
    }

    fn report_distance(&mut self) {
        println!("  -> distance requested");
    }
}

fn print_record(record: &FlowFileRecord, commands: bool) -> anyhow::Result<()> {
    println!(
        "{} bytes at {}",
        record.size(),
        record.content_location().unwrap_or("<none>")
    );
    println!("  {}", serde_json::to_string(record.attributes())?);
    if commands {
        match RemoteCommand::from_record(record) {
            Ok(command) => dispatch(command, &mut PrintSink),
            Err(e) => println!("  !! {}", e),
        }
    }
    Ok(())
}

fn pull(session: Session, count: usize, commands: bool) -> anyhow::Result<()> {
    for _ in 0..count {
        match session.retrieve_next()? {
            Some(record) => print_record(&record, commands)?,
            None => {
                println!("No flow file available");
                break;
            }
        }
    }
    session.close();
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Get {
            remote,
            dir,
            count,
            commands,
        } => {
            let config = SessionConfig::get_file(
                remote.dll_file,
                &remote.nifi_instance,
                &remote.input_port,
                &dir,
            );
            log::info!("{} watching {} via {}", GET_FILE, dir, INPUT_DIRECTORY);
            pull(Session::from_config(&config)?, count, commands)
        }
        Command::Run {
            config,
            count,
            commands,
        } => {
            let config = SessionConfig::from_file(&config)?;
            pull(Session::from_config(&config)?, count, commands)
        }
        Command::Send { remote, path } => {
            let lib = NativeLibrary::load(&remote.dll_file)?;
            let mut endpoint = RpgEndpoint::create(
                &lib,
                &remote.nifi_instance,
                &remote.input_port,
            )?;
            let sent = endpoint.transfer_path(&path)?;
            println!("Sent {} file(s) from {}", sent, path.display());
            endpoint.dispose()?;
            Ok(())
        }
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        println!("Error: {}", e);
        std::process::exit(1);
    }
}

//! Host tool for ECS150FS disk images.

mod config;
mod disk;
mod logger;

use std::path::Path;
use std::process::ExitCode;

use ecsfs::{mkfs, Fd, FsError, FsResult, Mount};
use log::{debug, error};

use crate::config::Config;
use crate::disk::{FileDevice, FileStore};

type Fs = Mount<FileStore>;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("usage: {0}")]
    Usage(String),
    #[error("{0}: {1}")]
    Host(String, std::io::Error),
    #[error(transparent)]
    Fs(#[from] FsError),
}

type CliResult<T> = Result<T, CliError>;

struct Command {
    name: &'static str,
    args: &'static str,
    min_args: usize,
    run: fn(&mut Fs, &[String]) -> CliResult<()>,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "info",
        args: "",
        min_args: 0,
        run: cmd_info,
    },
    Command {
        name: "ls",
        args: "",
        min_args: 0,
        run: cmd_ls,
    },
    Command {
        name: "add",
        args: "<host file>",
        min_args: 1,
        run: cmd_add,
    },
    Command {
        name: "rm",
        args: "<file>",
        min_args: 1,
        run: cmd_rm,
    },
    Command {
        name: "cat",
        args: "<file>",
        min_args: 1,
        run: cmd_cat,
    },
    Command {
        name: "stat",
        args: "<file>",
        min_args: 1,
        run: cmd_stat,
    },
    Command {
        name: "read",
        args: "<file> <offset> [count]",
        min_args: 2,
        run: cmd_read,
    },
    Command {
        name: "write",
        args: "<file> <offset> <text>",
        min_args: 3,
        run: cmd_write,
    },
];

fn main() -> ExitCode {
    let config = Config::from_env();
    if logger::init(config.log_level).is_err() {
        eprintln!("ecsfs-cli: logger already installed");
    }
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(msg)) => {
            eprintln!("usage: {}", msg);
            print_commands();
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn print_commands() {
    eprintln!("commands:");
    eprintln!("\tmkfs <disk> <blocks>");
    for command in COMMANDS {
        eprintln!("\t{} <disk> {}", command.name, command.args);
    }
}

fn run(args: &[String]) -> CliResult<()> {
    let (name, rest) = args
        .split_first()
        .ok_or_else(|| CliError::Usage("ecsfs-cli <command> <disk> [args]".into()))?;
    let (disk, rest) = rest
        .split_first()
        .ok_or_else(|| CliError::Usage(format!("{} <disk> ...", name)))?;
    if name == "mkfs" {
        return cmd_mkfs(disk, rest);
    }
    let command = COMMANDS
        .iter()
        .find(|command| command.name == name)
        .ok_or_else(|| CliError::Usage(format!("unknown command '{}'", name)))?;
    if rest.len() < command.min_args {
        return Err(CliError::Usage(format!("{} <disk> {}", command.name, command.args)));
    }
    debug!("{} on {}", command.name, disk);

    let mut fs = Mount::new(FileStore);
    fs.mount(disk)?;
    let result = (command.run)(&mut fs, rest);
    let unmounted = fs.unmount();
    result?;
    unmounted?;
    Ok(())
}

fn parse_number(value: &str, what: &str) -> CliResult<usize> {
    value
        .parse()
        .map_err(|_| CliError::Usage(format!("{} must be a number, got '{}'", what, value)))
}

/// Opens `name`, runs `f`, and closes the descriptor whatever `f` returned.
fn with_file<T>(
    fs: &mut Fs,
    name: &str,
    f: impl FnOnce(&mut Fs, Fd) -> FsResult<T>,
) -> CliResult<T> {
    let fd = fs.open(name)?;
    let result = f(fs, fd);
    fs.close(fd)?;
    Ok(result?)
}

fn cmd_mkfs(disk: &str, rest: &[String]) -> CliResult<()> {
    let blocks = rest
        .first()
        .ok_or_else(|| CliError::Usage("mkfs <disk> <blocks>".into()))?;
    let blocks = parse_number(blocks, "blocks")?;
    if !(mkfs::MIN_BLOCKS..=mkfs::MAX_BLOCKS).contains(&blocks) {
        return Err(FsError::InvalidGeometry.into());
    }
    let device = FileDevice::create(Path::new(disk), blocks)?;
    let sb = mkfs::format(&device)?;
    println!(
        "Created '{}': {} blocks, {} data blocks",
        disk, sb.total_blocks, sb.data_blocks
    );
    Ok(())
}

fn cmd_info(fs: &mut Fs, _args: &[String]) -> CliResult<()> {
    println!("{}", fs.info()?);
    Ok(())
}

fn cmd_ls(fs: &mut Fs, _args: &[String]) -> CliResult<()> {
    println!("FS Ls:");
    for entry in fs.list()? {
        println!("{}", entry);
    }
    Ok(())
}

fn cmd_add(fs: &mut Fs, args: &[String]) -> CliResult<()> {
    let host = Path::new(&args[0]);
    let data = std::fs::read(host).map_err(|err| CliError::Host(args[0].clone(), err))?;
    let name = host
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| CliError::Usage(format!("'{}' has no file name", args[0])))?;
    fs.create(name)?;
    let written = with_file(fs, name, |fs, fd| fs.write(fd, &data))?;
    println!("Wrote file '{}' ({}/{} bytes)", name, written, data.len());
    Ok(())
}

fn cmd_rm(fs: &mut Fs, args: &[String]) -> CliResult<()> {
    fs.delete(&args[0])?;
    println!("Removed file '{}'", args[0]);
    Ok(())
}

fn cmd_stat(fs: &mut Fs, args: &[String]) -> CliResult<()> {
    let size = with_file(fs, &args[0], |fs, fd| fs.stat(fd))?;
    println!("Size of file '{}' is {} bytes", args[0], size);
    Ok(())
}

fn cmd_cat(fs: &mut Fs, args: &[String]) -> CliResult<()> {
    let (read, buf) = with_file(fs, &args[0], |fs, fd| {
        let mut buf = vec![0u8; fs.stat(fd)?];
        let read = fs.read(fd, &mut buf)?;
        Ok((read, buf))
    })?;
    if buf.is_empty() {
        println!("Empty file");
        return Ok(());
    }
    println!("Read file '{}' ({}/{} bytes)", args[0], read, buf.len());
    println!("Content of the file:");
    print!("{}", String::from_utf8_lossy(&buf[..read]));
    Ok(())
}

fn cmd_read(fs: &mut Fs, args: &[String]) -> CliResult<()> {
    let offset = parse_number(&args[1], "offset")?;
    let count = args
        .get(2)
        .map(|count| parse_number(count, "count"))
        .transpose()?;
    let (read, size, buf) = with_file(fs, &args[0], |fs, fd| {
        let size = fs.stat(fd)?;
        fs.seek(fd, offset)?;
        let mut buf = vec![0u8; read_len(size, offset, count)];
        let read = fs.read(fd, &mut buf)?;
        Ok((read, size, buf))
    })?;
    println!(
        "Read file '{}' ({}/{} bytes) with offset '{}'",
        args[0], read, size, offset
    );
    println!("Content of the file:");
    println!("{}", String::from_utf8_lossy(&buf[..read]));
    Ok(())
}

/// Bytes to read from `offset`: the rest of the file, or `count` if smaller.
fn read_len(size: usize, offset: usize, count: Option<usize>) -> usize {
    let rest = size.saturating_sub(offset);
    count.map_or(rest, |count| count.min(rest))
}

fn cmd_write(fs: &mut Fs, args: &[String]) -> CliResult<()> {
    let offset = parse_number(&args[1], "offset")?;
    let text = args[2..].join(" ");
    let (written, size) = with_file(fs, &args[0], |fs, fd| {
        fs.seek(fd, offset)?;
        let written = fs.write(fd, text.as_bytes())?;
        Ok((written, fs.stat(fd)?))
    })?;
    println!(
        "Write file '{}' ({}/{} bytes) with offset '{}'",
        args[0], written, size, offset
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_len_stays_within_file() {
        assert_eq!(read_len(100, 10, None), 90);
        assert_eq!(read_len(100, 10, Some(5)), 5);
        assert_eq!(read_len(100, 10, Some(usize::MAX)), 90);
        assert_eq!(read_len(100, 100, Some(1 << 40)), 0);
    }

    #[test]
    fn commands_have_unique_names() {
        for (index, command) in COMMANDS.iter().enumerate() {
            assert!(COMMANDS[index + 1..]
                .iter()
                .all(|other| other.name != command.name));
        }
    }
}

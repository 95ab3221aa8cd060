mod cli;

use std::fs::OpenOptions;
use std::io::{self, Write};

use clap::Parser;
use cli::{Cli, Command};
use sectorfs::{DiskEmulator, DiskEmulatorBuilder, FileSystem, FsError, SectorStorage};

fn open_disk(cli: &Cli, clear: bool) -> io::Result<DiskEmulator> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(clear)
        .open(&cli.disk)?;
    DiskEmulatorBuilder::from(fd)
        .with_sector_size(cli.sector_size)
        .with_sectors(cli.sectors)
        .clear_medium(clear)
        .build()
}

fn main() -> Result<(), FsError> {
    env_logger::init();
    let cli = Cli::parse();

    let mut fs = match cli.command {
        Command::Format => FileSystem::format(open_disk(&cli, true)?)?,
        _ => FileSystem::mount(open_disk(&cli, false)?)?,
    };
    for dir in &cli.cd {
        fs.change_directory(dir)?;
    }

    match &cli.command {
        Command::Format => {
            println!("formatted {:?}, {} sectors free", cli.disk, fs.free_sectors()?);
        }
        Command::Cp { host, name } => {
            let data = std::fs::read(host)?;
            fs.create(name, data.len())?;
            let mut file = fs.open(name)?;
            fs.write(&mut file, &data)?;
            println!("copied {} bytes into {}", data.len(), name);
        }
        Command::Cat { name } => {
            let mut file = fs.open(name)?;
            let mut data = vec![0; file.length(fs.device())?];
            fs.read(&mut file, &mut data)?;
            io::stdout().write_all(&data)?;
        }
        Command::Ls => {
            for name in fs.list()? {
                println!("{}", name);
            }
        }
        Command::Mkdir { name } => fs.make_directory(name)?,
        Command::Rm { name } => fs.remove(name)?,
        Command::Dump => print!("{}", fs.print()?),
    }
    fs.device().sync_disk()?;
    Ok(())
}

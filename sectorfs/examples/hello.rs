use std::thread;

use sectorfs::{dispatch, DiskEmulatorBuilder, FileSystem, Process, Syscall};

pub fn main() {
    env_logger::init();
    let tmp = tempfile::tempfile().unwrap();
    let dev = DiskEmulatorBuilder::from(tmp)
        .build()
        .expect("Could not initialize disk emulator.");
    let shared = FileSystem::format(dev).expect("should format").into_shared();

    // Each process writes its own file under the global lock.
    let workers: Vec<_> = (1..=3)
        .map(|pid| {
            let shared = shared.clone();
            thread::spawn(move || {
                let mut process = Process::new(pid);
                let name = format!("hello{}", pid);
                let greeting = format!("hello from process {}", pid);
                let mut fs = shared.lock().unwrap();
                let fd = dispatch(
                    &mut *fs,
                    &mut process,
                    Syscall::Open {
                        name: &name,
                        create: true,
                        size: greeting.len(),
                    },
                );
                assert!(fd >= 0, "open failed");
                let fd = fd as usize;
                dispatch(&mut *fs, &mut process, Syscall::Write { fd, buf: greeting.as_bytes() });
                dispatch(&mut *fs, &mut process, Syscall::Close { fd });
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut fs = shared.lock().unwrap();
    for name in fs.list().unwrap() {
        println!("{}", name);
    }
    print!("{}", fs.print().unwrap());
}

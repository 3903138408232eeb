use probe_attach::catalog::{FuncOffsets, FunctionPrograms, Offsets};
use probe_attach::closer::{Closer, Detach};
use probe_attach::domain::{AttachError, Inode, Pid, ProbeError, ProgramId};
use probe_attach::instrumenter::{
    Backend, Executable, Image, Instrumenter, Location, ProbeKind, Target,
};
use probe_attach::procmaps::{MappedFile, Mapping, ProcessMaps};
use probe_attach::rescan::LibraryRescan;
use probe_attach::tracer::{ProbeSet, Tracer};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::os::fd::OwnedFd;
use std::rc::Rc;

const PID: Pid = Pid(4242);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attached {
    target: String,
    kind: ProbeKind,
    location: String,
    program: String,
}

struct Released(Rc<Cell<usize>>);

impl Detach for Released {
    fn detach(self: Box<Self>) -> Result<(), ProbeError> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

/// Records every attachment; fails the ones it's told to
#[derive(Default)]
struct FakeBackend {
    attached: Rc<RefCell<Vec<Attached>>>,
    released: Rc<Cell<usize>>,
    opened: Vec<String>,
    failing_locations: HashSet<String>,
    failing_programs: HashMap<String, i32>,
    unopenable: HashMap<String, i32>,
}

impl FakeBackend {
    fn fail_at(mut self, location: &str) -> Self {
        self.failing_locations.insert(location.to_string());
        self
    }

    fn fail_program(self, program: &str) -> Self {
        self.fail_program_with(program, libc::EINVAL)
    }

    fn fail_program_with(mut self, program: &str, errno: i32) -> Self {
        self.failing_programs.insert(program.to_string(), errno);
        self
    }

    fn unopenable(mut self, path: &str, errno: i32) -> Self {
        self.unopenable.insert(path.to_string(), errno);
        self
    }

    fn attached(&self) -> Vec<Attached> {
        self.attached.borrow().clone()
    }
}

impl Backend for FakeBackend {
    fn open_image(&mut self, path: &str) -> Result<Image, ProbeError> {
        self.opened.push(path.to_string());
        match self.unopenable.get(path) {
            Some(&errno) => Err(ProbeError::Io(io::Error::from_raw_os_error(errno))),
            None => Ok(Image::new(path)),
        }
    }

    fn attach_probe(
        &mut self,
        target: Target<'_>,
        kind: ProbeKind,
        location: Location<'_>,
        program: &ProgramId,
    ) -> Result<Closer, ProbeError> {
        let location = location.to_string();
        let errno = match self.failing_programs.get(program.as_str()) {
            Some(&errno) => Some(errno),
            None => self.failing_locations.contains(&location).then_some(libc::EINVAL),
        };
        if let Some(errno) = errno {
            return Err(ProbeError::Io(io::Error::from_raw_os_error(errno)));
        }
        let target = match target {
            Target::Kernel => "kernel".to_string(),
            Target::Image(image) => image.path().to_string(),
        };
        let label = format!("{target}:{location}");
        self.attached.borrow_mut().push(Attached {
            target,
            kind,
            location,
            program: program.to_string(),
        });
        Ok(Closer::new(label, Released(Rc::clone(&self.released))))
    }

    fn open_packet_socket(&mut self) -> Result<OwnedFd, ProbeError> {
        Ok(std::fs::File::open("/dev/null")?.into())
    }

    fn attach_socket_filter(
        &mut self,
        program: &ProgramId,
        socket: OwnedFd,
    ) -> Result<Closer, ProbeError> {
        drop(socket);
        if self.failing_programs.contains_key(program.as_str()) {
            return Err(ProbeError::Io(io::Error::from_raw_os_error(libc::EPERM)));
        }
        self.attached.borrow_mut().push(Attached {
            target: "socket".to_string(),
            kind: ProbeKind::Entry,
            location: String::new(),
            program: program.to_string(),
        });
        Ok(Closer::new(format!("socket {program}"), Released(Rc::clone(&self.released))))
    }
}

/// A process map that never changes between scans, unless told to vanish
#[derive(Default)]
struct FakeMaps {
    mappings: Vec<Mapping>,
    inodes: HashMap<u64, Inode>,
    scans: Cell<usize>,
    vanish_after: Option<usize>,
}

impl FakeMaps {
    /// The process exits after `scans` reads of its map
    fn vanish_after(mut self, scans: usize) -> Self {
        self.vanish_after = Some(scans);
        self
    }

    fn with_library(mut self, path: &str, start: u64, inode: Option<u64>) -> Self {
        self.mappings.push(Mapping {
            start,
            end: start + 0x1000,
            inode: inode.map(Inode),
            path: path.to_string(),
        });
        if let Some(ino) = inode {
            self.inodes.insert(start, Inode(ino));
        }
        self
    }
}

impl ProcessMaps for FakeMaps {
    fn mappings(&self, _pid: Pid) -> Vec<Mapping> {
        let scans = self.scans.get();
        self.scans.set(scans + 1);
        match self.vanish_after {
            Some(limit) if scans >= limit => Vec::new(),
            _ => self.mappings.clone(),
        }
    }

    fn mapped_file(&self, pid: Pid, mapping: &Mapping) -> MappedFile {
        MappedFile {
            path: format!("/proc/{}/map_files/{:x}-{:x}", pid.0, mapping.start, mapping.end),
            inode: self.inodes.get(&mapping.start).copied(),
        }
    }
}

fn exe_with_offsets() -> Executable {
    let mut offsets = Offsets::default();
    offsets.insert("main.handle", FuncOffsets { entry: 0x100, returns: vec![0x180, 0x1a0, 0x1c0] });
    offsets.insert("main.serve", FuncOffsets { entry: 0x200, returns: vec![0x240] });
    Executable { image: Image::new("/proc/4242/exe"), offsets }
}

fn with_exe(backend: FakeBackend) -> Instrumenter<FakeBackend> {
    Instrumenter::new(backend).with_executable(exe_with_offsets())
}

fn libssl_probes(set: &mut ProbeSet) {
    let mut ssl = BTreeMap::new();
    ssl.insert("SSL_read".to_string(), FunctionPrograms::entry("uprobe_ssl_read"));
    ssl.insert("SSL_write".to_string(), FunctionPrograms::entry("uprobe_ssl_write"));
    set.libraries.insert("libssl.so".to_string(), ssl);
}

fn count_at(attached: &[Attached], kind: ProbeKind) -> usize {
    attached.iter().filter(|a| a.kind == kind).count()
}

#[test]
fn test_binary_probe_handle_counts() {
    let mut set = ProbeSet::default();
    set.binary.insert("main.handle".to_string(), FunctionPrograms::entry("enter"));
    let mut instrumenter = with_exe(FakeBackend::default());
    instrumenter.binary_probes(&mut set).unwrap();
    assert_eq!(set.closers().len(), 1);

    let mut set = ProbeSet::default();
    set.binary.insert("main.handle".to_string(), FunctionPrograms::ret("leave"));
    let mut instrumenter = with_exe(FakeBackend::default());
    instrumenter.binary_probes(&mut set).unwrap();
    assert_eq!(set.closers().len(), 3);

    let mut set = ProbeSet::default();
    set.binary.insert("main.handle".to_string(), FunctionPrograms::both("enter", "leave"));
    let mut instrumenter = with_exe(FakeBackend::default());
    instrumenter.binary_probes(&mut set).unwrap();
    assert_eq!(set.closers().len(), 4);

    let attached = instrumenter.backend().attached();
    assert_eq!(count_at(&attached, ProbeKind::Entry), 1);
    assert_eq!(count_at(&attached, ProbeKind::Return), 3);
    assert!(attached.iter().all(|a| a.target == "/proc/4242/exe"));
    let locations: Vec<&str> = attached.iter().map(|a| a.location.as_str()).collect();
    assert_eq!(locations, vec!["0x100", "0x180", "0x1a0", "0x1c0"]);
    assert_eq!(attached[1].program, "leave");
}

#[test]
fn test_empty_program_pairs_are_never_attached() {
    let mut set = ProbeSet::default();
    set.binary.insert("main.handle".to_string(), FunctionPrograms::default());
    set.kernel.insert("tcp_sendmsg".to_string(), FunctionPrograms::default().required());
    let mut ssl = BTreeMap::new();
    ssl.insert("SSL_read".to_string(), FunctionPrograms::default().required());
    set.libraries.insert("libssl.so".to_string(), ssl);

    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let mut instrumenter = with_exe(FakeBackend::default());
    instrumenter.attach_all(Some(PID), &maps, &mut set).unwrap();

    assert!(instrumenter.backend().attached().is_empty());
    assert!(set.closers().is_empty());
}

#[test]
fn test_binary_function_missing_from_offsets_is_skipped() {
    let mut set = ProbeSet::default();
    set.binary.insert("main.notThere".to_string(), FunctionPrograms::both("enter", "leave").required());
    set.binary.insert("main.serve".to_string(), FunctionPrograms::entry("enter"));

    let mut instrumenter = with_exe(FakeBackend::default());
    instrumenter.binary_probes(&mut set).unwrap();

    assert_eq!(set.closers().len(), 1);
    assert_eq!(instrumenter.backend().attached()[0].location, "0x200");
}

#[test]
fn test_binary_probes_without_executable_attach_nothing() {
    let mut set = ProbeSet::default();
    set.binary.insert("main.serve".to_string(), FunctionPrograms::entry("enter"));

    let mut instrumenter = Instrumenter::new(FakeBackend::default());
    instrumenter.binary_probes(&mut set).unwrap();
    assert!(set.closers().is_empty());
}

#[test]
fn test_binary_failure_is_fatal_and_keeps_earlier_handles() {
    let mut set = ProbeSet::default();
    set.binary.insert("main.handle".to_string(), FunctionPrograms::entry("enter"));
    set.binary.insert("main.serve".to_string(), FunctionPrograms::both("enter", "leave"));

    // main.serve's entry attaches, its only return offset fails
    let backend = FakeBackend::default().fail_at("0x240");
    let mut instrumenter = with_exe(backend);
    let err = instrumenter.binary_probes(&mut set).unwrap_err();

    assert!(matches!(err, AttachError::Function { .. }));
    assert_eq!(err.subject(), "main.serve");
    assert_eq!(err.to_string(), "instrumenting function \"main.serve\"");
    // main.handle entry + main.serve entry, both owned by the tracer
    assert_eq!(set.closers().len(), 2);
}

#[test]
fn test_kernel_probes_by_symbol() {
    let mut set = ProbeSet::default();
    set.kernel.insert("tcp_sendmsg".to_string(), FunctionPrograms::both("kprobe_send", "kretprobe_send"));
    set.kernel.insert("tcp_recvmsg".to_string(), FunctionPrograms::ret("kretprobe_recv"));

    let mut instrumenter = Instrumenter::new(FakeBackend::default());
    instrumenter.kernel_probes(&mut set).unwrap();

    let attached = instrumenter.backend().attached();
    assert_eq!(attached.len(), 3);
    assert!(attached.iter().all(|a| a.target == "kernel"));
    assert_eq!(
        attached[0],
        Attached {
            target: "kernel".to_string(),
            kind: ProbeKind::Return,
            location: "tcp_recvmsg".to_string(),
            program: "kretprobe_recv".to_string(),
        }
    );
    assert_eq!(set.closers().len(), 3);
}

#[test]
fn test_kernel_failure_is_always_fatal() {
    let mut set = ProbeSet::default();
    set.kernel.insert("a_kfunc".to_string(), FunctionPrograms::entry("kprobe_a"));
    set.kernel.insert("b_kfunc".to_string(), FunctionPrograms::entry("kprobe_b"));

    let mut instrumenter = Instrumenter::new(FakeBackend::default().fail_program("kprobe_b"));
    let err = instrumenter.kernel_probes(&mut set).unwrap_err();

    assert_eq!(err.subject(), "b_kfunc");
    assert_eq!(err.probe_error().raw_os_error(), Some(libc::EINVAL));
    assert_eq!(set.closers().len(), 1);
}

// Kernel and main-binary probes have no deduplication: they must be attached
// once per process lifetime. Library probes are deduplicated by inode.
#[test]
fn test_only_library_probes_are_deduplicated() {
    let mut set = ProbeSet::default();
    set.kernel.insert("tcp_sendmsg".to_string(), FunctionPrograms::entry("kprobe_send"));
    set.binary.insert("main.serve".to_string(), FunctionPrograms::entry("enter"));
    libssl_probes(&mut set);

    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let mut instrumenter = with_exe(FakeBackend::default());

    instrumenter.attach_all(Some(PID), &maps, &mut set).unwrap();
    assert_eq!(set.closers().len(), 4);

    instrumenter.attach_all(Some(PID), &maps, &mut set).unwrap();
    // kernel and main-binary probes attached a second time, libssl skipped
    assert_eq!(set.closers().len(), 6);
    let attached = instrumenter.backend().attached();
    assert_eq!(attached.iter().filter(|a| a.location == "tcp_sendmsg").count(), 2);
    assert_eq!(attached.iter().filter(|a| a.location == "0x200").count(), 2);
    assert_eq!(attached.iter().filter(|a| a.location == "SSL_read").count(), 1);
}

#[test]
fn test_library_inode_skip() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let mut instrumenter = Instrumenter::new(FakeBackend::default());

    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert_eq!(set.closers().len(), 2);
    assert!(set.instrumented_libs().contains(Inode(1234)));

    let attached = instrumenter.backend().attached();
    assert!(attached.iter().all(|a| a.target == "/proc/4242/map_files/7f000000-7f001000"));
    assert_eq!(attached[0].location, "SSL_read");
    assert_eq!(attached[1].location, "SSL_write");

    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert_eq!(set.closers().len(), 2);
    assert_eq!(instrumenter.backend().attached().len(), 2);
    assert_eq!(instrumenter.backend().opened.len(), 1);
}

#[test]
fn test_library_static_fallback() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let maps = FakeMaps::default().with_library("/usr/bin/node", 0x5500_0000, Some(99));
    let mut instrumenter = Instrumenter::new(FakeBackend::default());

    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert_eq!(instrumenter.backend().opened, vec!["/proc/4242/exe".to_string()]);
    assert_eq!(set.closers().len(), 2);
    assert!(set.instrumented_libs().is_empty());

    // never recorded, so attempted again on every scan
    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert_eq!(instrumenter.backend().opened.len(), 2);
    assert_eq!(set.closers().len(), 4);
}

#[test]
fn test_library_without_inode_is_never_recorded() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let maps = FakeMaps::default().with_library("/lib/libssl.so.3", 0x7f00_0000, None);
    let mut instrumenter = Instrumenter::new(FakeBackend::default());

    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    instrumenter.library_probes(PID, &maps, &mut set).unwrap();

    assert!(set.instrumented_libs().is_empty());
    assert_eq!(set.closers().len(), 4);
}

#[test]
fn test_optional_library_failure_is_skipped() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let mut instrumenter = Instrumenter::new(FakeBackend::default().fail_at("SSL_read"));

    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert_eq!(set.closers().len(), 1);
    // all functions were attempted, so the library counts as done
    assert!(set.instrumented_libs().contains(Inode(1234)));
}

#[test]
fn test_required_library_failure_keeps_earlier_optional_handles() {
    let mut set = ProbeSet::default();
    let mut ssl = BTreeMap::new();
    ssl.insert("SSL_a_optional_ok".to_string(), FunctionPrograms::entry("ok"));
    ssl.insert("SSL_b_optional_fails".to_string(), FunctionPrograms::entry("broken"));
    ssl.insert("SSL_c_required_fails".to_string(), FunctionPrograms::entry("broken").required());
    ssl.insert("SSL_d_never_reached".to_string(), FunctionPrograms::entry("ok"));
    set.libraries.insert("libssl.so".to_string(), ssl);

    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let mut instrumenter = Instrumenter::new(FakeBackend::default().fail_program("broken"));

    let err = instrumenter.library_probes(PID, &maps, &mut set).unwrap_err();
    assert_eq!(err.subject(), "SSL_c_required_fails");
    assert_eq!(set.closers().len(), 1);
    let kept = set.closers().iter().next().map(Closer::label).map(str::to_string);
    assert_eq!(kept.as_deref(), Some("/proc/4242/map_files/7f000000-7f001000:SSL_a_optional_ok"));
    assert!(!set.instrumented_libs().contains(Inode(1234)));
}

#[test]
fn test_required_library_probe_that_succeeds() {
    let mut set = ProbeSet::default();
    let mut ssl = BTreeMap::new();
    ssl.insert("SSL_read".to_string(), FunctionPrograms::entry("ok").required());
    ssl.insert("SSL_write".to_string(), FunctionPrograms::entry("broken"));
    set.libraries.insert("libssl.so".to_string(), ssl);

    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let mut instrumenter = Instrumenter::new(FakeBackend::default().fail_program("broken"));

    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert_eq!(set.closers().len(), 1);
}

#[test]
fn test_empty_process_map_attaches_nothing() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let mut instrumenter = Instrumenter::new(FakeBackend::default());

    instrumenter.library_probes(PID, &FakeMaps::default(), &mut set).unwrap();
    assert!(set.closers().is_empty());
    assert!(instrumenter.backend().opened.is_empty());
}

#[test]
fn test_image_open_failure() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let path = "/proc/4242/map_files/7f000000-7f001000";

    let mut instrumenter = Instrumenter::new(FakeBackend::default().unopenable(path, libc::EACCES));
    let err = instrumenter.library_probes(PID, &maps, &mut set).unwrap_err();
    match err {
        AttachError::OpenImage { library, path: failed, .. } => {
            assert_eq!(library, "libssl.so");
            assert_eq!(failed, path);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(set.instrumented_libs().is_empty());
}

#[test]
fn test_process_exit_during_scan_is_not_an_error() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let path = "/proc/4242/map_files/7f000000-7f001000";

    let mut instrumenter = Instrumenter::new(FakeBackend::default().unopenable(path, libc::ENOENT));
    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert!(set.closers().is_empty());
    assert!(set.instrumented_libs().is_empty());
}

#[test]
fn test_required_probe_failing_after_process_exit() {
    let mut set = ProbeSet::default();
    let mut ssl = BTreeMap::new();
    ssl.insert("SSL_read".to_string(), FunctionPrograms::entry("uprobe_ssl_read").required());
    set.libraries.insert("libssl.so".to_string(), ssl);
    let maps = FakeMaps::default()
        .with_library("/lib/libssl.so", 0x7f00_0000, Some(1234))
        .vanish_after(1);
    let backend = FakeBackend::default().fail_program_with("uprobe_ssl_read", libc::ESRCH);
    let mut instrumenter = Instrumenter::new(backend);

    instrumenter.library_probes(PID, &maps, &mut set).unwrap();
    assert!(set.closers().is_empty());
    assert!(set.instrumented_libs().is_empty());
}

#[test]
fn test_required_probe_enoent_while_process_alive_is_fatal() {
    let mut set = ProbeSet::default();
    let mut ssl = BTreeMap::new();
    ssl.insert("SSL_read".to_string(), FunctionPrograms::entry("uprobe_ssl_read").required());
    set.libraries.insert("libssl.so".to_string(), ssl);
    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let backend = FakeBackend::default().fail_program_with("uprobe_ssl_read", libc::ENOENT);
    let mut instrumenter = Instrumenter::new(backend);

    let err = instrumenter.library_probes(PID, &maps, &mut set).unwrap_err();
    assert_eq!(err.subject(), "SSL_read");
    assert_eq!(err.probe_error().raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn test_rescans_do_not_duplicate_static_fallback() {
    let mut set = ProbeSet::default();
    let mut ssl = BTreeMap::new();
    ssl.insert("SSL_read".to_string(), FunctionPrograms::entry("uprobe_ssl_read"));
    set.libraries.insert("libssl.so".to_string(), ssl);
    let maps = FakeMaps::default().with_library("/usr/bin/node", 0x5500_0000, Some(99));
    let mut instrumenter = Instrumenter::new(FakeBackend::default());

    instrumenter.attach_all(Some(PID), &maps, &mut set).unwrap();
    assert_eq!(set.closers().len(), 1);

    let mut rescan = LibraryRescan::after_initial_scan(PID, &maps, &set);
    assert_eq!(rescan.statically_linked().collect::<Vec<_>>(), vec!["libssl.so"]);
    for _ in 0..5 {
        let added = rescan.run(&mut instrumenter, PID, &maps, &mut set).unwrap();
        assert_eq!(added, 0);
    }
    assert_eq!(set.closers().len(), 1);
    assert_eq!(instrumenter.backend().opened, vec!["/proc/4242/exe".to_string()]);
}

#[test]
fn test_rescan_picks_up_library_mapped_later() {
    let mut set = ProbeSet::default();
    libssl_probes(&mut set);
    let before = FakeMaps::default().with_library("/usr/bin/node", 0x5500_0000, Some(99));
    let mut instrumenter = Instrumenter::new(FakeBackend::default());

    let mut rescan = LibraryRescan::default();
    assert_eq!(rescan.run(&mut instrumenter, PID, &before, &mut set).unwrap(), 2);
    assert_eq!(rescan.run(&mut instrumenter, PID, &before, &mut set).unwrap(), 0);

    // dlopen()ed afterwards: hooked once through map_files, then deduplicated by inode
    let after = FakeMaps::default()
        .with_library("/usr/bin/node", 0x5500_0000, Some(99))
        .with_library("/lib/libssl.so.3", 0x7f00_0000, Some(1234));
    assert_eq!(rescan.run(&mut instrumenter, PID, &after, &mut set).unwrap(), 2);
    assert_eq!(rescan.statically_linked().count(), 0);
    assert_eq!(rescan.run(&mut instrumenter, PID, &after, &mut set).unwrap(), 0);

    assert_eq!(set.closers().len(), 4);
    assert!(set.instrumented_libs().contains(Inode(1234)));
}

#[test]
fn test_socket_filters() {
    let mut set = ProbeSet::default();
    set.socket_filters = vec![ProgramId::new("socket_http"), ProgramId::new("socket_dns")];

    let mut instrumenter = Instrumenter::new(FakeBackend::default());
    instrumenter.socket_filters(&mut set).unwrap();

    let attached = instrumenter.backend().attached();
    let programs: Vec<&str> = attached.iter().map(|a| a.program.as_str()).collect();
    assert_eq!(programs, vec!["socket_http", "socket_dns"]);
    assert_eq!(set.closers().len(), 2);
}

#[test]
fn test_socket_filter_failure_is_fatal() {
    let mut set = ProbeSet::default();
    set.socket_filters = vec![ProgramId::new("socket_http"), ProgramId::new("socket_broken")];

    let mut instrumenter = Instrumenter::new(FakeBackend::default().fail_program("socket_broken"));
    let err = instrumenter.socket_filters(&mut set).unwrap_err();

    assert!(matches!(err, AttachError::SocketFilter { .. }));
    assert_eq!(err.subject(), "socket_broken");
    assert_eq!(set.closers().len(), 1);
}

#[test]
fn test_attach_all_without_pid_skips_libraries() {
    let mut set = ProbeSet::default();
    set.kernel.insert("tcp_sendmsg".to_string(), FunctionPrograms::entry("kprobe_send"));
    libssl_probes(&mut set);
    set.socket_filters = vec![ProgramId::new("socket_http")];

    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let mut instrumenter = Instrumenter::new(FakeBackend::default());
    instrumenter.attach_all(None, &maps, &mut set).unwrap();

    let attached = instrumenter.backend().attached();
    let targets: Vec<&str> = attached.iter().map(|a| a.target.as_str()).collect();
    assert_eq!(targets, vec!["kernel", "socket"]);
}

#[test]
fn test_close_all_releases_every_handle_once() {
    let mut set = ProbeSet::default();
    set.kernel.insert("tcp_sendmsg".to_string(), FunctionPrograms::both("kprobe_send", "kretprobe_send"));
    libssl_probes(&mut set);

    let maps = FakeMaps::default().with_library("/lib/libssl.so", 0x7f00_0000, Some(1234));
    let backend = FakeBackend::default();
    let released = Rc::clone(&backend.released);
    let mut instrumenter = Instrumenter::new(backend);
    instrumenter.attach_all(Some(PID), &maps, &mut set).unwrap();
    assert_eq!(set.closers().len(), 4);

    assert_eq!(set.closers().close_all(), 0);
    assert_eq!(released.get(), 4);
    assert!(set.closers().is_empty());
}
